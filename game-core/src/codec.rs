use serde::{Deserialize, Serialize};

/// Widest puzzle a guess can address.
pub const MAX_WIDTH: usize = u64::BITS as usize;

/// A set of words encoded as bits over their flat puzzle indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guess(pub u64);

impl Guess {
    pub fn from_indices<I>(indices: I) -> Guess
    where
        I: IntoIterator<Item = usize>,
    {
        Guess(
            indices
                .into_iter()
                .filter(|&i| i < MAX_WIDTH)
                .fold(0u64, |bits, i| bits | 1u64 << i),
        )
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn contains(self, index: usize) -> bool {
        index < MAX_WIDTH && self.0 & (1u64 << index) != 0
    }

    pub fn intersection(self, other: Guess) -> Guess {
        Guess(self.0 & other.0)
    }

    pub fn indices(self) -> Indices {
        Indices { bits: self.0 }
    }
}

pub struct Indices {
    bits: u64,
}

impl Iterator for Indices {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.bits == 0 {
            return None;
        }
        let next_bit = self.bits.trailing_zeros();
        self.bits &= self.bits - 1;
        Some(next_bit as usize)
    }
}

/// Converts word selections to and from guesses for one puzzle shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuessCodec {
    width: usize,
}

impl GuessCodec {
    /// `width` is `num_groups * words_per_group`, clamped to [`MAX_WIDTH`].
    pub fn new(width: usize) -> Self {
        Self {
            width: width.min(MAX_WIDTH),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Sets the bit of each selected word's first position in `all_words`.
    /// Words missing from `all_words` contribute nothing.
    pub fn encode<'a, I>(&self, selected: I, all_words: &[String]) -> Guess
    where
        I: IntoIterator<Item = &'a str>,
    {
        Guess::from_indices(selected.into_iter().filter_map(|word| {
            all_words
                .iter()
                .take(self.width)
                .position(|w| w == word)
        }))
    }

    pub fn decode(&self, guess: Guess) -> Vec<usize> {
        guess.indices().take_while(|&i| i < self.width).collect()
    }
}
