use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::codec::MAX_WIDTH;
use crate::error::PuzzleError;

pub type PuzzleId = String;

/// A grouping puzzle: `categories.len()` groups of `words_per_group` words.
///
/// Words are stored flat; the word at index `i` belongs to category
/// `i / words_per_group`. Only valid shapes can be constructed, including
/// through deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "PuzzleData", into = "PuzzleData")]
pub struct Puzzle {
    id: PuzzleId,
    creator_name: String,
    created_at: u64,
    categories: Vec<String>,
    words: Vec<String>,
    words_per_group: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PuzzleData {
    id: PuzzleId,
    #[serde(default)]
    creator_name: String,
    #[serde(default)]
    created_at: u64,
    categories: Vec<String>,
    words: Vec<String>,
    words_per_group: usize,
}

impl TryFrom<PuzzleData> for Puzzle {
    type Error = PuzzleError;

    fn try_from(data: PuzzleData) -> Result<Self, Self::Error> {
        Puzzle::new(
            data.id,
            data.creator_name,
            data.created_at,
            data.categories,
            data.words,
            data.words_per_group,
        )
    }
}

impl From<Puzzle> for PuzzleData {
    fn from(puzzle: Puzzle) -> Self {
        Self {
            id: puzzle.id,
            creator_name: puzzle.creator_name,
            created_at: puzzle.created_at,
            categories: puzzle.categories,
            words: puzzle.words,
            words_per_group: puzzle.words_per_group,
        }
    }
}

impl Puzzle {
    pub fn new(
        id: impl Into<PuzzleId>,
        creator_name: impl Into<String>,
        created_at: u64,
        categories: Vec<String>,
        words: Vec<String>,
        words_per_group: usize,
    ) -> Result<Self, PuzzleError> {
        if categories.is_empty() || words_per_group == 0 {
            return Err(PuzzleError::Empty);
        }
        if words.len() != categories.len() * words_per_group {
            return Err(PuzzleError::ShapeMismatch {
                categories: categories.len(),
                words: words.len(),
                words_per_group,
            });
        }
        if words.len() > MAX_WIDTH {
            return Err(PuzzleError::TooManyWords {
                words: words.len(),
                max: MAX_WIDTH,
            });
        }
        let mut seen = HashSet::new();
        for word in &words {
            if !seen.insert(word.as_str()) {
                return Err(PuzzleError::DuplicateWord(word.clone()));
            }
        }

        Ok(Self {
            id: id.into(),
            creator_name: creator_name.into(),
            created_at,
            categories,
            words,
            words_per_group,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn creator_name(&self) -> &str {
        &self.creator_name
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn num_groups(&self) -> usize {
        self.categories.len()
    }

    pub fn words_per_group(&self) -> usize {
        self.words_per_group
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn category_of(&self, index: usize) -> usize {
        index / self.words_per_group
    }

    /// Flat indices of the words in `category`.
    pub fn category_indices(&self, category: usize) -> std::ops::Range<usize> {
        let start = category * self.words_per_group;
        start..start + self.words_per_group
    }

    pub fn index_of(&self, word: &str) -> Option<usize> {
        self.words.iter().position(|w| w == word)
    }
}
