use crate::codec::Guess;
use crate::puzzle::Puzzle;

/// Mask of the contiguous block of words belonging to `category`.
pub fn category_mask(puzzle: &Puzzle, category: usize) -> Guess {
    Guess::from_indices(puzzle.category_indices(category))
}

/// The category whose words are exactly the words of `guess`, if any.
///
/// Category blocks are disjoint, so at most one can match.
pub fn matched_category(guess: Guess, puzzle: &Puzzle) -> Option<usize> {
    (0..puzzle.num_groups()).find(|&category| {
        let mask = category_mask(puzzle, category).bits();
        guess.bits() & mask == mask && guess.bits() & !mask == 0
    })
}

/// True when a full selection has all but one word in some category that is
/// not in `solved`.
pub fn is_one_away(guess: Guess, puzzle: &Puzzle, solved: &[usize]) -> bool {
    let size = puzzle.words_per_group();
    if guess.count() != size || size < 2 {
        return false;
    }

    (0..puzzle.num_groups())
        .filter(|category| !solved.contains(category))
        .any(|category| {
            guess
                .intersection(category_mask(puzzle, category))
                .count()
                == size - 1
        })
}
