use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::codec::Guess;
use crate::error::GameError;
use crate::evaluator::matched_category;
use crate::puzzle::Puzzle;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "result", content = "category")]
pub enum AppendResult {
    Duplicate,
    Correct(usize),
    Incorrect,
}

/// Ordered guess history for one play-through of one puzzle.
///
/// Solved categories and the mistake count are derived from the history; a
/// ledger rebuilt with [`GuessLedger::replay`] reaches the same state as one
/// fed the same guesses through [`GuessLedger::append`].
#[derive(Debug, Clone)]
pub struct GuessLedger {
    puzzle: Arc<Puzzle>,
    max_mistakes: usize,
    guesses: Vec<Guess>,
    solved: Vec<usize>,
    incorrect: usize,
}

impl GuessLedger {
    pub fn new(puzzle: Arc<Puzzle>, max_mistakes: usize) -> Self {
        Self {
            puzzle,
            max_mistakes,
            guesses: Vec::new(),
            solved: Vec::new(),
            incorrect: 0,
        }
    }

    /// Rebuilds derived state from a stored sequence without persisting.
    ///
    /// The stored sequence is kept verbatim so the next persist sends it back
    /// whole; entries with the wrong size, or repeating an earlier entry, do
    /// not affect derived state.
    pub fn replay(puzzle: Arc<Puzzle>, stored: &[Guess], max_mistakes: usize) -> Self {
        let mut ledger = Self::new(puzzle, max_mistakes);
        for &guess in stored {
            if guess.count() != ledger.puzzle.words_per_group() {
                debug!(guess = guess.bits(), "ignoring stored guess of wrong size");
                ledger.guesses.push(guess);
                continue;
            }
            match ledger.classify(guess) {
                AppendResult::Duplicate => ledger.guesses.push(guess),
                result => ledger.apply(guess, result),
            }
        }
        ledger
    }

    pub fn append(&mut self, guess: Guess) -> Result<AppendResult, GameError> {
        let expected = self.puzzle.words_per_group();
        if guess.count() != expected {
            return Err(GameError::InvalidGuessSize {
                expected,
                actual: guess.count(),
            });
        }
        let result = self.classify(guess);
        self.apply(guess, result);
        Ok(result)
    }

    /// What appending `guess` would do, without doing it.
    pub fn classify(&self, guess: Guess) -> AppendResult {
        if self.guesses.contains(&guess) {
            return AppendResult::Duplicate;
        }
        match matched_category(guess, &self.puzzle) {
            Some(category) if self.solved.contains(&category) => AppendResult::Duplicate,
            Some(category) => AppendResult::Correct(category),
            None => AppendResult::Incorrect,
        }
    }

    fn apply(&mut self, guess: Guess, result: AppendResult) {
        match result {
            AppendResult::Duplicate => {}
            AppendResult::Correct(category) => {
                self.guesses.push(guess);
                self.solved.push(category);
            }
            AppendResult::Incorrect => {
                self.guesses.push(guess);
                self.incorrect += 1;
            }
        }
    }

    pub fn puzzle(&self) -> &Arc<Puzzle> {
        &self.puzzle
    }

    pub fn guesses(&self) -> &[Guess] {
        &self.guesses
    }

    /// Solved categories in the order they were solved.
    pub fn solved(&self) -> &[usize] {
        &self.solved
    }

    pub fn is_solved(&self, category: usize) -> bool {
        self.solved.contains(&category)
    }

    pub fn max_mistakes(&self) -> usize {
        self.max_mistakes
    }

    pub fn mistakes_remaining(&self) -> usize {
        self.max_mistakes.saturating_sub(self.incorrect)
    }

    pub fn is_complete(&self) -> bool {
        self.solved.len() == self.puzzle.num_groups()
    }

    pub fn is_exhausted(&self) -> bool {
        self.mistakes_remaining() == 0
    }
}
