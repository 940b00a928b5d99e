use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("guess must select {expected} words, got {actual}")]
    InvalidGuessSize { expected: usize, actual: usize },
    #[error("game not in progress")]
    WrongPhase,
    #[error("feedback still showing")]
    Busy,
    #[error("word not in puzzle: {0}")]
    UnknownWord(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PuzzleError {
    #[error("puzzle has no categories")]
    Empty,
    #[error("{categories} categories of {words_per_group} words need {} words, got {words}", .categories * .words_per_group)]
    ShapeMismatch {
        categories: usize,
        words: usize,
        words_per_group: usize,
    },
    #[error("puzzle has {words} words, at most {max} fit in a guess")]
    TooManyWords { words: usize, max: usize },
    #[error("duplicate word: {0}")]
    DuplicateWord(String),
}
