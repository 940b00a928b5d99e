//! Rules and state for a word-grouping puzzle: guesses are bitmasks over the
//! puzzle's flat word list, a ledger of guesses is the only stored state, and
//! everything else is derived from it.

pub mod codec;
pub mod error;
pub mod evaluator;
pub mod ledger;
pub mod puzzle;
pub mod record;
pub mod session;

pub use codec::{Guess, GuessCodec, MAX_WIDTH};
pub use error::{GameError, PuzzleError};
pub use evaluator::{category_mask, is_one_away, matched_category};
pub use ledger::{AppendResult, GuessLedger};
pub use puzzle::{Puzzle, PuzzleId};
pub use record::{GameStateRecord, UserId};
pub use session::{
    Feedback, FeedbackView, GameEvent, GameSession, GuessOutcome, Phase, Rules, SessionView,
    SolvedCategory, Submission, Timings, DEFAULT_MAX_MISTAKES,
};
