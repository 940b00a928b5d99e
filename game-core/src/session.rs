use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::codec::{Guess, GuessCodec};
use crate::error::GameError;
use crate::evaluator::is_one_away;
use crate::ledger::{AppendResult, GuessLedger};
use crate::puzzle::Puzzle;

pub const DEFAULT_MAX_MISTAKES: usize = 4;

const CATEGORY_SQUARES: [&str; 4] = ["🟨", "🟩", "🟦", "🟪"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// How long "already guessed" and "one away" stay up.
    pub feedback: Duration,
    /// How long a wrong guess shakes before it is settled.
    pub shake: Duration,
    /// Delay before each unsolved category is surfaced during the reveal.
    pub reveal_surface: Duration,
    /// Pause on a surfaced category before it is marked solved.
    pub reveal_pause: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            feedback: Duration::from_millis(1500),
            shake: Duration::from_millis(500),
            reveal_surface: Duration::from_millis(800),
            reveal_pause: Duration::from_millis(1200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    pub max_mistakes: usize,
    pub timings: Timings,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            max_mistakes: DEFAULT_MAX_MISTAKES,
            timings: Timings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Playing,
    Revealing,
    Won,
    Lost,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    AlreadyGuessed,
    OneAway,
    Incorrect,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "category")]
pub enum GuessOutcome {
    Duplicate,
    OneAway,
    Correct(usize),
    Incorrect,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum GameEvent {
    Feedback { feedback: Feedback, shake: Vec<usize> },
    FeedbackCleared,
    SelectionCleared,
    CategorySurfaced { category: usize },
    CategorySolved { category: usize, revealed: bool },
    MistakeMade { remaining: usize },
    PhaseChanged { phase: Phase },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SolvedCategory {
    pub category: usize,
    pub name: String,
    pub words: Vec<String>,
    /// Set when the category was shown by the loss reveal rather than guessed.
    pub revealed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Submission {
    pub outcome: GuessOutcome,
    pub events: Vec<GameEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackView {
    pub kind: Feedback,
    pub shake: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionView {
    pub puzzle_id: String,
    pub phase: Phase,
    pub pool: Vec<String>,
    pub selection: Vec<String>,
    pub solved: Vec<SolvedCategory>,
    pub mistakes_remaining: usize,
    pub feedback: Option<FeedbackView>,
    pub guesses: usize,
}

#[derive(Debug, Clone)]
struct ActiveFeedback {
    kind: Feedback,
    shake: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepAction {
    ClearFeedback { generation: u64 },
    SettleOneAway,
    SettleIncorrect,
    Surface(usize),
    Solve(usize),
}

#[derive(Debug, Clone, Copy)]
struct Step {
    delay: Duration,
    action: StepAction,
}

/// Interactive play of one puzzle.
///
/// All mutations are synchronous. Delayed effects (clearing feedback,
/// settling a wrong guess, the loss reveal) are queued as steps; a driver
/// waits [`GameSession::next_delay`] and then calls
/// [`GameSession::run_next_step`]. Each step's delay counts from the step
/// before it.
#[derive(Debug, Clone)]
pub struct GameSession {
    ledger: GuessLedger,
    codec: GuessCodec,
    rules: Rules,
    pool: Vec<usize>,
    selection: Vec<usize>,
    solved: Vec<SolvedCategory>,
    mistakes_remaining: usize,
    phase: Phase,
    feedback: Option<ActiveFeedback>,
    feedback_generation: u64,
    busy: bool,
    reveal_started: bool,
    schedule: VecDeque<Step>,
    schedule_epoch: u64,
    torn_down: bool,
}

impl GameSession {
    pub fn new(puzzle: Arc<Puzzle>, rules: Rules) -> Self {
        Self::resume(puzzle, &[], rules)
    }

    /// Rebuilds a session from a stored guess sequence.
    ///
    /// A finished record comes back finished: all categories solved resumes
    /// as `Won`, no mistakes left resumes as `Lost` with the remaining
    /// categories already revealed.
    pub fn resume(puzzle: Arc<Puzzle>, stored: &[Guess], rules: Rules) -> Self {
        let ledger = GuessLedger::replay(puzzle.clone(), stored, rules.max_mistakes);
        let mut session = Self {
            codec: GuessCodec::new(puzzle.word_count()),
            rules,
            pool: Vec::new(),
            selection: Vec::new(),
            solved: Vec::new(),
            mistakes_remaining: ledger.mistakes_remaining(),
            phase: Phase::Playing,
            feedback: None,
            feedback_generation: 0,
            busy: false,
            reveal_started: false,
            schedule: VecDeque::new(),
            schedule_epoch: 0,
            torn_down: false,
            ledger,
        };

        for &category in session.ledger.solved() {
            let solved = session.solved_category(category, false);
            session.solved.push(solved);
        }
        session.pool = (0..puzzle.word_count())
            .filter(|&i| !session.ledger.is_solved(puzzle.category_of(i)))
            .collect();

        if session.ledger.is_complete() {
            session.phase = Phase::Won;
        } else if session.ledger.is_exhausted() {
            let pending: Vec<usize> = session.unsolved_categories().collect();
            for category in pending {
                let solved = session.solved_category(category, true);
                session.solved.push(solved);
            }
            session.pool.clear();
            session.reveal_started = true;
            session.phase = Phase::Lost;
        }
        session
    }

    pub fn puzzle(&self) -> &Arc<Puzzle> {
        self.ledger.puzzle()
    }

    pub fn ledger(&self) -> &GuessLedger {
        &self.ledger
    }

    pub fn guesses(&self) -> &[Guess] {
        self.ledger.guesses()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mistakes_remaining(&self) -> usize {
        self.mistakes_remaining
    }

    pub fn solved(&self) -> &[SolvedCategory] {
        &self.solved
    }

    /// Remaining words in display order, as flat indices.
    pub fn pool(&self) -> &[usize] {
        &self.pool
    }

    /// Selected flat indices in click order.
    pub fn selection(&self) -> &[usize] {
        &self.selection
    }

    pub fn feedback(&self) -> Option<Feedback> {
        self.feedback.as_ref().map(|f| f.kind)
    }

    /// Words currently marked to shake.
    pub fn shaking(&self) -> &[usize] {
        self.feedback.as_ref().map(|f| f.shake.as_slice()).unwrap_or(&[])
    }

    /// True while a wrong or near-miss guess is on screen and input is held.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Won | Phase::Lost)
    }

    fn accepts_input(&self) -> bool {
        matches!(self.phase, Phase::Playing) && !self.busy && !self.torn_down
    }

    pub fn toggle_word(&mut self, word: &str) -> Result<bool, GameError> {
        let index = self
            .puzzle()
            .index_of(word)
            .ok_or_else(|| GameError::UnknownWord(word.to_string()))?;
        Ok(self.toggle_index(index))
    }

    /// Adds or removes a word from the selection. Returns whether the
    /// selection changed; a full selection silently refuses new words.
    pub fn toggle_index(&mut self, index: usize) -> bool {
        if !self.accepts_input() || !self.pool.contains(&index) {
            return false;
        }
        if let Some(pos) = self.selection.iter().position(|&i| i == index) {
            self.selection.remove(pos);
            return true;
        }
        if self.selection.len() < self.puzzle().words_per_group() {
            self.selection.push(index);
            return true;
        }
        false
    }

    /// Clears the selection whenever the game is in play, feedback window
    /// included. Returns whether anything was selected.
    pub fn deselect_all(&mut self) -> bool {
        if !matches!(self.phase, Phase::Playing) || self.selection.is_empty() {
            return false;
        }
        self.selection.clear();
        true
    }

    pub fn shuffle(&mut self) -> bool {
        self.shuffle_with(&mut thread_rng())
    }

    /// Reorders the remaining words. Nothing else changes.
    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        if !matches!(self.phase, Phase::Playing) {
            return false;
        }
        self.pool.shuffle(rng);
        true
    }

    fn selected_words(&self) -> impl Iterator<Item = &str> {
        let words = self.puzzle().words();
        self.selection.iter().map(move |&i| words[i].as_str())
    }

    pub fn submit(&mut self) -> Result<Submission, GameError> {
        if !matches!(self.phase, Phase::Playing) || self.torn_down {
            return Err(GameError::WrongPhase);
        }
        if self.busy {
            return Err(GameError::Busy);
        }
        let expected = self.puzzle().words_per_group();
        if self.selection.len() != expected {
            return Err(GameError::InvalidGuessSize {
                expected,
                actual: self.selection.len(),
            });
        }

        let guess = self.codec.encode(self.selected_words(), self.puzzle().words());
        let mut events = Vec::new();

        if self.ledger.classify(guess) == AppendResult::Duplicate {
            self.show_feedback(Feedback::AlreadyGuessed, Vec::new(), &mut events);
            self.clear_selection(&mut events);
            let generation = self.feedback_generation;
            self.push_step(
                self.rules.timings.feedback,
                StepAction::ClearFeedback { generation },
            );
            return Ok(Submission {
                outcome: GuessOutcome::Duplicate,
                events,
            });
        }

        if is_one_away(guess, self.puzzle(), self.ledger.solved()) {
            let shake = self.selection.clone();
            self.show_feedback(Feedback::OneAway, shake, &mut events);
            self.busy = true;
            self.push_step(self.rules.timings.feedback, StepAction::SettleOneAway);
            return Ok(Submission {
                outcome: GuessOutcome::OneAway,
                events,
            });
        }

        let outcome = match self.ledger.append(guess)? {
            AppendResult::Correct(category) => {
                if self.feedback.take().is_some() {
                    events.push(GameEvent::FeedbackCleared);
                }
                self.clear_selection(&mut events);
                self.solve(category, false, &mut events);
                if self.ledger.is_complete() {
                    self.set_phase(Phase::Won, &mut events);
                }
                GuessOutcome::Correct(category)
            }
            AppendResult::Incorrect => {
                let shake = self.selection.clone();
                self.show_feedback(Feedback::Incorrect, shake, &mut events);
                self.busy = true;
                self.push_step(self.rules.timings.shake, StepAction::SettleIncorrect);
                GuessOutcome::Incorrect
            }
            // classify above already caught duplicates
            AppendResult::Duplicate => GuessOutcome::Duplicate,
        };

        Ok(Submission { outcome, events })
    }

    /// Delay before the next queued step, if one is queued.
    pub fn next_delay(&self) -> Option<Duration> {
        if self.torn_down {
            return None;
        }
        self.schedule.front().map(|step| step.delay)
    }

    /// Changes whenever new steps are queued, so a driver knows to restart
    /// its timer.
    pub fn schedule_epoch(&self) -> u64 {
        self.schedule_epoch
    }

    pub fn run_next_step(&mut self) -> Option<Vec<GameEvent>> {
        if self.torn_down {
            return None;
        }
        let step = self.schedule.pop_front()?;
        let mut events = Vec::new();

        match step.action {
            StepAction::ClearFeedback { generation } => {
                if generation == self.feedback_generation && self.feedback.is_some() {
                    self.feedback = None;
                    events.push(GameEvent::FeedbackCleared);
                }
            }
            StepAction::SettleOneAway => {
                self.busy = false;
                self.feedback = None;
                events.push(GameEvent::FeedbackCleared);
                self.clear_selection(&mut events);
            }
            StepAction::SettleIncorrect => {
                self.busy = false;
                self.feedback = None;
                events.push(GameEvent::FeedbackCleared);
                self.clear_selection(&mut events);
                self.mistakes_remaining = self.ledger.mistakes_remaining();
                events.push(GameEvent::MistakeMade {
                    remaining: self.mistakes_remaining,
                });
                if self.mistakes_remaining == 0 {
                    self.start_reveal(&mut events);
                }
            }
            StepAction::Surface(category) => {
                let puzzle = self.puzzle().clone();
                let (mut front, rest): (Vec<usize>, Vec<usize>) = self
                    .pool
                    .iter()
                    .partition(|&&i| puzzle.category_of(i) == category);
                front.extend(rest);
                self.pool = front;
                events.push(GameEvent::CategorySurfaced { category });
            }
            StepAction::Solve(category) => {
                self.solve(category, true, &mut events);
                if self.unsolved_categories().next().is_none() {
                    self.set_phase(Phase::Lost, &mut events);
                }
            }
        }

        Some(events)
    }

    /// Runs every queued step now, including steps queued along the way.
    pub fn fast_forward(&mut self) -> Vec<GameEvent> {
        let mut events = Vec::new();
        while let Some(step_events) = self.run_next_step() {
            events.extend(step_events);
        }
        events
    }

    /// Stops all pending steps. The session keeps its state but never runs
    /// another step.
    pub fn teardown(&mut self) {
        self.schedule.clear();
        self.torn_down = true;
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn view(&self) -> SessionView {
        let words = self.puzzle().words();
        let names = |indices: &[usize]| -> Vec<String> {
            indices.iter().map(|&i| words[i].clone()).collect()
        };
        SessionView {
            puzzle_id: self.puzzle().id().to_string(),
            phase: self.phase,
            pool: names(&self.pool),
            selection: names(&self.selection),
            solved: self.solved.clone(),
            mistakes_remaining: self.mistakes_remaining,
            feedback: self.feedback.as_ref().map(|f| FeedbackView {
                kind: f.kind,
                shake: names(&f.shake),
            }),
            guesses: self.ledger.guesses().len(),
        }
    }

    /// One line per recorded guess, one square per word coloured by the
    /// word's category.
    pub fn summary(&self) -> String {
        let puzzle = self.puzzle();
        self.ledger
            .guesses()
            .iter()
            .filter(|guess| guess.count() == puzzle.words_per_group())
            .map(|&guess| {
                self.codec
                    .decode(guess)
                    .into_iter()
                    .map(|i| CATEGORY_SQUARES[puzzle.category_of(i) % CATEGORY_SQUARES.len()])
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push_step(&mut self, delay: Duration, action: StepAction) {
        self.schedule.push_back(Step { delay, action });
        self.schedule_epoch += 1;
    }

    fn show_feedback(&mut self, kind: Feedback, shake: Vec<usize>, events: &mut Vec<GameEvent>) {
        // a newer message supersedes any pending clear of an older one
        self.schedule
            .retain(|step| !matches!(step.action, StepAction::ClearFeedback { .. }));
        self.feedback_generation += 1;
        events.push(GameEvent::Feedback {
            feedback: kind,
            shake: shake.clone(),
        });
        self.feedback = Some(ActiveFeedback { kind, shake });
    }

    fn clear_selection(&mut self, events: &mut Vec<GameEvent>) {
        if !self.selection.is_empty() {
            self.selection.clear();
            events.push(GameEvent::SelectionCleared);
        }
    }

    fn solve(&mut self, category: usize, revealed: bool, events: &mut Vec<GameEvent>) {
        let puzzle = self.puzzle().clone();
        self.pool.retain(|&i| puzzle.category_of(i) != category);
        let solved = self.solved_category(category, revealed);
        self.solved.push(solved);
        events.push(GameEvent::CategorySolved { category, revealed });
    }

    fn solved_category(&self, category: usize, revealed: bool) -> SolvedCategory {
        let puzzle = self.puzzle();
        SolvedCategory {
            category,
            name: puzzle.categories()[category].clone(),
            words: puzzle.words()[puzzle.category_indices(category)].to_vec(),
            revealed,
        }
    }

    fn unsolved_categories(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.puzzle().num_groups())
            .filter(move |&category| !self.solved.iter().any(|s| s.category == category))
    }

    fn start_reveal(&mut self, events: &mut Vec<GameEvent>) {
        if self.reveal_started {
            return;
        }
        self.reveal_started = true;
        self.set_phase(Phase::Revealing, events);

        let pending: Vec<usize> = self.unsolved_categories().collect();
        for category in pending {
            self.push_step(self.rules.timings.reveal_surface, StepAction::Surface(category));
            self.push_step(self.rules.timings.reveal_pause, StepAction::Solve(category));
        }
    }

    fn set_phase(&mut self, phase: Phase, events: &mut Vec<GameEvent>) {
        info!(puzzle = self.puzzle().id(), ?phase, "phase changed");
        self.phase = phase;
        events.push(GameEvent::PhaseChanged { phase });
    }
}
