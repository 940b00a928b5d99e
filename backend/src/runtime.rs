use std::sync::Arc;

use game_core::{
    GameError, GameEvent, GameSession, GameStateRecord, Rules, SessionView, Submission,
};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::remote::RemoteStore;
use crate::store::{GameKey, GameStateStore, StoreError};

struct Shared {
    key: GameKey,
    session: GameSession,
    record: GameStateRecord,
    persisted: usize,
    last_error: Option<String>,
    closed: bool,
}

impl Shared {
    fn unsaved(&self) -> Option<GameStateRecord> {
        let guesses = self.session.guesses();
        (guesses.len() > self.persisted).then(|| self.record.with_guesses(guesses))
    }
}

/// A live game for one user and puzzle.
///
/// Selection and submission apply locally first; every guess that reaches
/// the ledger is then persisted with the full ledger. A failed persist
/// leaves `last_error` set until [`SessionHandle::flush`] or a later guess
/// saves the ledger. Timed steps run on a background task that stops when
/// the handle is closed or dropped.
pub struct SessionHandle<R: RemoteStore> {
    store: Arc<GameStateStore<R>>,
    shared: Arc<Mutex<Shared>>,
    timer: std::sync::Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<GameEvent>,
}

impl<R: RemoteStore> SessionHandle<R> {
    pub async fn open(
        store: Arc<GameStateStore<R>>,
        user_id: &str,
        puzzle_id: &str,
        rules: Rules,
    ) -> Result<Self, StoreError> {
        let loaded = store.load_or_create(user_id, puzzle_id).await?;
        let session = GameSession::resume(loaded.puzzle, &loaded.game_state.guesses, rules);
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            store,
            shared: Arc::new(Mutex::new(Shared {
                key: GameKey::new(user_id, puzzle_id),
                persisted: loaded.game_state.guesses.len(),
                record: loaded.game_state,
                session,
                last_error: None,
                closed: false,
            })),
            timer: std::sync::Mutex::new(None),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub async fn key(&self) -> GameKey {
        self.shared.lock().await.key.clone()
    }

    pub async fn view(&self) -> SessionView {
        self.shared.lock().await.session.view()
    }

    pub async fn summary(&self) -> String {
        self.shared.lock().await.session.summary()
    }

    /// Most recent remote failure, cleared by the next successful persist.
    pub async fn last_error(&self) -> Option<String> {
        self.shared.lock().await.last_error.clone()
    }

    pub async fn record(&self) -> GameStateRecord {
        let shared = self.shared.lock().await;
        shared.record.with_guesses(shared.session.guesses())
    }

    pub async fn toggle_word(&self, word: &str) -> Result<bool, GameError> {
        self.shared.lock().await.session.toggle_word(word)
    }

    pub async fn deselect_all(&self) -> bool {
        self.shared.lock().await.session.deselect_all()
    }

    pub async fn shuffle(&self) -> bool {
        self.shared.lock().await.session.shuffle()
    }

    pub async fn submit(&self) -> Result<Submission, GameError> {
        let (submission, snapshot) = {
            let mut shared = self.shared.lock().await;
            let epoch = shared.session.schedule_epoch();
            let submission = shared.session.submit()?;
            if shared.session.schedule_epoch() != epoch {
                self.restart_timer();
            }
            (submission, shared.unsaved())
        };

        for event in &submission.events {
            let _ = self.events.send(event.clone());
        }
        if let Some(snapshot) = snapshot {
            self.persist(snapshot).await;
        }
        Ok(submission)
    }

    /// Persists guesses that no successful save has covered yet, such as
    /// those left behind by a failed persist. Does nothing once closed.
    pub async fn flush(&self) {
        let snapshot = {
            let shared = self.shared.lock().await;
            if shared.closed {
                return;
            }
            shared.unsaved()
        };
        if let Some(snapshot) = snapshot {
            self.persist(snapshot).await;
        }
    }

    async fn persist(&self, snapshot: GameStateRecord) {
        let key = GameKey::of(&snapshot);
        let result = self.store.persist(snapshot).await;

        let mut shared = self.shared.lock().await;
        if shared.closed {
            debug!(
                user_id = %key.user_id,
                puzzle_id = %key.puzzle_id,
                "dropping persist result after close"
            );
            return;
        }
        match result {
            Ok(saved) => {
                shared.record.id = saved.id;
                shared.persisted = shared.persisted.max(saved.guesses.len());
                shared.last_error = None;
            }
            Err(err) => {
                warn!(
                    user_id = %key.user_id,
                    puzzle_id = %key.puzzle_id,
                    "keeping local progress: {err}"
                );
                shared.last_error = Some(err.to_string());
            }
        }
    }

    fn restart_timer(&self) {
        let mut timer = match self.timer.lock() {
            Ok(timer) => timer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = timer.take() {
            task.abort();
        }

        let shared = self.shared.clone();
        let events = self.events.clone();
        *timer = Some(tokio::spawn(async move {
            loop {
                let delay = {
                    let shared = shared.lock().await;
                    match shared.session.next_delay() {
                        Some(delay) if !shared.closed => delay,
                        _ => break,
                    }
                };
                tokio::time::sleep(delay).await;

                let step_events = {
                    let mut shared = shared.lock().await;
                    if shared.closed {
                        break;
                    }
                    match shared.session.run_next_step() {
                        Some(step_events) => step_events,
                        None => break,
                    }
                };
                for event in step_events {
                    let _ = events.send(event);
                }
            }
        }));
    }

    /// Stops the timed steps. Later persist completions are ignored.
    pub async fn close(&self) {
        let mut shared = self.shared.lock().await;
        shared.closed = true;
        shared.session.teardown();
        drop(shared);
        self.abort_timer();
    }

    fn abort_timer(&self) {
        let mut timer = match self.timer.lock() {
            Ok(timer) => timer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = timer.take() {
            task.abort();
        }
    }
}

impl<R: RemoteStore> Drop for SessionHandle<R> {
    fn drop(&mut self) {
        if let Ok(mut shared) = self.shared.try_lock() {
            shared.closed = true;
            shared.session.teardown();
        }
        self.abort_timer();
    }
}
