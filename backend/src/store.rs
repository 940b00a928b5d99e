use std::collections::HashMap;
use std::sync::Arc;

use game_core::{GameStateRecord, Puzzle};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::remote::{RemoteError, RemoteStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("puzzle not found: {0}")]
    PuzzleNotFound(String),
    #[error("remote store error: {0}")]
    RemoteIo(String),
}

impl From<RemoteError> for StoreError {
    fn from(err: RemoteError) -> Self {
        StoreError::RemoteIo(err.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GameKey {
    pub user_id: String,
    pub puzzle_id: String,
}

impl GameKey {
    pub fn new(user_id: impl Into<String>, puzzle_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            puzzle_id: puzzle_id.into(),
        }
    }

    pub fn of(record: &GameStateRecord) -> Self {
        Self::new(record.user_id.clone(), record.puzzle_id.clone())
    }
}

#[derive(Debug, Clone, Default)]
struct CacheEntry {
    game_state: Option<GameStateRecord>,
    puzzle: Option<Arc<Puzzle>>,
}

#[derive(Debug, Clone)]
pub struct LoadedGame {
    pub game_state: GameStateRecord,
    pub puzzle: Arc<Puzzle>,
}

/// Game states with their puzzles, cached per `(user, puzzle)` in front of
/// a [`RemoteStore`].
///
/// The cache holds at most one entry per key; every write replaces the
/// entry's record whole.
pub struct GameStateStore<R> {
    remote: R,
    cache: RwLock<HashMap<GameKey, CacheEntry>>,
}

impl<R: RemoteStore> GameStateStore<R> {
    pub fn new(remote: R) -> Self {
        Self {
            remote,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub async fn cached(&self, key: &GameKey) -> Option<GameStateRecord> {
        self.cache
            .read()
            .await
            .get(key)
            .and_then(|entry| entry.game_state.clone())
    }

    pub async fn load_or_create(
        &self,
        user_id: &str,
        puzzle_id: &str,
    ) -> Result<LoadedGame, StoreError> {
        let key = GameKey::new(user_id, puzzle_id);
        let cached = self.cache.read().await.get(&key).cloned().unwrap_or_default();

        if let CacheEntry {
            game_state: Some(game_state),
            puzzle: Some(puzzle),
        } = &cached
        {
            debug!(user_id, puzzle_id, "game state served from cache");
            return Ok(LoadedGame {
                game_state: game_state.clone(),
                puzzle: puzzle.clone(),
            });
        }

        let puzzle = match cached.puzzle {
            Some(puzzle) => puzzle,
            None => {
                let fetched = self.remote.fetch_puzzle(puzzle_id).await.map_err(|err| {
                    warn!(puzzle_id, "puzzle fetch failed: {err}");
                    StoreError::from(err)
                })?;
                Arc::new(fetched.ok_or_else(|| StoreError::PuzzleNotFound(puzzle_id.to_string()))?)
            }
        };

        let game_state = match cached.game_state {
            Some(game_state) => game_state,
            None => match self.remote.fetch_game_state(user_id, puzzle_id).await {
                Ok(Some(game_state)) => game_state,
                Ok(None) => {
                    info!(user_id, puzzle_id, "creating game state");
                    GameStateRecord::new_for(user_id, &puzzle)
                }
                Err(err) => {
                    warn!(user_id, puzzle_id, "game state fetch failed: {err}");
                    // keep the puzzle so a retry only refetches the game state
                    self.merge(&key, None, Some(puzzle)).await;
                    return Err(err.into());
                }
            },
        };

        self.merge(&key, Some(game_state.clone()), Some(puzzle.clone()))
            .await;
        Ok(LoadedGame { game_state, puzzle })
    }

    /// Upserts `record` remotely and returns the record as now cached.
    ///
    /// Guesses never shrink: a write carrying fewer guesses than the cache
    /// keeps the cached guesses, and the returned record shows them.
    pub async fn persist(&self, record: GameStateRecord) -> Result<GameStateRecord, StoreError> {
        let id = self.remote.upsert_game_state(&record).await.map_err(|err| {
            warn!(
                user_id = %record.user_id,
                puzzle_id = %record.puzzle_id,
                "persist failed: {err}"
            );
            StoreError::from(err)
        })?;
        let saved = GameStateRecord {
            id: Some(id),
            ..record
        };
        let stored = self
            .merge(&GameKey::of(&saved), Some(saved.clone()), None)
            .await;
        Ok(stored.unwrap_or(saved))
    }

    /// All of a user's game states. Served from cache unless `force` is set
    /// or nothing is cached for the user; a remote load replaces the user's
    /// cached entries and leaves their puzzles unloaded.
    pub async fn load_all_for_user(
        &self,
        user_id: &str,
        force: bool,
    ) -> Result<Vec<GameStateRecord>, StoreError> {
        if !force {
            let cache = self.cache.read().await;
            let mut cached: Vec<GameStateRecord> = cache
                .iter()
                .filter(|(key, _)| key.user_id == user_id)
                .filter_map(|(_, entry)| entry.game_state.clone())
                .collect();
            if !cached.is_empty() {
                debug!(user_id, count = cached.len(), "game states served from cache");
                cached.sort_by(|a, b| a.puzzle_id.cmp(&b.puzzle_id));
                return Ok(cached);
            }
        }

        let records = self.remote.list_game_states_for_user(user_id).await?;
        let mut cache = self.cache.write().await;
        cache.retain(|key, _| key.user_id != user_id);
        for record in &records {
            cache.insert(
                GameKey::of(record),
                CacheEntry {
                    game_state: Some(record.clone()),
                    puzzle: None,
                },
            );
        }
        Ok(records)
    }

    async fn merge(
        &self,
        key: &GameKey,
        game_state: Option<GameStateRecord>,
        puzzle: Option<Arc<Puzzle>>,
    ) -> Option<GameStateRecord> {
        let mut cache = self.cache.write().await;
        let entry = cache.entry(key.clone()).or_default();
        if let Some(incoming) = game_state {
            entry.game_state = Some(match entry.game_state.take() {
                Some(current) if current.guesses.len() > incoming.guesses.len() => {
                    GameStateRecord {
                        id: incoming.id.or(current.id),
                        ..current
                    }
                }
                _ => incoming,
            });
        }
        if puzzle.is_some() {
            entry.puzzle = puzzle;
        }
        entry.game_state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::tests::{sample_puzzle, FlakyRemote};
    use game_core::Guess;
    use std::sync::atomic::Ordering;

    async fn store_with_puzzles(ids: &[&str]) -> GameStateStore<FlakyRemote> {
        let remote = FlakyRemote::default();
        for id in ids {
            remote.inner.insert_puzzle(sample_puzzle(id)).await;
        }
        GameStateStore::new(remote)
    }

    #[tokio::test]
    async fn second_load_is_served_from_cache() {
        let store = store_with_puzzles(&["p1"]).await;

        let first = store.load_or_create("u1", "p1").await.unwrap();
        let second = store.load_or_create("u1", "p1").await.unwrap();

        assert_eq!(first.game_state, second.game_state);
        assert_eq!(store.remote().state_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(store.remote().puzzle_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn creates_record_with_metadata_snapshot() {
        let store = store_with_puzzles(&["p1"]).await;
        let loaded = store.load_or_create("u1", "p1").await.unwrap();

        assert_eq!(loaded.game_state.id, None);
        assert!(loaded.game_state.guesses.is_empty());
        assert_eq!(loaded.game_state.creator_name, "casey");
        assert_eq!(loaded.game_state.num_groups, 4);
        assert_eq!(loaded.puzzle.id(), "p1");
        // nothing is written until the first persist
        assert_eq!(store.remote().inner.game_state_count().await, 0);
    }

    #[tokio::test]
    async fn missing_puzzle_is_not_found() {
        let store = store_with_puzzles(&[]).await;
        let err = store.load_or_create("u1", "nope").await.unwrap_err();
        assert_eq!(err, StoreError::PuzzleNotFound("nope".into()));
    }

    #[tokio::test]
    async fn remote_failure_surfaces_as_io_error() {
        let store = store_with_puzzles(&["p1"]).await;
        store.remote().fail_with("offline");
        let err = store.load_or_create("u1", "p1").await.unwrap_err();
        assert_eq!(err, StoreError::RemoteIo("offline".into()));
    }

    #[tokio::test]
    async fn persist_is_idempotent_and_assigns_id() {
        let store = store_with_puzzles(&["p1"]).await;
        let loaded = store.load_or_create("u1", "p1").await.unwrap();
        let record = loaded.game_state.with_guesses(&[Guess(15)]);

        let first = store.persist(record.clone()).await.unwrap();
        let second = store.persist(record).await.unwrap();

        assert!(first.id.is_some());
        assert_eq!(first.id, second.id);
        assert_eq!(store.remote().inner.game_state_count().await, 1);

        let cached = store.cached(&GameKey::new("u1", "p1")).await.unwrap();
        assert_eq!(cached.id, first.id);
        assert_eq!(cached.guesses, vec![Guess(15)]);
    }

    #[tokio::test]
    async fn late_persist_does_not_revert_cache() {
        let store = store_with_puzzles(&["p1"]).await;
        let base = store.load_or_create("u1", "p1").await.unwrap().game_state;

        store
            .persist(base.with_guesses(&[Guess(15), Guess(240)]))
            .await
            .unwrap();
        let stored = store.persist(base.with_guesses(&[Guess(15)])).await.unwrap();
        assert_eq!(stored.guesses, vec![Guess(15), Guess(240)]);

        let cached = store.cached(&GameKey::new("u1", "p1")).await.unwrap();
        assert_eq!(cached.guesses, vec![Guess(15), Guess(240)]);
        assert!(cached.id.is_some());
    }

    #[tokio::test]
    async fn failed_persist_leaves_cache_alone() {
        let store = store_with_puzzles(&["p1"]).await;
        let base = store.load_or_create("u1", "p1").await.unwrap().game_state;
        store.remote().fail_with("offline");

        let err = store.persist(base.with_guesses(&[Guess(15)])).await.unwrap_err();
        assert_eq!(err, StoreError::RemoteIo("offline".into()));
        let cached = store.cached(&GameKey::new("u1", "p1")).await.unwrap();
        assert!(cached.guesses.is_empty());
    }

    #[tokio::test]
    async fn bulk_load_uses_cache_until_forced() {
        let store = store_with_puzzles(&["p1", "p2"]).await;
        for puzzle in ["p1", "p2"] {
            let loaded = store.load_or_create("u1", puzzle).await.unwrap();
            store.persist(loaded.game_state).await.unwrap();
        }

        let listed = store.load_all_for_user("u1", false).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(store.remote().lists.load(Ordering::SeqCst), 0);

        let listed = store.load_all_for_user("u1", true).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(store.remote().lists.load(Ordering::SeqCst), 1);

        // puzzles were dropped by the forced load and are fetched again lazily
        store.load_or_create("u1", "p1").await.unwrap();
        assert_eq!(store.remote().puzzle_fetches.load(Ordering::SeqCst), 3);
        assert_eq!(store.remote().state_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bulk_load_fetches_when_cache_is_empty() {
        let store = store_with_puzzles(&["p1"]).await;
        store
            .remote()
            .inner
            .upsert_game_state(&GameStateRecord::new_for("u1", &sample_puzzle("p1")))
            .await
            .unwrap();

        let listed = store.load_all_for_user("u1", false).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(store.remote().lists.load(Ordering::SeqCst), 1);
        assert!(store.cached(&GameKey::new("u1", "p1")).await.is_some());
    }
}
