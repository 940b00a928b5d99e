use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use game_core::{GameStateRecord, Puzzle};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct RemoteError(pub String);

/// Document store holding puzzles and per-user game states.
pub trait RemoteStore: Send + Sync + 'static {
    fn fetch_puzzle(
        &self,
        puzzle_id: &str,
    ) -> impl Future<Output = Result<Option<Puzzle>, RemoteError>> + Send;

    fn fetch_game_state(
        &self,
        user_id: &str,
        puzzle_id: &str,
    ) -> impl Future<Output = Result<Option<GameStateRecord>, RemoteError>> + Send;

    /// Inserts or updates the record for its `(user_id, puzzle_id)` and
    /// returns the stored id.
    fn upsert_game_state(
        &self,
        record: &GameStateRecord,
    ) -> impl Future<Output = Result<String, RemoteError>> + Send;

    fn list_game_states_for_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<GameStateRecord>, RemoteError>> + Send;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct RemoteData {
    puzzles: HashMap<String, Puzzle>,
    game_states: HashMap<String, GameStateRecord>,
}

/// In-process [`RemoteStore`], optionally snapshotted to a JSON file.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    data: Arc<RwLock<RemoteData>>,
    persist_path: Option<PathBuf>,
}

impl MemoryRemote {
    pub async fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut remote = Self::default();
        remote.persist_path = Some(path.clone());
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<RemoteData>(&bytes) {
                Ok(saved) => *remote.data.write().await = saved,
                Err(err) => warn!(path = %path.display(), "ignoring unreadable snapshot: {err}"),
            },
            Err(err) => debug!(path = %path.display(), "no snapshot loaded: {err}"),
        }
        remote
    }

    pub async fn insert_puzzle(&self, puzzle: Puzzle) {
        self.data
            .write()
            .await
            .puzzles
            .insert(puzzle.id().to_string(), puzzle);
        self.persist().await;
    }

    pub async fn game_state_count(&self) -> usize {
        self.data.read().await.game_states.len()
    }

    async fn persist(&self) {
        if let Some(path) = &self.persist_path {
            let snapshot = {
                let data = self.data.read().await;
                data.clone()
            };
            match serde_json::to_vec_pretty(&snapshot) {
                Ok(json) => {
                    if let Err(err) = tokio::fs::write(path, json).await {
                        warn!(path = %path.display(), "persist error: {err}");
                    }
                }
                Err(err) => warn!("snapshot encode error: {err}"),
            }
        }
    }
}

impl RemoteStore for MemoryRemote {
    async fn fetch_puzzle(&self, puzzle_id: &str) -> Result<Option<Puzzle>, RemoteError> {
        Ok(self.data.read().await.puzzles.get(puzzle_id).cloned())
    }

    async fn fetch_game_state(
        &self,
        user_id: &str,
        puzzle_id: &str,
    ) -> Result<Option<GameStateRecord>, RemoteError> {
        let data = self.data.read().await;
        Ok(data
            .game_states
            .values()
            .find(|r| r.key() == (user_id, puzzle_id))
            .cloned())
    }

    async fn upsert_game_state(&self, record: &GameStateRecord) -> Result<String, RemoteError> {
        let id = {
            let mut data = self.data.write().await;
            let existing = data
                .game_states
                .iter_mut()
                .find(|(_, r)| r.key() == record.key());

            match existing {
                Some((id, stored)) => {
                    // a slower writer carrying an older ledger must not win
                    let guesses = if stored.guesses.len() > record.guesses.len() {
                        stored.guesses.clone()
                    } else {
                        record.guesses.clone()
                    };
                    *stored = GameStateRecord {
                        id: Some(id.clone()),
                        guesses,
                        ..record.clone()
                    };
                    id.clone()
                }
                None => {
                    let id = record
                        .id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string());
                    data.game_states.insert(
                        id.clone(),
                        GameStateRecord {
                            id: Some(id.clone()),
                            ..record.clone()
                        },
                    );
                    id
                }
            }
        };
        self.persist().await;
        Ok(id)
    }

    async fn list_game_states_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<GameStateRecord>, RemoteError> {
        let data = self.data.read().await;
        let mut records: Vec<GameStateRecord> = data
            .game_states
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.puzzle_id.cmp(&b.puzzle_id));
        Ok(records)
    }
}
