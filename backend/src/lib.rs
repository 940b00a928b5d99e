pub mod config;
pub mod remote;
pub mod runtime;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use game_core::{
    GameError, GameEvent, GameSession, GameStateRecord, Guess, GuessOutcome, Puzzle, Rules,
    SessionView,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::remote::{MemoryRemote, RemoteStore};
use crate::runtime::SessionHandle;
use crate::store::{GameStateStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    remote: MemoryRemote,
    store: Arc<GameStateStore<MemoryRemote>>,
    rules: Rules,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(MemoryRemote::default(), Rules::default())
    }
}

impl AppState {
    pub fn new(remote: MemoryRemote, rules: Rules) -> Self {
        Self {
            store: Arc::new(GameStateStore::new(remote.clone())),
            remote,
            rules,
        }
    }

    pub async fn from_config(config: &Config) -> Self {
        let remote = match &config.persist_path {
            Some(path) => MemoryRemote::with_persistence(path.clone()).await,
            None => MemoryRemote::default(),
        };
        if let Some(path) = &config.puzzles_path {
            match tokio::fs::read(path).await {
                Ok(bytes) => match serde_json::from_slice::<Vec<Puzzle>>(&bytes) {
                    Ok(puzzles) => {
                        info!(count = puzzles.len(), path = %path.display(), "seeding puzzles");
                        for puzzle in puzzles {
                            remote.insert_puzzle(puzzle).await;
                        }
                    }
                    Err(err) => warn!(path = %path.display(), "invalid puzzle file: {err}"),
                },
                Err(err) => warn!(path = %path.display(), "cannot read puzzle file: {err}"),
            }
        }
        Self::new(remote, config.rules())
    }

    pub fn remote(&self) -> &MemoryRemote {
        &self.remote
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/puzzles/:puzzle_id", get(get_puzzle))
        .route("/game-states", put(upsert_game_state))
        .route("/game-states/:user_id/:puzzle_id", get(get_game_state))
        .route("/users/:user_id/game-states", get(list_game_states))
        .route("/play/:user_id/:puzzle_id", get(get_play))
        .route("/play/:user_id/:puzzle_id/guess", post(post_guess))
        .route("/ws/:user_id/:puzzle_id", get(ws_handler))
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Game(#[from] GameError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Store(StoreError::PuzzleNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::RemoteIo(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Game(GameError::WrongPhase | GameError::Busy) => StatusCode::CONFLICT,
            ApiError::Game(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

async fn get_puzzle(
    State(state): State<AppState>,
    Path(puzzle_id): Path<String>,
) -> Result<Response, ApiError> {
    match state
        .remote
        .fetch_puzzle(&puzzle_id)
        .await
        .map_err(StoreError::from)?
    {
        Some(puzzle) => Ok((StatusCode::OK, Json(puzzle)).into_response()),
        None => Err(StoreError::PuzzleNotFound(puzzle_id).into()),
    }
}

async fn get_game_state(
    State(state): State<AppState>,
    Path((user_id, puzzle_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let record = state
        .remote
        .fetch_game_state(&user_id, &puzzle_id)
        .await
        .map_err(StoreError::from)?;
    Ok(match record {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => (StatusCode::NOT_FOUND, "game state not found").into_response(),
    })
}

/// `guesses` is the stored sequence, which is never shorter than before.
#[derive(Serialize)]
struct UpsertResponse {
    id: String,
    guesses: Vec<Guess>,
}

async fn upsert_game_state(
    State(state): State<AppState>,
    Json(record): Json<GameStateRecord>,
) -> Result<Response, ApiError> {
    let saved = state.store.persist(record).await?;
    Ok((
        StatusCode::OK,
        Json(UpsertResponse {
            id: saved.id.unwrap_or_default(),
            guesses: saved.guesses,
        }),
    )
        .into_response())
}

#[derive(Deserialize)]
struct ListParams {
    force: Option<bool>,
}

async fn list_game_states(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let records = state
        .store
        .load_all_for_user(&user_id, params.force.unwrap_or(false))
        .await?;
    Ok((StatusCode::OK, Json(records)).into_response())
}

#[derive(Deserialize)]
struct PlayParams {
    seed: Option<u64>,
}

async fn get_play(
    State(state): State<AppState>,
    Path((user_id, puzzle_id)): Path<(String, String)>,
    Query(params): Query<PlayParams>,
) -> Result<Response, ApiError> {
    let loaded = state.store.load_or_create(&user_id, &puzzle_id).await?;
    let mut session = GameSession::resume(loaded.puzzle, &loaded.game_state.guesses, state.rules);
    let mut rng = params
        .seed
        .map(ChaCha8Rng::seed_from_u64)
        .unwrap_or_else(ChaCha8Rng::from_entropy);
    session.shuffle_with(&mut rng);
    Ok((StatusCode::OK, Json(session.view())).into_response())
}

#[derive(Deserialize)]
struct GuessRequest {
    words: Vec<String>,
}

#[derive(Serialize)]
struct GuessResponse {
    outcome: GuessOutcome,
    events: Vec<GameEvent>,
    view: SessionView,
}

/// Plays one guess against the stored ledger and settles it immediately.
async fn post_guess(
    State(state): State<AppState>,
    Path((user_id, puzzle_id)): Path<(String, String)>,
    Json(payload): Json<GuessRequest>,
) -> Result<Response, ApiError> {
    let loaded = state.store.load_or_create(&user_id, &puzzle_id).await?;
    let mut session = GameSession::resume(loaded.puzzle, &loaded.game_state.guesses, state.rules);

    for word in &payload.words {
        session.toggle_word(word)?;
    }
    let submission = session.submit()?;
    let mut events = submission.events;
    events.extend(session.fast_forward());

    if session.guesses().len() > loaded.game_state.guesses.len() {
        state
            .store
            .persist(loaded.game_state.with_guesses(session.guesses()))
            .await?;
    }

    Ok((
        StatusCode::OK,
        Json(GuessResponse {
            outcome: submission.outcome,
            events,
            view: session.view(),
        }),
    )
        .into_response())
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    State(SessionView),
    Event { event: GameEvent },
    Outcome { outcome: GuessOutcome },
    Error { message: String },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Toggle { word: String },
    DeselectAll,
    Shuffle,
    Submit,
    /// Saves any progress a failed persist left behind.
    Retry,
}

type Sender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((user_id, puzzle_id)): Path<(String, String)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, puzzle_id))
}

async fn send_message(sender: &Sender, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(text) => sender.lock().await.send(Message::Text(text)).await.is_ok(),
        Err(err) => {
            warn!("cannot encode message: {err}");
            true
        }
    }
}

/// One live session per connection; closing the socket ends the session.
async fn handle_socket(stream: WebSocket, state: AppState, user_id: String, puzzle_id: String) {
    let (sender, mut receiver) = stream.split();
    let sender: Sender = Arc::new(Mutex::new(sender));

    let handle = match SessionHandle::open(state.store.clone(), &user_id, &puzzle_id, state.rules)
        .await
    {
        Ok(handle) => Arc::new(handle),
        Err(err) => {
            send_message(
                &sender,
                &ServerMessage::Error {
                    message: err.to_string(),
                },
            )
            .await;
            return;
        }
    };

    send_message(&sender, &ServerMessage::State(handle.view().await)).await;

    // Forward session events, timed steps included
    let mut rx = handle.subscribe();
    let forward_sender = sender.clone();
    let forward_handle = handle.clone();
    let send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if !send_message(&forward_sender, &ServerMessage::Event { event }).await {
                break;
            }
            let view = forward_handle.view().await;
            if !send_message(&forward_sender, &ServerMessage::State(view)).await {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let reply = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Toggle { word }) => handle.toggle_word(&word).await.err(),
            Ok(ClientMessage::DeselectAll) => {
                handle.deselect_all().await;
                None
            }
            Ok(ClientMessage::Shuffle) => {
                handle.shuffle().await;
                None
            }
            Ok(ClientMessage::Retry) => {
                handle.flush().await;
                None
            }
            Ok(ClientMessage::Submit) => match handle.submit().await {
                Ok(submission) => {
                    send_message(
                        &sender,
                        &ServerMessage::Outcome {
                            outcome: submission.outcome,
                        },
                    )
                    .await;
                    None
                }
                Err(err) => Some(err),
            },
            Err(err) => {
                send_message(
                    &sender,
                    &ServerMessage::Error {
                        message: format!("bad message: {err}"),
                    },
                )
                .await;
                continue;
            }
        };

        let message = match reply {
            Some(err) => ServerMessage::Error {
                message: err.to_string(),
            },
            None => match handle.last_error().await {
                Some(message) => ServerMessage::Error { message },
                None => ServerMessage::State(handle.view().await),
            },
        };
        if !send_message(&sender, &message).await {
            break;
        }
    }

    handle.flush().await;
    handle.close().await;
    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use game_core::Phase;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    async fn json_body(res: axum::response::Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn test_app() -> (Router, AppState) {
        let state = AppState::default();
        state
            .remote()
            .insert_puzzle(remote::tests::sample_puzzle("p1"))
            .await;
        (app(state.clone()), state)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    async fn guess(app: &Router, words: &[&str]) -> serde_json::Value {
        let res = send(
            app,
            Method::POST,
            "/play/u1/p1/guess",
            Some(json!({ "words": words })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        json_body(res).await
    }

    #[tokio::test]
    async fn puzzle_lookup_and_not_found() {
        let (app, _) = test_app().await;
        let res = send(&app, Method::GET, "/puzzles/p1", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["wordsPerGroup"], 4);
        assert_eq!(body["categories"][1], "Colors");

        let res = send(&app, Method::GET, "/puzzles/unknown", None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let res = send(&app, Method::GET, "/play/u1/unknown", None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn play_scenario_over_http() {
        let (app, state) = test_app().await;

        let body = guess(&app, &["apple", "banana", "cherry", "date"]).await;
        assert_eq!(body["outcome"], json!({ "outcome": "correct", "category": 0 }));

        let body = guess(&app, &["red", "run", "hammer", "blue"]).await;
        assert_eq!(body["outcome"]["outcome"], "incorrect");
        assert_eq!(body["view"]["mistakes_remaining"], 3);

        let body = guess(&app, &["blue", "red", "hammer", "run"]).await;
        assert_eq!(body["outcome"]["outcome"], "duplicate");
        assert_eq!(body["view"]["mistakes_remaining"], 3);

        let stored = state
            .remote()
            .fetch_game_state("u1", "p1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.guesses.len(), 2);

        let res = send(&app, Method::GET, "/game-states/u1/p1", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["guesses"].as_array().unwrap().len(), 2);
        assert_eq!(body["creatorName"], "casey");
    }

    #[tokio::test]
    async fn invalid_guesses_are_rejected() {
        let (app, _) = test_app().await;
        let res = send(
            &app,
            Method::POST,
            "/play/u1/p1/guess",
            Some(json!({ "words": ["apple", "banana"] })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = send(
            &app,
            Method::POST,
            "/play/u1/p1/guess",
            Some(json!({ "words": ["apple", "banana", "cherry", "kiwi"] })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lost_game_rejects_more_guesses() {
        let (app, _) = test_app().await;
        for words in [
            ["apple", "red", "run", "hammer"],
            ["banana", "blue", "jump", "drill"],
            ["cherry", "green", "walk", "saw"],
            ["date", "yellow", "swim", "wrench"],
        ] {
            guess(&app, &words).await;
        }

        let res = send(&app, Method::GET, "/play/u1/p1?seed=1", None).await;
        let view: SessionView = serde_json::from_value(json_body(res).await).unwrap();
        assert_eq!(view.phase, Phase::Lost);
        assert!(view.solved.iter().all(|s| s.revealed));

        let res = send(
            &app,
            Method::POST,
            "/play/u1/p1/guess",
            Some(json!({ "words": ["apple", "banana", "cherry", "date"] })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn seeded_play_view_is_deterministic() {
        let (app, _) = test_app().await;
        let first = json_body(send(&app, Method::GET, "/play/u1/p1?seed=42", None).await).await;
        let second = json_body(send(&app, Method::GET, "/play/u1/p1?seed=42", None).await).await;
        assert_eq!(first["pool"], second["pool"]);
        assert_eq!(first["pool"].as_array().unwrap().len(), 16);
        assert_eq!(first["phase"], "playing");
    }

    #[tokio::test]
    async fn upsert_and_list_game_states() {
        let (app, state) = test_app().await;
        let record = GameStateRecord::new_for("u2", &remote::tests::sample_puzzle("p1"));

        let res = send(
            &app,
            Method::PUT,
            "/game-states",
            Some(serde_json::to_value(&record).unwrap()),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let id = json_body(res).await["id"].as_str().unwrap().to_string();

        let res = send(
            &app,
            Method::PUT,
            "/game-states",
            Some(serde_json::to_value(&record).unwrap()),
        )
        .await;
        assert_eq!(json_body(res).await["id"], id);
        assert_eq!(state.remote().game_state_count().await, 1);

        let res = send(&app, Method::GET, "/users/u2/game-states?force=true", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let listed = json_body(res).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["id"], id);

        let res = send(&app, Method::GET, "/game-states/u2/nope", None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upsert_reports_the_stored_guesses() {
        let (app, _) = test_app().await;
        let record = GameStateRecord::new_for("u3", &remote::tests::sample_puzzle("p1"));

        let longer = record.with_guesses(&[Guess(15), Guess(240)]);
        let res = send(
            &app,
            Method::PUT,
            "/game-states",
            Some(serde_json::to_value(&longer).unwrap()),
        )
        .await;
        assert_eq!(json_body(res).await["guesses"], json!([15, 240]));

        let shorter = record.with_guesses(&[Guess(15)]);
        let res = send(
            &app,
            Method::PUT,
            "/game-states",
            Some(serde_json::to_value(&shorter).unwrap()),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["guesses"], json!([15, 240]));
    }

    #[tokio::test]
    async fn from_config_seeds_puzzles_from_file() {
        let path =
            std::env::temp_dir().join(format!("groupings_puzzles_{}.json", uuid::Uuid::new_v4()));
        let puzzles = vec![remote::tests::sample_puzzle("seeded")];
        tokio::fs::write(&path, serde_json::to_vec(&puzzles).unwrap())
            .await
            .unwrap();

        let config = Config {
            puzzles_path: Some(path.clone()),
            ..Config::default()
        };
        let state = AppState::from_config(&config).await;
        assert!(state.remote().fetch_puzzle("seeded").await.unwrap().is_some());
        let _ = tokio::fs::remove_file(&path).await;
    }
}
