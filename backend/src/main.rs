use backend::config::Config;
use backend::{app, telemetry, AppState};
use tracing::info;

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    telemetry::init(config.log_format);

    let state = AppState::from_config(&config).await;
    let app = app(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("bind");
    info!(addr = %config.bind_addr, "starting server");
    axum::serve(listener, app).await.expect("server error");
}
