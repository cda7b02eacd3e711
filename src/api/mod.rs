use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::StoryError;
use crate::AppState;

mod lore;
mod stories;
mod suggestions;
mod turns;

use lore::*;
use stories::*;
use suggestions::*;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Run a blocking closure on the spawn_blocking pool and map JoinError.
async fn blocking<T, F>(f: F) -> Result<T, StoryError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoryError::Internal(e.to_string()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stories", get(list_stories).post(create_story))
        .route(
            "/stories/{id}",
            get(get_story).put(update_story).delete(delete_story),
        )
        .route("/stories/{id}/messages", get(list_messages))
        .route("/stories/{id}/lore", get(list_lore).post(create_lore))
        .route(
            "/stories/{id}/lore/{entry_id}",
            put(update_lore).delete(delete_lore),
        )
        .route("/stories/{id}/suggestions", get(list_suggestions))
        .route("/stories/{id}/suggestions/{sid}/accept", post(accept_suggestion))
        .route("/stories/{id}/suggestions/{sid}/reject", post(reject_suggestion))
        .route("/turn", post(turns::run_turn))
        .route("/turn/stream", post(turns::stream_turn))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (chat_model, embed_model) = match &state.ai {
        Some(cfg) => (Some(cfg.chat_model.clone()), Some(cfg.embed_model.clone())),
        None => (None, None),
    };
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "chat_model": chat_model,
        "embed_model": embed_model,
    }))
}
