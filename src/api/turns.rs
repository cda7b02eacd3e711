//! Turn endpoints: streaming (token stream) and buffered (`{result}`).
//!
//! A turn request either streams tokens that end normally or ends with a
//! visible inline error notice — it never hangs and never 5xxs on a
//! model hiccup. Only an unresolvable `story_id` is a hard failure, and
//! it surfaces before the first token.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::Response;
use axum::Json;
use futures::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::StoryError;
use crate::turn::TurnRequest;
use crate::AppState;

#[derive(Serialize)]
pub(super) struct TurnResult {
    result: String,
}

pub(super) async fn run_turn(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnResult>, StoryError> {
    let runner = state.turn_runner().ok_or(StoryError::AiNotConfigured)?;
    let ctx = runner.prepare(req).await?;
    let result = runner.run_buffered(ctx).await;
    Ok(Json(TurnResult { result }))
}

pub(super) async fn stream_turn(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Response, StoryError> {
    let runner = state.turn_runner().ok_or(StoryError::AiNotConfigured)?;
    let ctx = runner.prepare(req).await?;
    let rx = runner.stream(ctx);

    let stream = ReceiverStream::new(rx)
        .map(|token| Ok::<_, Infallible>(bytes::Bytes::from(token)));
    let response = Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(stream))
        .map_err(|e| StoryError::Internal(e.to_string()))?;
    Ok(response)
}
