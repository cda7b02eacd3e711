//! Human review of machine-proposed lore suggestions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::db;
use crate::error::StoryError;
use crate::jobs::Job;
use crate::AppState;

use super::blocking;

#[derive(Deserialize)]
pub(super) struct SuggestionFilter {
    status: Option<String>,
}

pub(super) async fn list_suggestions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(filter): Query<SuggestionFilter>,
) -> Result<Json<Vec<db::LoreSuggestion>>, StoryError> {
    let store = state.db.clone();
    let rows = blocking(move || -> Result<Vec<db::LoreSuggestion>, StoryError> {
        if store.get_story(&id)?.is_none() {
            return Err(StoryError::NotFound);
        }
        store.list_suggestions(&id, filter.status.as_deref())
    })
    .await??;
    Ok(Json(rows))
}

/// Accepting merges into the target entry (or creates one when the target
/// vanished) and re-enqueues embedding for whatever entry came out.
pub(super) async fn accept_suggestion(
    State(state): State<AppState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<db::LoreEntry>, StoryError> {
    let store = state.db.clone();
    let entry = blocking(move || store.accept_suggestion(&id, &sid)).await??;
    state.jobs.enqueue(Job::EmbedLore { lore_id: entry.id.clone() });
    Ok(Json(entry))
}

pub(super) async fn reject_suggestion(
    State(state): State<AppState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<StatusCode, StoryError> {
    let store = state.db.clone();
    blocking(move || store.reject_suggestion(&id, &sid)).await??;
    Ok(StatusCode::NO_CONTENT)
}
