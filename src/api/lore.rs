//! Lore entry CRUD handlers. Every content change re-enqueues the
//! entry for embedding.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::db;
use crate::error::StoryError;
use crate::jobs::Job;
use crate::AppState;

use super::blocking;

pub(super) async fn list_lore(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<db::LoreEntry>>, StoryError> {
    let store = state.db.clone();
    let entries = blocking(move || -> Result<Vec<db::LoreEntry>, StoryError> {
        if store.get_story(&id)?.is_none() {
            return Err(StoryError::NotFound);
        }
        store.list_lore(&id)
    })
    .await??;
    Ok(Json(entries))
}

pub(super) async fn create_lore(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<db::LoreEntryInput>,
) -> Result<(StatusCode, Json<db::LoreEntry>), StoryError> {
    let store = state.db.clone();
    let entry = blocking(move || store.insert_lore(&id, input)).await??;
    state.jobs.enqueue(Job::EmbedLore { lore_id: entry.id.clone() });
    Ok((StatusCode::CREATED, Json(entry)))
}

pub(super) async fn update_lore(
    State(state): State<AppState>,
    Path((id, entry_id)): Path<(String, String)>,
    Json(input): Json<db::LoreEntryInput>,
) -> Result<Json<db::LoreEntry>, StoryError> {
    let store = state.db.clone();
    let entry = blocking(move || store.update_lore(&id, &entry_id, input))
        .await??
        .ok_or(StoryError::NotFound)?;
    state.jobs.enqueue(Job::EmbedLore { lore_id: entry.id.clone() });
    Ok(Json(entry))
}

pub(super) async fn delete_lore(
    State(state): State<AppState>,
    Path((id, entry_id)): Path<(String, String)>,
) -> Result<StatusCode, StoryError> {
    let store = state.db.clone();
    let deleted = blocking(move || store.delete_lore(&id, &entry_id)).await??;
    if !deleted {
        return Err(StoryError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}
