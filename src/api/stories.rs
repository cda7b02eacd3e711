//! Story CRUD handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::db;
use crate::error::StoryError;
use crate::jobs::Job;
use crate::AppState;

use super::blocking;

/// A story with its derived pieces inlined, the shape editors consume.
#[derive(Serialize)]
pub(super) struct StoryOut {
    #[serde(flatten)]
    story: db::Story,
    plot_summary: String,
    lore: Vec<db::LoreEntry>,
}

fn load_story_out(store: &db::StoryDB, id: &str) -> Result<StoryOut, StoryError> {
    let story = store.get_story(id)?.ok_or(StoryError::NotFound)?;
    let plot_summary = store.plot_summary(id)?;
    let lore = store.list_lore(id)?;
    Ok(StoryOut { story, plot_summary, lore })
}

pub(super) async fn list_stories(
    State(state): State<AppState>,
) -> Result<Json<Vec<db::Story>>, StoryError> {
    let store = state.db.clone();
    let stories = blocking(move || store.list_stories()).await??;
    Ok(Json(stories))
}

pub(super) async fn create_story(
    State(state): State<AppState>,
    Json(input): Json<db::StoryInput>,
) -> Result<(StatusCode, Json<StoryOut>), StoryError> {
    let store = state.db.clone();
    let out = blocking(move || -> Result<StoryOut, StoryError> {
        let story = store.insert_story(input)?;
        load_story_out(&store, &story.id)
    })
    .await??;

    for entry in &out.lore {
        state.jobs.enqueue(Job::EmbedLore { lore_id: entry.id.clone() });
    }
    Ok((StatusCode::CREATED, Json(out)))
}

pub(super) async fn get_story(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoryOut>, StoryError> {
    let store = state.db.clone();
    let out = blocking(move || load_story_out(&store, &id)).await??;
    Ok(Json(out))
}

pub(super) async fn update_story(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<db::StoryPatch>,
) -> Result<Json<StoryOut>, StoryError> {
    let store = state.db.clone();
    let (out, embed_ids) = blocking(move || -> Result<(StoryOut, Vec<String>), StoryError> {
        let Some((story, embed_ids)) = store.update_story(&id, patch)? else {
            return Err(StoryError::NotFound);
        };
        Ok((load_story_out(&store, &story.id)?, embed_ids))
    })
    .await??;

    for lore_id in embed_ids {
        state.jobs.enqueue(Job::EmbedLore { lore_id });
    }
    Ok(Json(out))
}

pub(super) async fn delete_story(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StoryError> {
    let store = state.db.clone();
    let deleted = blocking(move || store.delete_story(&id)).await??;
    if !deleted {
        return Err(StoryError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<db::StoryMessage>>, StoryError> {
    let store = state.db.clone();
    let messages = blocking(move || -> Result<Vec<db::StoryMessage>, StoryError> {
        if store.get_story(&id)?.is_none() {
            return Err(StoryError::NotFound);
        }
        store.list_messages(&id)
    })
    .await??;
    Ok(Json(messages))
}
