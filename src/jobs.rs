//! Bounded background worker pool for story-level side work: lore
//! re-embedding and lore-suggestion extraction.
//!
//! Workers are decoupled from the request lifecycle — they only read
//! story/lore state and only write lore vectors and suggestions, so they
//! cannot corrupt an in-flight foreground commit. Failures are logged,
//! never surfaced.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::ai::{AiConfig, Embedder};
use crate::{db_call, suggest, SharedDB};

const DEFAULT_WORKERS: usize = 2;
const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum Job {
    /// Recompute one lore entry's vector after a content change.
    EmbedLore { lore_id: String },
    /// Mine a committed turn for candidate lore facts.
    SuggestLore { story_id: String, user_input: String, assistant_text: String },
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn start(db: SharedDB, ai: Option<AiConfig>) -> Self {
        Self::start_with(db, ai, DEFAULT_WORKERS, DEFAULT_CAPACITY)
    }

    pub fn start_with(
        db: SharedDB,
        ai: Option<AiConfig>,
        workers: usize,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..workers.max(1) {
            let db = db.clone();
            let ai = ai.clone();
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { return };
                    let label = match &job {
                        Job::EmbedLore { lore_id } => format!("embed:{lore_id}"),
                        Job::SuggestLore { story_id, .. } => format!("suggest:{story_id}"),
                    };
                    debug!(worker, %label, "background job");
                    run_job(&db, ai.as_ref(), job).await;
                }
            });
        }
        Self { tx }
    }

    /// Fire-and-forget: never blocks the caller. A full queue drops the
    /// job with a warning — both job kinds are recomputable.
    pub fn enqueue(&self, job: Job) {
        if let Err(e) = self.tx.try_send(job) {
            warn!(error = %e, "background queue full, dropping job");
        }
    }
}

async fn run_job(db: &SharedDB, ai: Option<&AiConfig>, job: Job) {
    match job {
        Job::EmbedLore { lore_id } => embed_lore(db, ai, &lore_id).await,
        Job::SuggestLore { story_id, user_input, assistant_text } => {
            let Some(cfg) = ai else {
                debug!(story_id, "suggestion job skipped: model backend not configured");
                return;
            };
            suggest::run(db, cfg, &cfg.chat_model, &story_id, &user_input, &assistant_text)
                .await;
        }
    }
}

/// The text a lore entry is embedded under: non-empty fields, one per line.
pub fn build_lore_text(title: &str, tag: &str, triggers: &str, description: &str) -> String {
    [title, tag, triggers, description]
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

async fn embed_lore(db: &SharedDB, ai: Option<&AiConfig>, lore_id: &str) {
    let id = lore_id.to_string();
    let entry = match db_call(db, move |db| db.find_lore_by_id(&id)).await {
        Ok(Ok(Some(entry))) => entry,
        Ok(Ok(None)) => {
            // deleted while queued — nothing to embed
            debug!(lore_id, "embed job skipped: entry gone");
            return;
        }
        Ok(Err(e)) | Err(e) => {
            warn!(error = %e, lore_id, "embed job failed to load entry");
            return;
        }
    };

    let content = build_lore_text(&entry.title, &entry.tag, &entry.triggers, &entry.description);
    let embedding = match ai {
        Some(cfg) => cfg.embed(&content).await,
        None => None,
    };
    if embedding.is_none() {
        debug!(lore_id, "no embedding available, storing null vector");
    }

    let (id, sid) = (entry.id.clone(), entry.story_id.clone());
    let result = db_call(db, move |db| {
        db.upsert_lore_vector(&id, &sid, &content, embedding.as_deref())
    })
    .await;
    if let Ok(Err(e)) | Err(e) = result {
        warn!(error = %e, lore_id, "embed job failed to store vector");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lore_text_skips_empty_parts() {
        assert_eq!(
            build_lore_text("Gareth", "Character", "", "A wandering knight."),
            "Gareth\nCharacter\nA wandering knight."
        );
        assert_eq!(build_lore_text("", "", "", ""), "");
    }
}
