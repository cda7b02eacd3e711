//! Turn orchestration: resolve input → retrieve lore → assemble prompt →
//! stream generation → commit summary/messages → schedule suggestion
//! extraction.
//!
//! Only `NotFound` escapes as a hard failure, and only before streaming
//! starts. Once tokens flow, every downstream failure degrades: a model
//! error ends the stream with an inline marker and skips the commit;
//! summarizer and suggestion failures never touch the response.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::ai::{bind, ChatClient, Embedder};
use crate::assemble::{build_chat_messages, format_user_visible, Mode};
use crate::db::{LoreEntry, Story, StoryMessage};
use crate::error::StoryError;
use crate::jobs::{Job, JobQueue};
use crate::settings::{options_for, TurnSettings};
use crate::summarize::{resolve_summary_prompt_key, summarize_turn};
use crate::{db_call, retrieve, EmbedCache, SharedDB};

/// Fed to the model when a continuation turn has no prior output to echo.
pub const DEFAULT_CONTINUE_DIRECTIVE: &str = "Continue the story.";

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TurnRequest {
    pub text: Option<String>,
    pub mode: Option<String>,
    pub story_id: Option<String>,
    /// Legacy alias for `text`, kept for old clients.
    pub trigger: Option<String>,
}

/// Everything one turn needs, resolved once and discarded after the
/// stream completes.
#[derive(Debug)]
pub struct TurnContext {
    pub text: String,
    pub mode: Mode,
    pub story: Option<Story>,
    pub summary: String,
    pub history: Vec<StoryMessage>,
    pub lore: Vec<LoreEntry>,
}

#[derive(Clone)]
pub struct TurnRunner {
    pub db: SharedDB,
    pub chat: Arc<dyn ChatClient>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub cache: EmbedCache,
    pub jobs: JobQueue,
    pub settings: TurnSettings,
    pub chat_model: String,
    pub summary_model: String,
}

fn first_non_empty(candidates: [Option<String>; 2]) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

impl TurnRunner {
    /// PREPARING: resolve input text and mode, load the story, retrieve
    /// lore. The only fallible step of a turn as seen by the caller.
    pub async fn prepare(&self, req: TurnRequest) -> Result<TurnContext, StoryError> {
        let mode = Mode::normalize(req.mode.as_deref());
        let mut text = first_non_empty([req.text, req.trigger]);

        let story_id = req.story_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let (story, summary, history) = match story_id {
            Some(story_id) => {
                let sid = story_id.to_string();
                let loaded = db_call(
                    &self.db,
                    move |db| -> Result<(Story, String, Vec<StoryMessage>), StoryError> {
                        let Some(story) = db.get_story(&sid)? else {
                            return Err(StoryError::NotFound);
                        };
                        let summary = db.plot_summary(&sid)?;
                        let history = db.list_messages(&sid)?;
                        Ok((story, summary, history))
                    },
                )
                .await??;
                (Some(loaded.0), loaded.1, loaded.2)
            }
            None => (None, String::new(), Vec::new()),
        };

        if text.is_empty() && mode == Mode::Continue {
            text = history
                .iter()
                .rev()
                .find(|m| m.role == "assistant" && !m.text.trim().is_empty())
                .map(|m| m.text.trim().to_string())
                .unwrap_or_else(|| DEFAULT_CONTINUE_DIRECTIVE.to_string());
        }

        let lore = match story {
            Some(ref story) => {
                // continuation should not re-inject potentially-irrelevant lore
                let query = if mode == Mode::Continue { "" } else { text.as_str() };
                retrieve::retrieve(
                    &self.db,
                    self.embedder.as_deref(),
                    &self.cache,
                    &story.id,
                    query,
                    self.settings.lore_top_k,
                )
                .await
            }
            None => Vec::new(),
        };

        Ok(TurnContext { text, mode, story, summary, history, lore })
    }

    /// STREAMING onward. Returns the token channel immediately; the
    /// driving task owns commit and suggestion scheduling.
    pub fn stream(&self, ctx: TurnContext) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel::<String>(32);
        let runner = self.clone();
        tokio::spawn(async move {
            runner.drive(ctx, tx).await;
        });
        rx
    }

    /// Convenience for the non-streaming endpoint: drain the stream into
    /// one string (error markers included).
    pub async fn run_buffered(&self, ctx: TurnContext) -> String {
        let mut rx = self.stream(ctx);
        let mut out = String::new();
        while let Some(token) = rx.recv().await {
            out.push_str(&token);
        }
        out
    }

    async fn drive(self, ctx: TurnContext, tx: mpsc::Sender<String>) {
        let start = Instant::now();
        let messages = build_chat_messages(
            ctx.story.as_ref(),
            &ctx.summary,
            &ctx.history,
            &ctx.lore,
            &ctx.text,
            ctx.mode,
            self.settings.recent_pairs,
            self.settings.overlap_pairs,
        );
        let options = options_for(ctx.mode, self.settings.num_ctx);
        let bound = bind(self.chat.as_ref(), &self.chat_model, options);

        let mut stream = match bound.stream(&messages).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "turn stream failed to start");
                let _ = tx.send(format!("\n[model error: {e}]")).await;
                return;
            }
        };

        // Token send failures mean the client went away; keep draining so
        // a fully-generated turn still commits.
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(token) => {
                    buffer.push_str(&token);
                    let _ = tx.send(token).await;
                }
                Err(e) => {
                    // ERRORED: the partial buffer is discarded, nothing commits
                    error!(error = %e, "turn stream failed mid-generation");
                    let _ = tx.send(format!("\n[model error: {e}]")).await;
                    return;
                }
            }
        }
        debug!(duration_ms = start.elapsed().as_millis() as u64, "turn stream completed");

        // COMMITTING: only with a resolved story and a clean stream.
        let Some(story) = ctx.story else {
            debug!("turn commit skipped: no story");
            return;
        };

        let summary_user = format_user_visible(ctx.mode, &ctx.text);
        let prompt_key = story
            .summary_prompt_key
            .clone()
            .unwrap_or_else(|| resolve_summary_prompt_key(&story.ai_instruction_key).to_string());
        let new_summary = summarize_turn(
            self.chat.as_ref(),
            &self.summary_model,
            &prompt_key,
            &ctx.summary,
            &summary_user,
            &buffer,
            self.settings.summary_max_chars,
        )
        .await;

        let sid = story.id.clone();
        let mode = ctx.mode;
        let user_text = ctx.text.clone();
        let assistant_text = buffer.clone();
        let committed = db_call(&self.db, move |db| {
            db.commit_turn(&sid, mode.as_str(), &user_text, &assistant_text, &new_summary)
        })
        .await;
        match committed {
            Ok(Ok((user_pos, assistant_pos))) => {
                debug!(story_id = %story.id, user_pos, assistant_pos, "turn committed");
            }
            Ok(Err(e)) | Err(e) => {
                warn!(error = %e, story_id = %story.id, "turn commit failed");
                return;
            }
        }

        // SUGGESTING: detached, after the commit so the job reads
        // up-to-date lore. May overlap the next incoming turn.
        if !ctx.text.trim().is_empty() || !buffer.trim().is_empty() {
            self.jobs.enqueue(Job::SuggestLore {
                story_id: story.id,
                user_input: ctx.text,
                assistant_text: buffer,
            });
        }
    }
}
