//! Rolling plot summary: fold one turn into the running summary with
//! quality gates. Summarization failure never fails the turn — every
//! error path keeps the previous summary.

use tracing::{debug, warn};

use crate::ai::{bind, ChatClient, ChatMessage};
use crate::prompts;
use crate::settings::{utility_options, DEFAULT_NUM_CTX};
use crate::util::truncate_chars;

/// Minimum acceptable length for a replacement summary: anything shorter
/// than max(200, half the previous) is treated as model truncation.
const MIN_SUMMARY_FLOOR: usize = 200;

/// Map a story's instruction preset to its summarizer persona.
pub fn resolve_summary_prompt_key(ai_instruction_key: &str) -> &'static str {
    match ai_instruction_key {
        "neutral_storyteller" => "neutral_summarizer",
        "dark_storyteller" => "dark_summarizer",
        _ => "neutral_summarizer",
    }
}

fn accept_summary(previous: &str, candidate: &str, max_chars: usize) -> String {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        // no-op, not an error
        return previous.to_string();
    }
    let prev_trimmed = previous.trim();
    if !prev_trimmed.is_empty() {
        let min_len = MIN_SUMMARY_FLOOR.max(prev_trimmed.chars().count() / 2);
        if candidate.chars().count() < min_len {
            debug!(
                got = candidate.chars().count(),
                min = min_len,
                "summary shrank past the quality gate, keeping previous"
            );
            return previous.to_string();
        }
    }
    truncate_chars(candidate, max_chars)
}

/// Fold one turn into `previous`. Returns the summary to persist — the
/// previous one whenever the model output fails a gate or the call errors.
pub async fn summarize_turn(
    chat: &dyn ChatClient,
    model: &str,
    prompt_key: &str,
    previous: &str,
    user_input: &str,
    assistant_text: &str,
    max_chars: usize,
) -> String {
    let messages = [
        ChatMessage::system(prompts::summary_system(prompt_key)),
        ChatMessage::user(prompts::summary_user(previous.trim(), user_input, assistant_text)),
    ];
    let bound = bind(chat, model, utility_options(DEFAULT_NUM_CTX));
    match bound.invoke(&messages).await {
        Ok(candidate) => accept_summary(previous, &candidate, max_chars),
        Err(e) => {
            warn!(error = %e, "summary update failed, keeping previous");
            previous.to_string()
        }
    }
}
