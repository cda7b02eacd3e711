//! Lore suggestion engine: mine a finished turn for candidate lore facts,
//! reconcile them against existing titles, and persist confidence-gated,
//! de-duplicated suggestions for human review.
//!
//! Extraction failures are silent by design — a turn never degrades
//! because the miner hiccuped.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::ai::{bind, ChatClient, ChatMessage};
use crate::db::{LoreEntry, StoryDB, SuggestionInput};
use crate::error::StoryError;
use crate::prompts;
use crate::settings::{utility_options, DEFAULT_NUM_CTX};
use crate::util::{normalize_title, preview};
use crate::{db_call, SharedDB};

/// Suggestions below this confidence are discarded before persistence.
pub const MIN_CONFIDENCE: f64 = 0.6;

pub const KIND_NEW: &str = "NEW";
pub const KIND_UPDATE: &str = "UPDATE";

#[derive(Debug, Clone)]
pub struct Suggestion {
    pub kind: &'static str,
    pub title: String,
    pub tag: String,
    pub description: String,
    pub triggers: String,
    pub confidence: f64,
    pub target_lore_id: Option<String>,
}

/// Locate the first `[` and last `]` and parse that slice as a JSON
/// array. Anything else — no brackets, bad JSON, non-array — yields an
/// empty list, never an error.
pub fn parse_json_array(text: &str) -> Vec<serde_json::Value> {
    let Some(start) = text.find('[') else { return Vec::new() };
    let Some(end) = text.rfind(']') else { return Vec::new() };
    if end <= start {
        return Vec::new();
    }
    match serde_json::from_str::<serde_json::Value>(&text[start..=end]) {
        Ok(serde_json::Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn existing_title_map(entries: &[LoreEntry]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|e| (normalize_title(&e.title), e.id.clone()))
        .collect()
}

fn field_str(item: &serde_json::Value, key: &str) -> String {
    item.get(key).and_then(|v| v.as_str()).unwrap_or("").trim().to_string()
}

/// Turn raw model output into classified suggestions. Items matching an
/// existing title (normalized) become UPDATEs against that entry.
pub fn parse_suggestions(raw: &str, existing: &[LoreEntry]) -> Vec<Suggestion> {
    let title_map = existing_title_map(existing);
    let mut suggestions = Vec::new();
    for item in parse_json_array(raw) {
        if !item.is_object() {
            continue;
        }
        let title = field_str(&item, "title");
        if title.is_empty() {
            continue;
        }
        let tag = {
            let t = field_str(&item, "type");
            if t.is_empty() { "Character".to_string() } else { t }
        };
        let confidence = item.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let target_id = title_map.get(&normalize_title(&title)).cloned();
        let kind = if target_id.is_some() { KIND_UPDATE } else { KIND_NEW };
        suggestions.push(Suggestion {
            kind,
            title,
            tag,
            description: field_str(&item, "description"),
            triggers: field_str(&item, "triggers"),
            confidence,
            target_lore_id: target_id,
        });
    }
    suggestions
}

/// Ask the model for new/updated lore facts from one turn. Any model or
/// parse failure produces zero suggestions.
pub async fn extract_suggestions(
    chat: &dyn ChatClient,
    model: &str,
    existing: &[LoreEntry],
    user_input: &str,
    assistant_text: &str,
) -> Vec<Suggestion> {
    let mut titles: Vec<&str> = existing.iter().map(|e| e.title.as_str()).collect();
    titles.sort_unstable();
    let messages = [
        ChatMessage::system(prompts::LORE_EXTRACT_SYSTEM),
        ChatMessage::user(prompts::lore_extract_user(
            &titles.join(", "),
            user_input,
            assistant_text,
        )),
    ];
    let bound = bind(chat, model, utility_options(DEFAULT_NUM_CTX));
    match bound.invoke(&messages).await {
        Ok(raw) => {
            debug!(response = %preview(&raw, 200), "lore extraction response");
            parse_suggestions(&raw, existing)
        }
        Err(e) => {
            warn!(error = %e, "lore extraction failed");
            Vec::new()
        }
    }
}

/// Persist suggestions that clear the confidence gate, skipping any with
/// an identical pending (story, title, kind) row — idempotent against
/// duplicate extraction runs. Returns the number persisted.
pub fn save_suggestions(
    db: &StoryDB,
    story_id: &str,
    user_input: &str,
    assistant_text: &str,
    existing: &[LoreEntry],
    suggestions: &[Suggestion],
) -> Result<usize, StoryError> {
    let title_map = existing_title_map(existing);
    let mut created = 0;
    for suggestion in suggestions {
        if suggestion.confidence < MIN_CONFIDENCE {
            continue;
        }
        if db.pending_suggestion_exists(story_id, &suggestion.title, suggestion.kind)? {
            continue;
        }
        let target_id = suggestion
            .target_lore_id
            .clone()
            .or_else(|| title_map.get(&normalize_title(&suggestion.title)).cloned());
        db.insert_suggestion(SuggestionInput {
            story_id: story_id.to_string(),
            kind: suggestion.kind.to_string(),
            title: suggestion.title.clone(),
            tag: suggestion.tag.clone(),
            description: suggestion.description.clone(),
            triggers: suggestion.triggers.clone(),
            confidence: suggestion.confidence,
            target_lore_id: target_id,
            source_user: user_input.to_string(),
            source_assistant: assistant_text.to_string(),
        })?;
        created += 1;
    }
    Ok(created)
}

/// The full background job: load current lore, extract, persist.
pub async fn run(
    db: &SharedDB,
    chat: &dyn ChatClient,
    model: &str,
    story_id: &str,
    user_input: &str,
    assistant_text: &str,
) {
    if user_input.trim().is_empty() && assistant_text.trim().is_empty() {
        return;
    }
    let sid = story_id.to_string();
    let existing = match db_call(db, move |db| db.list_lore(&sid)).await {
        Ok(Ok(entries)) => entries,
        Ok(Err(e)) | Err(e) => {
            warn!(error = %e, story_id, "lore load for suggestions failed");
            return;
        }
    };

    let suggestions = extract_suggestions(chat, model, &existing, user_input, assistant_text).await;
    if suggestions.is_empty() {
        debug!(story_id, "no lore suggestions extracted");
        return;
    }

    let sid = story_id.to_string();
    let user = user_input.to_string();
    let assistant = assistant_text.to_string();
    let saved = db_call(db, move |db| {
        save_suggestions(db, &sid, &user, &assistant, &existing, &suggestions)
    })
    .await;
    match saved {
        Ok(Ok(count)) => debug!(story_id, count, "lore suggestions persisted"),
        Ok(Err(e)) | Err(e) => warn!(error = %e, story_id, "saving lore suggestions failed"),
    }
}

/// Append `addition` to `current` unless it is already contained there.
pub fn merge_description(current: &str, addition: &str) -> String {
    let current = current.trim();
    let addition = addition.trim();
    if addition.is_empty() {
        return current.to_string();
    }
    if current.is_empty() {
        return addition.to_string();
    }
    if current.contains(addition) {
        return current.to_string();
    }
    format!("{current}\n{addition}")
}

/// Comma-split both lists, trim, dedupe, and return the sorted union.
pub fn union_triggers(a: &str, b: &str) -> String {
    let mut tokens: Vec<String> = a
        .split(',')
        .chain(b.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens.join(", ")
}
