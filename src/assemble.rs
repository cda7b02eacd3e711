//! Deterministic prompt assembly: story state plus trimmed history in,
//! model-ready message list out.

use crate::ai::ChatMessage;
use crate::db::{LoreEntry, Story, StoryMessage};

/// Narrative voice of a turn. Anything unrecognized collapses to `Story`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Do,
    Say,
    Story,
    Continue,
}

impl Mode {
    pub fn normalize(value: Option<&str>) -> Self {
        match value.unwrap_or("").trim().to_lowercase().as_str() {
            "do" => Mode::Do,
            "say" => Mode::Say,
            "continue" => Mode::Continue,
            _ => Mode::Story,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Do => "do",
            Mode::Say => "say",
            Mode::Story => "story",
            Mode::Continue => "continue",
        }
    }
}

/// Lore tag marking the player character; the model already speaks as the
/// player's narrator, so re-injecting them as lore is pure noise.
const PLAYER_TAG: &str = "player";

/// The player-visible phrasing of an input, also used when folding the
/// turn into the summary. Continuation turns render empty (no echo).
pub fn format_user_visible(mode: Mode, text: &str) -> String {
    let text = text.trim();
    match mode {
        Mode::Continue => String::new(),
        Mode::Say if !text.is_empty() => format!("You say: \"{text}\""),
        Mode::Do if !text.is_empty() => format!("You do: {text}"),
        Mode::Say | Mode::Do => String::new(),
        Mode::Story => text.to_string(),
    }
}

/// The explicit directive tag the model receives every turn.
pub fn format_input_block(mode: Mode, text: &str) -> String {
    format!("MODE: {}\nTEXT: {}", mode.as_str().to_uppercase(), text.trim())
}

fn format_lore(entries: &[&LoreEntry]) -> String {
    let mut lines = Vec::new();
    for entry in entries {
        let title = entry.title.trim();
        let tag = entry.tag.trim();
        let triggers = entry.triggers.trim();
        let description = entry.description.trim();
        let header: Vec<&str> = [tag, title].into_iter().filter(|p| !p.is_empty()).collect();
        if header.is_empty() {
            lines.push("* Lore Entry".to_string());
        } else {
            lines.push(format!("* {}", header.join(" - ")));
        }
        if !triggers.is_empty() {
            lines.push(format!("  Triggers: {triggers}"));
        }
        if !description.is_empty() {
            lines.push(format!("  {description}"));
        }
    }
    lines.join("\n")
}

/// Drop the player-character entry and entries already covered verbatim
/// by Plot Essentials (by title or any trigger token).
fn filter_lore<'a>(entries: &'a [LoreEntry], plot_essentials: &str) -> Vec<&'a LoreEntry> {
    let essentials = plot_essentials.to_lowercase();
    entries
        .iter()
        .filter(|e| !e.tag.trim().eq_ignore_ascii_case(PLAYER_TAG))
        .filter(|e| {
            if essentials.is_empty() {
                return true;
            }
            let title = e.title.trim().to_lowercase();
            if !title.is_empty() && essentials.contains(&title) {
                return false;
            }
            !e.triggers
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .any(|t| essentials.contains(&t))
        })
        .collect()
}

/// Render the structured story state into the single system message.
/// Only non-empty sections appear, in fixed order.
pub fn render_system_prompt(
    story: &Story,
    summary: &str,
    lore_entries: &[LoreEntry],
) -> String {
    let mut sections = Vec::new();

    let instructions = story.ai_instructions.trim();
    if !instructions.is_empty() {
        sections.push(format!("[AI INSTRUCTIONS]\n{instructions}"));
    }
    let summary = summary.trim();
    if !summary.is_empty() {
        sections.push(format!("[PLOT SUMMARY]\n{summary}"));
    }
    let essentials = story.plot_essentials.trim();
    if !essentials.is_empty() {
        sections.push(format!("[PLOT ESSENTIALS]\n{essentials}"));
    }
    let filtered = filter_lore(lore_entries, &story.plot_essentials);
    let lore_block = format_lore(&filtered);
    if !lore_block.is_empty() {
        sections.push(format!("[LORE]\n{lore_block}"));
    }
    let note = story.author_note.trim();
    if !note.is_empty() {
        sections.push(format!("[AUTHOR NOTE]\n{note}"));
    }

    sections.join("\n\n")
}

/// History pairs: one user message plus its following assistant message.
/// Assistant messages with empty text are dropped (in-flight or failed
/// turns), but their user half still counts as a pair.
fn trim_history(history: &[StoryMessage], pairs: usize) -> Vec<&StoryMessage> {
    if pairs == 0 {
        return Vec::new();
    }
    let mut grouped: Vec<Vec<&StoryMessage>> = Vec::new();
    for msg in history {
        if msg.role == "user" {
            grouped.push(vec![msg]);
        } else if let Some(last) = grouped.last_mut() {
            last.push(msg);
        } else {
            // history starting with an assistant message (imported stories)
            grouped.push(vec![msg]);
        }
    }
    let skip = grouped.len().saturating_sub(pairs);
    grouped
        .into_iter()
        .skip(skip)
        .flatten()
        .filter(|m| m.role != "assistant" || !m.text.trim().is_empty())
        .collect()
}

/// Build the full model-ready message sequence for one turn.
pub fn build_chat_messages(
    story: Option<&Story>,
    summary: &str,
    history: &[StoryMessage],
    lore_entries: &[LoreEntry],
    input_text: &str,
    mode: Mode,
    recent_pairs: usize,
    overlap_pairs: usize,
) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    if let Some(story) = story {
        let system = render_system_prompt(story, summary, lore_entries);
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        for msg in trim_history(history, recent_pairs + overlap_pairs) {
            if msg.role == "user" {
                let mode = Mode::normalize(msg.mode.as_deref());
                let rendered = format_user_visible(mode, &msg.text);
                if !rendered.is_empty() {
                    messages.push(ChatMessage::user(rendered));
                }
            } else {
                messages.push(ChatMessage::assistant(msg.text.trim()));
            }
        }
    }

    messages.push(ChatMessage::user(format_input_block(mode, input_text)));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_modes() {
        assert_eq!(Mode::normalize(Some("say")), Mode::Say);
        assert_eq!(Mode::normalize(Some(" DO ")), Mode::Do);
        assert_eq!(Mode::normalize(Some("continue")), Mode::Continue);
        assert_eq!(Mode::normalize(Some("poem")), Mode::Story);
        assert_eq!(Mode::normalize(None), Mode::Story);
    }

    #[test]
    fn user_visible_formatting() {
        assert_eq!(format_user_visible(Mode::Say, "hello"), "You say: \"hello\"");
        assert_eq!(format_user_visible(Mode::Do, "open the door"), "You do: open the door");
        assert_eq!(format_user_visible(Mode::Continue, "anything"), "");
        assert_eq!(format_user_visible(Mode::Story, "the rain falls"), "the rain falls");
        assert_eq!(format_user_visible(Mode::Say, "  "), "");
    }

    #[test]
    fn input_block_uppercases_mode() {
        assert_eq!(
            format_input_block(Mode::Story, "look around"),
            "MODE: STORY\nTEXT: look around"
        );
        assert_eq!(format_input_block(Mode::Continue, ""), "MODE: CONTINUE\nTEXT: ");
    }
}
