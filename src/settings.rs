//! Generation tuning per narrative mode, plus turn-level knobs.

use crate::ai::ChatOptions;
use crate::assemble::Mode;

pub const DEFAULT_NUM_CTX: u32 = 8192;
const MIN_P: f64 = 0.05;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Shared stop sequence: keeps the model from echoing the directive tag
/// back into the narrative.
fn stop_sequences() -> Vec<String> {
    vec!["\nMODE:".into()]
}

/// Mode-tuned sampling. `do` runs tight (actions should resolve
/// predictably), `story` runs loose (free narration).
pub fn options_for(mode: Mode, num_ctx: u32) -> ChatOptions {
    let (temperature, top_p, top_k, repeat_penalty) = match mode {
        Mode::Say => (0.8, 0.9, 50, 1.08),
        Mode::Do => (0.72, 0.87, 40, 1.1),
        Mode::Story => (0.95, 0.94, 60, 1.05),
        Mode::Continue => (0.9, 0.93, 60, 1.06),
    };
    ChatOptions {
        temperature,
        top_p,
        top_k,
        repeat_penalty,
        num_ctx,
        min_p: MIN_P,
        stop: stop_sequences(),
    }
}

/// Low-temperature options for summarization and lore extraction.
pub fn utility_options(num_ctx: u32) -> ChatOptions {
    ChatOptions {
        temperature: 0.1,
        top_p: 0.9,
        top_k: 40,
        repeat_penalty: 1.05,
        num_ctx,
        min_p: MIN_P,
        stop: Vec::new(),
    }
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub summary_max_chars: usize,
    pub recent_pairs: usize,
    pub overlap_pairs: usize,
    pub lore_top_k: usize,
    pub num_ctx: u32,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            summary_max_chars: 4000,
            recent_pairs: 3,
            overlap_pairs: 0,
            lore_top_k: 8,
            num_ctx: DEFAULT_NUM_CTX,
        }
    }
}

impl TurnSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            summary_max_chars: env_parse("SUMMARY_MAX_CHARS", defaults.summary_max_chars),
            recent_pairs: env_parse("RECENT_PAIRS", defaults.recent_pairs),
            overlap_pairs: env_parse("OVERLAP_PAIRS", defaults.overlap_pairs),
            lore_top_k: env_parse("LORE_TOP_K", defaults.lore_top_k),
            num_ctx: env_parse("NUM_CTX", defaults.num_ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_options_differ() {
        let say = options_for(Mode::Say, DEFAULT_NUM_CTX);
        let do_ = options_for(Mode::Do, DEFAULT_NUM_CTX);
        let story = options_for(Mode::Story, DEFAULT_NUM_CTX);
        assert!(do_.temperature < say.temperature);
        assert!(say.temperature < story.temperature);
        assert_eq!(story.num_ctx, DEFAULT_NUM_CTX);
    }
}
