//! Thinking-budget resolution: keyword detection and token allocation.

use agor_core::{ModelConfig, ThinkingMode};
use regex::RegexBuilder;
use std::sync::LazyLock;

/// A detected thinking level and its token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingBudget {
    /// `think`: 4000 tokens.
    Think,
    /// `megathink`: 10000 tokens.
    Megathink,
    /// `ultrathink`: 31999 tokens.
    Ultrathink,
}

impl ThinkingBudget {
    /// The token budget for this level.
    #[must_use]
    pub const fn tokens(&self) -> u32 {
        match self {
            Self::Think => 4_000,
            Self::Megathink => 10_000,
            Self::Ultrathink => 31_999,
        }
    }
}

/// Phrase buckets, highest priority first. Within a bucket the first
/// matching phrase wins; across buckets the highest bucket with any
/// match wins.
const ULTRATHINK_PHRASES: &[&str] = &[
    "ultrathink",
    "think harder",
    "think very hard",
    "think super hard",
    "think really hard",
    "think intensely",
    "think longer",
];

const MEGATHINK_PHRASES: &[&str] = &[
    "think hard",
    "think deeply",
    "think more",
    "think a lot",
    "think about it",
];

const THINK_PHRASES: &[&str] = &["think"];

fn bucket_regex(phrases: &[&str]) -> regex::Regex {
    let alternation = phrases
        .iter()
        .map(|p| regex::escape(p).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
        .case_insensitive(true)
        .build()
        .expect("thinking bucket regex compiles")
}

static ULTRATHINK_RE: LazyLock<regex::Regex> = LazyLock::new(|| bucket_regex(ULTRATHINK_PHRASES));
static MEGATHINK_RE: LazyLock<regex::Regex> = LazyLock::new(|| bucket_regex(MEGATHINK_PHRASES));
static THINK_RE: LazyLock<regex::Regex> = LazyLock::new(|| bucket_regex(THINK_PHRASES));

/// Detect the thinking bucket in a prompt. Case-insensitive and
/// word-boundary-delimited: `thinking` and `rethink` do not trigger the
/// `think` bucket.
#[must_use]
pub fn detect_keywords(prompt: &str) -> Option<ThinkingBudget> {
    if ULTRATHINK_RE.is_match(prompt) {
        Some(ThinkingBudget::Ultrathink)
    } else if MEGATHINK_RE.is_match(prompt) {
        Some(ThinkingBudget::Megathink)
    } else if THINK_RE.is_match(prompt) {
        Some(ThinkingBudget::Think)
    } else {
        None
    }
}

/// Resolve the token budget for a prompt under a session's thinking
/// config.
///
/// - `off` → `None`, regardless of the prompt.
/// - `manual` → the configured tokens when positive, else `None`.
/// - `auto` → the matched bucket's tokens, `None` when nothing matches.
#[must_use]
pub fn resolve_thinking_budget(prompt: &str, config: &ModelConfig) -> Option<u32> {
    match config.thinking_mode {
        ThinkingMode::Off => None,
        ThinkingMode::Manual => config.manual_tokens.filter(|t| *t > 0),
        ThinkingMode::Auto => detect_keywords(prompt).map(|b| b.tokens()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto() -> ModelConfig {
        ModelConfig {
            model: None,
            thinking_mode: ThinkingMode::Auto,
            manual_tokens: None,
        }
    }

    #[test]
    fn token_table() {
        assert_eq!(ThinkingBudget::Think.tokens(), 4_000);
        assert_eq!(ThinkingBudget::Megathink.tokens(), 10_000);
        assert_eq!(ThinkingBudget::Ultrathink.tokens(), 31_999);
    }

    #[test]
    fn standalone_think_matches() {
        assert_eq!(detect_keywords("think about X"), Some(ThinkingBudget::Think));
        assert_eq!(
            resolve_thinking_budget("please think first", &auto()),
            Some(4_000)
        );
    }

    #[test]
    fn embedded_words_do_not_match() {
        assert_eq!(detect_keywords("I was thinking about it"), None);
        assert_eq!(detect_keywords("rethink the approach"), None);
        assert_eq!(detect_keywords("overthinking"), None);
    }

    #[test]
    fn case_insensitive_phrases() {
        assert_eq!(
            detect_keywords("THINK HARDER about this"),
            Some(ThinkingBudget::Ultrathink)
        );
        assert_eq!(
            detect_keywords("Think Hard please"),
            Some(ThinkingBudget::Megathink)
        );
    }

    #[test]
    fn highest_bucket_wins_on_multi_keyword_prompts() {
        assert_eq!(
            detect_keywords("think hard, then ultrathink"),
            Some(ThinkingBudget::Ultrathink)
        );
        assert_eq!(
            detect_keywords("think, and think deeply"),
            Some(ThinkingBudget::Megathink)
        );
    }

    #[test]
    fn megathink_phrases() {
        for phrase in ["think hard", "think deeply", "think more", "think a lot", "think about it"]
        {
            assert_eq!(
                detect_keywords(phrase),
                Some(ThinkingBudget::Megathink),
                "{phrase}"
            );
        }
    }

    #[test]
    fn ultrathink_phrases() {
        for phrase in [
            "ultrathink",
            "think harder",
            "think very hard",
            "think super hard",
            "think really hard",
            "think intensely",
            "think longer",
        ] {
            assert_eq!(
                detect_keywords(phrase),
                Some(ThinkingBudget::Ultrathink),
                "{phrase}"
            );
        }
    }

    #[test]
    fn off_mode_is_always_none() {
        let config = ModelConfig {
            model: None,
            thinking_mode: ThinkingMode::Off,
            manual_tokens: Some(9_999),
        };
        assert_eq!(resolve_thinking_budget("ultrathink", &config), None);
        assert_eq!(resolve_thinking_budget("", &config), None);
    }

    #[test]
    fn manual_mode_uses_configured_tokens() {
        let mut config = ModelConfig {
            model: None,
            thinking_mode: ThinkingMode::Manual,
            manual_tokens: Some(12_345),
        };
        assert_eq!(resolve_thinking_budget("no keywords", &config), Some(12_345));

        config.manual_tokens = Some(0);
        assert_eq!(resolve_thinking_budget("ultrathink", &config), None);

        config.manual_tokens = None;
        assert_eq!(resolve_thinking_budget("ultrathink", &config), None);
    }

    #[test]
    fn auto_without_keywords_is_none() {
        assert_eq!(resolve_thinking_budget("list files", &auto()), None);
    }
}
