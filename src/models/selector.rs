//! Model selection and public model-label normalization.
//!
//! The agent CLI accepts exactly three model tiers. Clients send arbitrary
//! model identifiers (`gpt-4o`, `claude-opus-4-20250514`,
//! `claude-code-cli/claude-haiku-4`, …); both the requested model and the
//! model reported back by the agent are reduced to a tier by substring
//! match, defaulting to the mid tier.

use serde::{Deserialize, Serialize};

/// Public label for the top tier.
pub const OPUS_LABEL: &str = "claude-opus-4";
/// Public label for the mid tier, also the fallback label.
pub const SONNET_LABEL: &str = "claude-sonnet-4";
/// Public label for the small tier.
pub const HAIKU_LABEL: &str = "claude-haiku-4";

/// Model tier passed to the agent CLI's `--model` flag.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelector {
    /// Largest tier.
    Opus,
    /// Mid tier. Used whenever a model identifier is not recognized.
    #[default]
    Sonnet,
    /// Smallest tier.
    Haiku,
}

impl ModelSelector {
    /// All selectors in tier order.
    pub const ALL: [Self; 3] = [Self::Opus, Self::Sonnet, Self::Haiku];

    /// Resolve any model identifier to a tier by case-insensitive substring match.
    #[must_use]
    pub fn resolve(requested: &str) -> Self {
        let lowered = requested.to_ascii_lowercase();
        if lowered.contains("opus") {
            Self::Opus
        } else if lowered.contains("haiku") {
            Self::Haiku
        } else {
            Self::Sonnet
        }
    }

    /// Value passed to the agent CLI.
    #[must_use]
    pub fn as_cli_arg(self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Sonnet => "sonnet",
            Self::Haiku => "haiku",
        }
    }

    /// Public model label reported to API clients.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Opus => OPUS_LABEL,
            Self::Sonnet => SONNET_LABEL,
            Self::Haiku => HAIKU_LABEL,
        }
    }
}

/// Map an optional model identifier to one of the three public labels.
///
/// Total and idempotent: `normalize_model_label(Some(normalize_model_label(x)))`
/// always equals `normalize_model_label(x)`.
#[must_use]
pub fn normalize_model_label(model: Option<&str>) -> &'static str {
    model.map_or(SONNET_LABEL, |m| ModelSelector::resolve(m).label())
}
