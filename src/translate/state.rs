//! Per-request translation state.

use crate::models::normalize_model_label;

/// Lifecycle phase of one translation.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum Phase {
    /// Nothing emitted yet.
    #[default]
    Idle,
    /// At least one content frame emitted.
    Streaming,
    /// Terminal: ended normally.
    Completed,
    /// Terminal: ended with an error.
    Failed,
}

/// Mutable state owned by exactly one translator.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TranslationState {
    phase: Phase,
    role_emitted: bool,
    emitted_text: bool,
    model: &'static str,
    tool_index: u32,
}

impl TranslationState {
    /// Fresh state labelled with the requested model.
    #[must_use]
    pub fn new(requested_model: Option<&str>) -> Self {
        Self {
            phase: Phase::Idle,
            role_emitted: false,
            emitted_text: false,
            model: normalize_model_label(requested_model),
            tool_index: 0,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a terminal phase was reached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Completed | Phase::Failed)
    }

    /// Public model label for outgoing frames.
    #[must_use]
    pub fn model(&self) -> &'static str {
        self.model
    }

    /// Whether any text frame was emitted.
    #[must_use]
    pub fn emitted_text(&self) -> bool {
        self.emitted_text
    }

    /// Number of tool-use blocks observed (and discarded).
    #[must_use]
    pub fn tool_blocks(&self) -> u32 {
        self.tool_index
    }

    /// Record the model reported by the agent.
    pub fn observe_model(&mut self, model: &str) {
        self.model = normalize_model_label(Some(model));
    }

    /// Record a text frame; returns `true` if it must carry the role marker.
    pub fn record_text(&mut self) -> bool {
        self.emitted_text = true;
        self.phase = Phase::Streaming;
        self.take_role()
    }

    /// Consume the role marker; `true` only the first time.
    fn take_role(&mut self) -> bool {
        !std::mem::replace(&mut self.role_emitted, true)
    }

    /// Count a tool-use block.
    pub fn record_tool_block(&mut self) {
        self.tool_index = self.tool_index.saturating_add(1);
    }

    /// Enter [`Phase::Completed`].
    pub fn complete(&mut self) {
        self.phase = Phase::Completed;
    }

    /// Enter [`Phase::Failed`].
    pub fn fail(&mut self) {
        self.phase = Phase::Failed;
    }
}
