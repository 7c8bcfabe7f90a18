//! Domain model module declarations.

pub mod chat;
pub mod selector;

pub use selector::{normalize_model_label, ModelSelector};
