//! Content classification with Llama Guard.
//!
//! This module provides the hazard category catalog, the generative Llama
//! Guard classifier, and the parsing of its assessment into a [`Verdict`].

mod category;
mod error;
mod llama_guard;
mod sampling;
mod verdict;

pub use category::{describe, CategoryCode, CategoryDetail, UnknownCategory, UNKNOWN_CATEGORY};
pub use error::GuardError;
pub use llama_guard::{
    decode_tokens, format_prompt, LlamaGuardClassifier, LlamaGuardConfig, ModelConfig, TokenIds,
    DEFAULT_MODEL_ID,
};
pub use sampling::{argmax, Sampler};
pub use verdict::{Verdict, VerdictStatus};

/// Trait for safety classifiers backing the moderation engine.
///
/// Implementations must be safe to call from several request threads.
pub trait SafetyClassifier: Send + Sync {
    /// Classifies the given text.
    fn classify(&self, text: &str) -> Result<Verdict, GuardError>;

    /// Returns the name of this classifier for logging/debugging.
    fn name(&self) -> &'static str;
}
