//! Moderation engine.
//!
//! Owns the loaded safety classifier and turns raw text into a [`Verdict`].
//! The model is expensive to load, so a process normally owns one
//! [`EngineSlot`], loads the engine through it at startup, and hands the
//! resulting `Arc` to whatever serves requests.

use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::classifier::{
    GuardError, LlamaGuardClassifier, LlamaGuardConfig, SafetyClassifier, Verdict,
};

/// Errors raised while constructing the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The classifier could not be loaded.
    #[error("failed to load classifier: {0}")]
    Load(#[from] GuardError),
}

/// Wraps a single classifier instance.
pub struct ModerationEngine {
    classifier: Box<dyn SafetyClassifier>,
}

impl ModerationEngine {
    /// Loads the Llama Guard classifier. Every call loads a fresh model;
    /// go through an [`EngineSlot`] to load it once.
    pub fn load(config: LlamaGuardConfig) -> Result<Self, EngineError> {
        let start = Instant::now();
        info!("Initializing Llama Guard model from {}", config.model_path);

        let classifier = LlamaGuardClassifier::new(config)?;

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model initialized successfully"
        );
        Ok(Self::with_classifier(classifier))
    }

    /// Creates an engine around an existing classifier.
    pub fn with_classifier(classifier: impl SafetyClassifier + 'static) -> Self {
        Self {
            classifier: Box::new(classifier),
        }
    }

    /// Classifies `text`. Failures come back as `Err`, never as a panic.
    pub fn classify(&self, text: &str) -> Result<Verdict, GuardError> {
        let start = Instant::now();
        let result = self.classifier.classify(text);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(verdict) => debug!(
                classifier = self.classifier.name(),
                status = ?verdict.status,
                categories = ?verdict.categories,
                elapsed_ms,
                "Classification complete"
            ),
            Err(e) => warn!(
                classifier = self.classifier.name(),
                elapsed_ms,
                "Error in content analysis: {}",
                e
            ),
        }

        result
    }

    /// Returns the name of the backing classifier.
    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }
}

/// Initialize-once holder for a [`ModerationEngine`].
///
/// Concurrent first callers block on a single load and all receive the same
/// `Arc`. Once an engine exists, later loaders are never run. A failed load
/// leaves the slot empty so a later call may retry.
#[derive(Default)]
pub struct EngineSlot {
    cell: OnceCell<Arc<ModerationEngine>>,
}

impl EngineSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the engine, loading the Llama Guard classifier on first use.
    pub fn get_or_load(
        &self,
        config: LlamaGuardConfig,
    ) -> Result<Arc<ModerationEngine>, EngineError> {
        self.get_or_init_with(|| ModerationEngine::load(config))
    }

    /// Returns the engine, running `init` only if the slot is empty.
    pub fn get_or_init_with(
        &self,
        init: impl FnOnce() -> Result<ModerationEngine, EngineError>,
    ) -> Result<Arc<ModerationEngine>, EngineError> {
        self.cell.get_or_try_init(|| init().map(Arc::new)).cloned()
    }
}
