//! Guardrail Core - Llama Guard classification and moderation logic.
//!
//! This crate provides the core functionality for the Guardrail moderation
//! service:
//!
//! - [`classifier`]: hazard category catalog, verdict parsing, and the Llama
//!   Guard ONNX classifier (behind the `ml` feature)
//! - [`engine`]: the moderation engine and its load-once slot
//! - [`moderation`]: the request-level moderation service
//! - [`model_downloader`]: fetching model artifacts and ONNX Runtime

pub mod classifier;
pub mod engine;
pub mod model_downloader;
pub mod moderation;

pub use classifier::{
    describe, CategoryCode, CategoryDetail, GuardError, SafetyClassifier, Verdict,
};
pub use engine::{EngineError, EngineSlot, ModerationEngine};
pub use model_downloader::{DownloadError, ModelDownloader, ModelSource};
pub use moderation::{ModerationResult, ModerationService, ModerationStatus, ServiceConfig};
