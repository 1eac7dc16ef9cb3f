//! Application state for the API server.

use std::sync::Arc;

use guardrail_core::{ModerationEngine, ModerationService, ServiceConfig};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Moderation service backed by the loaded engine.
    pub service: Arc<ModerationService>,
}

impl AppState {
    /// Creates application state around an existing service.
    pub fn new(service: ModerationService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    /// Creates application state from an engine and service options.
    pub fn with_engine(engine: Arc<ModerationEngine>, config: ServiceConfig) -> Self {
        Self::new(ModerationService::with_config(engine, config))
    }
}
