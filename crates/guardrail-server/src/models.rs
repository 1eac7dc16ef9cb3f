//! API request and response models.

use serde::{Deserialize, Serialize};

pub use guardrail_core::ModerationResult as ModerateResponse;

/// Request body for POST /api/moderate.
#[derive(Debug, Deserialize)]
pub struct ModerateRequest {
    /// The text to moderate. Empty strings are accepted.
    pub text: String,
}

/// Response body for GET /api/health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
