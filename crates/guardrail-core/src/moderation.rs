//! Moderation service.
//!
//! Runs one end-to-end moderation request: classify the text, attach the
//! catalog description of every violated category, and stamp the result.
//! Each call is independent of every other call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classifier::{describe, CategoryCode, CategoryDetail, VerdictStatus};
use crate::engine::ModerationEngine;

/// Placeholder confidence reported for safe results.
pub const MOCK_SAFE_CONFIDENCE: f32 = 0.92;

/// Placeholder confidence reported for unsafe results.
pub const MOCK_UNSAFE_CONFIDENCE: f32 = 0.85;

/// Outcome status of a moderation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Safe,
    Unsafe,
    Error,
}

impl From<VerdictStatus> for ModerationStatus {
    fn from(status: VerdictStatus) -> Self {
        match status {
            VerdictStatus::Safe => ModerationStatus::Safe,
            VerdictStatus::Unsafe => ModerationStatus::Unsafe,
        }
    }
}

/// Result of moderating one text.
///
/// `violated_categories` and `details` are present only for unsafe results;
/// `error` only for error results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationResult {
    pub input: String,
    pub status: ModerationStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violated_categories: Option<Vec<CategoryCode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<CategoryDetail>>,
    /// Mock value, not a computed estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModerationResult {
    /// A safe result.
    pub fn safe(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            status: ModerationStatus::Safe,
            timestamp: Utc::now(),
            violated_categories: None,
            details: None,
            confidence_score: None,
            error: None,
        }
    }

    /// An unsafe result with details in the same order as `categories`.
    pub fn unsafe_with(input: impl Into<String>, categories: Vec<CategoryCode>) -> Self {
        let details = categories.iter().map(|c| describe(c.code())).collect();
        Self {
            input: input.into(),
            status: ModerationStatus::Unsafe,
            timestamp: Utc::now(),
            violated_categories: Some(categories),
            details: Some(details),
            confidence_score: None,
            error: None,
        }
    }

    /// An error result echoing the input.
    pub fn error(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            status: ModerationStatus::Error,
            timestamp: Utc::now(),
            violated_categories: None,
            details: None,
            confidence_score: None,
            error: Some(message.into()),
        }
    }

    /// Returns true if the text was judged unsafe.
    pub fn is_unsafe(&self) -> bool {
        self.status == ModerationStatus::Unsafe
    }
}

/// Service options.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Attach the placeholder `confidence_score` to safe and unsafe results.
    pub annotate_confidence: bool,
}

/// Orchestrates moderation requests against a shared engine.
pub struct ModerationService {
    engine: Arc<ModerationEngine>,
    config: ServiceConfig,
}

impl ModerationService {
    /// Creates a service with default options.
    pub fn new(engine: Arc<ModerationEngine>) -> Self {
        Self::with_config(engine, ServiceConfig::default())
    }

    /// Creates a service with the given options.
    pub fn with_config(engine: Arc<ModerationEngine>, config: ServiceConfig) -> Self {
        Self { engine, config }
    }

    /// Moderates `text`. Never panics on classifier failure; the failure is
    /// reported as an error result instead.
    ///
    /// Blocks for the duration of model generation.
    pub fn moderate(&self, text: &str) -> ModerationResult {
        let mut result = match self.engine.classify(text) {
            Ok(verdict) if verdict.is_unsafe() => {
                ModerationResult::unsafe_with(text, verdict.categories)
            }
            Ok(_) => ModerationResult::safe(text),
            Err(e) => ModerationResult::error(text, e.to_string()),
        };

        if self.config.annotate_confidence {
            result.confidence_score = match result.status {
                ModerationStatus::Safe => Some(MOCK_SAFE_CONFIDENCE),
                ModerationStatus::Unsafe => Some(MOCK_UNSAFE_CONFIDENCE),
                ModerationStatus::Error => None,
            };
        }

        info!(
            status = ?result.status,
            categories = result.violated_categories.as_ref().map_or(0, Vec::len),
            input_len = text.len(),
            "Moderation complete"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{GuardError, SafetyClassifier, Verdict};

    struct Scripted(Result<Verdict, &'static str>);

    impl SafetyClassifier for Scripted {
        fn classify(&self, _text: &str) -> Result<Verdict, GuardError> {
            self.0
                .clone()
                .map_err(|msg| GuardError::InferenceError(msg.to_string()))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct FromOutput(&'static str);

    impl SafetyClassifier for FromOutput {
        fn classify(&self, _text: &str) -> Result<Verdict, GuardError> {
            Ok(Verdict::parse(self.0))
        }

        fn name(&self) -> &'static str {
            "from_output"
        }
    }

    fn service(classifier: impl SafetyClassifier + 'static) -> ModerationService {
        ModerationService::new(Arc::new(ModerationEngine::with_classifier(classifier)))
    }

    #[test]
    fn safe_result_has_no_categories() {
        let result = service(FromOutput("safe")).moderate("How to bake a chocolate cake?");
        assert_eq!(result.status, ModerationStatus::Safe);
        assert_eq!(result.input, "How to bake a chocolate cake?");
        assert!(result.violated_categories.is_none());
        assert!(result.details.is_none());
        assert!(result.error.is_none());
        assert!(result.confidence_score.is_none());

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("violated_categories").is_none());
        assert!(json.get("details").is_none());
        assert_eq!(json["status"], "safe");
    }

    #[test]
    fn unsafe_output_orders_categories_by_catalog() {
        let result = service(FromOutput("unsafe\nS9,S1")).moderate("text");
        assert_eq!(result.status, ModerationStatus::Unsafe);
        assert_eq!(
            result.violated_categories,
            Some(vec![CategoryCode::S1, CategoryCode::S9])
        );

        let details = result.details.unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].category, "S1");
        assert_eq!(
            details[0].description,
            "Violent Crimes - Includes unlawful violence toward people or animals"
        );
        assert_eq!(details[1].category, "S9");
        assert_eq!(
            details[1].description,
            "Indiscriminate Weapons - Chemical, biological, nuclear weapons"
        );
    }

    #[test]
    fn unsafe_hate_matches_wire_shape() {
        let result =
            service(Scripted(Ok(Verdict::unsafe_with(vec![CategoryCode::S10])))).moderate("x");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "unsafe");
        assert_eq!(json["violated_categories"], serde_json::json!(["S10"]));
        assert_eq!(
            json["details"],
            serde_json::json!([{
                "category": "S10",
                "description": "Hate - Demeaning based on personal characteristics"
            }])
        );
    }

    #[test]
    fn classifier_failure_becomes_error_result() {
        let result = service(Scripted(Err("generation failed"))).moderate("echo me");
        assert_eq!(result.status, ModerationStatus::Error);
        assert_eq!(result.input, "echo me");
        assert!(result.violated_categories.is_none());
        assert!(result.details.is_none());
        assert!(result.error.unwrap().contains("generation failed"));
    }

    #[test]
    fn empty_input_is_accepted() {
        let result = service(FromOutput("safe")).moderate("");
        assert_eq!(result.status, ModerationStatus::Safe);
        assert_eq!(result.input, "");
    }

    #[test]
    fn details_parallel_categories() {
        let svc = service(FromOutput("unsafe\nS2, S7, S11"));
        let result = svc.moderate("t");
        let categories = result.violated_categories.unwrap();
        let details = result.details.unwrap();
        assert_eq!(categories.len(), details.len());
        for (code, detail) in categories.iter().zip(&details) {
            assert_eq!(code.code(), detail.category);
        }
    }

    #[test]
    fn mock_confidence_when_enabled() {
        let config = ServiceConfig {
            annotate_confidence: true,
        };

        let engine = Arc::new(ModerationEngine::with_classifier(FromOutput("safe")));
        let result = ModerationService::with_config(engine, config.clone()).moderate("a");
        assert_eq!(result.confidence_score, Some(MOCK_SAFE_CONFIDENCE));

        let engine = Arc::new(ModerationEngine::with_classifier(FromOutput("unsafe\nS1")));
        let result = ModerationService::with_config(engine, config.clone()).moderate("a");
        assert_eq!(result.confidence_score, Some(MOCK_UNSAFE_CONFIDENCE));

        let engine = Arc::new(ModerationEngine::with_classifier(Scripted(Err("boom"))));
        let result = ModerationService::with_config(engine, config).moderate("a");
        assert_eq!(result.confidence_score, None);
    }

    #[test]
    fn timestamp_is_fresh_each_call() {
        let svc = service(FromOutput("safe"));
        let first = svc.moderate("a");
        let second = svc.moderate("a");
        assert!(second.timestamp >= first.timestamp);
        let json = serde_json::to_value(&first).unwrap();
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }
}
