//! Classifier error types.

/// Errors raised while loading or running a safety classifier.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Model file not found.
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    /// Tokenizer file not found.
    #[error("Tokenizer file not found: {0}")]
    TokenizerNotFound(String),

    /// Model config missing or unreadable.
    #[error("Invalid model config: {0}")]
    InvalidConfig(String),

    /// ONNX runtime error.
    #[error("ONNX runtime error: {0}")]
    #[cfg(feature = "ml")]
    OrtError(#[from] ort::Error),

    /// Tokenizer error.
    #[error("Tokenizer error: {0}")]
    TokenizerError(String),

    /// Inference error.
    #[error("Inference error: {0}")]
    InferenceError(String),

    /// Generation ran past its deadline.
    #[error("Generation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// ML feature not enabled.
    #[error("ML feature not enabled - rebuild with --features ml")]
    MlNotEnabled,
}

#[cfg(feature = "ml")]
impl From<tokenizers::Error> for GuardError {
    fn from(e: tokenizers::Error) -> Self {
        GuardError::TokenizerError(e.to_string())
    }
}
