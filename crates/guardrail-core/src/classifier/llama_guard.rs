//! Llama Guard generative classifier.
//!
//! Runs Meta's Llama Guard 3 decoder via ONNX with a key/value cache and
//! parses the generated assessment (`safe`, or `unsafe` followed by the
//! violated category codes).

use std::path::Path;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Deserialize;

use super::{CategoryCode, GuardError, Sampler, SafetyClassifier, Verdict};

/// Default Hugging Face repository of the model.
pub const DEFAULT_MODEL_ID: &str = "meta-llama/Llama-Guard-3-1B";

/// Renders `text` as the single `User` turn of the Llama Guard 3 prompt.
///
/// The output already contains `<|begin_of_text|>`, so it must be encoded
/// without adding special tokens.
pub fn format_prompt(text: &str) -> String {
    let mut categories = String::new();
    for code in CategoryCode::all() {
        categories.push_str(&format!("{}: {}.\n", code, code.name()));
    }

    format!(
        "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n\
         Task: Check if there is unsafe content in 'User' messages in conversations \
         according our safety policy with the below categories.\n\n\
         <BEGIN UNSAFE CONTENT CATEGORIES>\n{categories}<END UNSAFE CONTENT CATEGORIES>\n\n\
         <BEGIN CONVERSATION>\n\nUser: {text}\n\n<END CONVERSATION>\n\n\
         Provide your safety assessment for ONLY THE LAST User message \
         in the above conversation:\n \
         - First line must read 'safe' or 'unsafe'.\n \
         - If unsafe, a second line must include a comma-separated list of violated categories. \
         <|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n"
    )
}

/// Configuration for the Llama Guard classifier.
#[derive(Debug, Clone)]
pub struct LlamaGuardConfig {
    /// Path to the ONNX decoder (with external data alongside, if any).
    pub model_path: String,
    /// Path to the tokenizer.json file.
    pub tokenizer_path: String,
    /// Path to the model's config.json.
    pub config_path: String,
    /// Upper bound on generated tokens.
    pub max_new_tokens: usize,
    /// Sampling settings.
    pub sampler: Sampler,
    /// Deadline for one generation, checked between decode steps.
    pub max_generation_time: Option<Duration>,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for LlamaGuardConfig {
    fn default() -> Self {
        Self {
            model_path: "models/onnx/model.onnx".to_string(),
            tokenizer_path: "models/tokenizer.json".to_string(),
            config_path: "models/config.json".to_string(),
            max_new_tokens: 128,
            sampler: Sampler::default(),
            max_generation_time: Some(Duration::from_secs(30)),
            intra_threads: 4,
        }
    }
}

impl LlamaGuardConfig {
    /// Points the config at a model directory laid out like the hub repository.
    pub fn from_dir(dir: impl AsRef<Path>, model_file: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            model_path: dir.join(model_file).to_string_lossy().into_owned(),
            tokenizer_path: dir.join("tokenizer.json").to_string_lossy().into_owned(),
            config_path: dir.join("config.json").to_string_lossy().into_owned(),
            ..Default::default()
        }
    }
}

/// The subset of the Hugging Face `config.json` needed to drive the decoder.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    pub hidden_size: usize,
    #[serde(default)]
    pub head_dim: Option<usize>,
    #[serde(default)]
    pub eos_token_id: Option<TokenIds>,
}

/// One or several token ids, as `config.json` allows either.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TokenIds {
    One(u32),
    Many(Vec<u32>),
}

impl ModelConfig {
    /// Reads and parses a config.json file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GuardError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GuardError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| GuardError::InvalidConfig(e.to_string()))
    }

    /// Key/value heads (grouped-query attention), defaulting to attention heads.
    pub fn kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    /// Per-head dimension.
    pub fn head_dim(&self) -> usize {
        self.head_dim
            .unwrap_or(self.hidden_size / self.num_attention_heads.max(1))
    }

    /// End-of-sequence ids declared by the config.
    pub fn eos_ids(&self) -> Vec<u32> {
        match &self.eos_token_id {
            Some(TokenIds::One(id)) => vec![*id],
            Some(TokenIds::Many(ids)) => ids.clone(),
            None => Vec::new(),
        }
    }
}

/// Runs the autoregressive decode loop.
///
/// `step` is fed the whole prompt first and then one sampled token at a time,
/// and returns the logits of the last position. Decoding stops at the first
/// id in `eos_ids`, after `config.max_new_tokens` tokens, or with
/// [`GuardError::Timeout`] once `config.max_generation_time` has elapsed.
/// Only newly generated ids are returned, without the stop token.
pub fn decode_tokens<F, R>(
    prompt_ids: Vec<i64>,
    eos_ids: &[u32],
    config: &LlamaGuardConfig,
    rng: &mut R,
    mut step: F,
) -> Result<Vec<u32>, GuardError>
where
    F: FnMut(&[i64]) -> Result<Vec<f32>, GuardError>,
    R: Rng + ?Sized,
{
    if prompt_ids.is_empty() {
        return Err(GuardError::InferenceError("empty prompt encoding".to_string()));
    }

    let start = Instant::now();
    let mut step_ids = prompt_ids;
    let mut generated = Vec::with_capacity(config.max_new_tokens);

    for _ in 0..config.max_new_tokens {
        if let Some(limit) = config.max_generation_time {
            if start.elapsed() >= limit {
                return Err(GuardError::Timeout(limit));
            }
        }

        let logits = step(&step_ids)?;
        let next = config.sampler.sample(&logits, rng).ok_or_else(|| {
            GuardError::InferenceError("model returned empty logits".to_string())
        })?;

        if eos_ids.contains(&next) {
            break;
        }
        generated.push(next);
        step_ids = vec![next as i64];
    }

    Ok(generated)
}

/// Past key/value tensors for every decoder layer, flattened row-major as
/// `[1, kv_heads, past_len, head_dim]`.
#[cfg(feature = "ml")]
struct KvCache {
    keys: Vec<Vec<f32>>,
    values: Vec<Vec<f32>>,
    past_len: usize,
}

#[cfg(feature = "ml")]
impl KvCache {
    fn empty(layers: usize) -> Self {
        Self {
            keys: vec![Vec::new(); layers],
            values: vec![Vec::new(); layers],
            past_len: 0,
        }
    }
}

/// ML-based safety classifier using Meta's Llama Guard 3.
///
/// The ONNX session needs exclusive access per run, so concurrent callers
/// take turns on it.
#[cfg(feature = "ml")]
pub struct LlamaGuardClassifier {
    session: parking_lot::Mutex<ort::session::Session>,
    tokenizer: tokenizers::Tokenizer,
    model_config: ModelConfig,
    eos_ids: Vec<u32>,
    config: LlamaGuardConfig,
}

#[cfg(feature = "ml")]
impl LlamaGuardClassifier {
    /// Loads the tokenizer, model config, and ONNX decoder.
    ///
    /// Returns an error if any artifact is missing or fails to load.
    pub fn new(config: LlamaGuardConfig) -> Result<Self, GuardError> {
        use ort::session::{builder::GraphOptimizationLevel, Session};

        if !Path::new(&config.model_path).exists() {
            return Err(GuardError::ModelNotFound(config.model_path.clone()));
        }
        if !Path::new(&config.tokenizer_path).exists() {
            return Err(GuardError::TokenizerNotFound(config.tokenizer_path.clone()));
        }

        let model_config = ModelConfig::from_file(&config.config_path)?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(&config.model_path)?;

        let tokenizer = tokenizers::Tokenizer::from_file(&config.tokenizer_path)?;

        let mut eos_ids = model_config.eos_ids();
        if let Some(eot) = tokenizer.token_to_id("<|eot_id|>") {
            if !eos_ids.contains(&eot) {
                eos_ids.push(eot);
            }
        }

        tracing::info!(
            layers = model_config.num_hidden_layers,
            kv_heads = model_config.kv_heads(),
            head_dim = model_config.head_dim(),
            eos = ?eos_ids,
            "Loaded Llama Guard model from {}",
            config.model_path
        );

        Ok(Self {
            session: parking_lot::Mutex::new(session),
            tokenizer,
            model_config,
            eos_ids,
            config,
        })
    }

    /// Generates the raw assessment for `text`, excluding the prompt.
    pub fn generate(&self, text: &str) -> Result<String, GuardError> {
        let start = Instant::now();
        let prompt = format_prompt(text);

        let encoding = self.tokenizer.encode(prompt, false)?;
        let prompt_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let prompt_tokens = prompt_ids.len();

        let mut cache = KvCache::empty(self.model_config.num_hidden_layers);
        let mut rng = rand::thread_rng();
        let mut session = self.session.lock();

        let generated = decode_tokens(prompt_ids, &self.eos_ids, &self.config, &mut rng, |ids| {
            self.forward(&mut session, ids, &mut cache)
        })?;
        drop(session);

        let decoded = self.tokenizer.decode(&generated, true)?;

        tracing::debug!(
            prompt_tokens,
            new_tokens = generated.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Llama Guard generation finished"
        );

        Ok(decoded.trim().to_string())
    }

    /// Runs one decoder step, appends to the cache, and returns the logits
    /// of the last position.
    fn forward(
        &self,
        session: &mut ort::session::Session,
        ids: &[i64],
        cache: &mut KvCache,
    ) -> Result<Vec<f32>, GuardError> {
        use ort::session::SessionInputValue;
        use ort::value::Tensor;

        let seq_len = ids.len();
        let past_len = cache.past_len;
        let total_len = past_len + seq_len;
        let kv_heads = self.model_config.kv_heads();
        let head_dim = self.model_config.head_dim();

        let position_ids: Vec<i64> = (past_len..total_len).map(|p| p as i64).collect();

        let mut inputs: Vec<(String, SessionInputValue<'static>)> = vec![
            (
                "input_ids".to_string(),
                Tensor::from_array(([1, seq_len], ids.to_vec().into_boxed_slice()))?.into(),
            ),
            (
                "attention_mask".to_string(),
                Tensor::from_array(([1, total_len], vec![1i64; total_len].into_boxed_slice()))?
                    .into(),
            ),
            (
                "position_ids".to_string(),
                Tensor::from_array(([1, seq_len], position_ids.into_boxed_slice()))?.into(),
            ),
        ];

        let past_shape = [1, kv_heads, past_len, head_dim];
        for layer in 0..self.model_config.num_hidden_layers {
            inputs.push((
                format!("past_key_values.{layer}.key"),
                Tensor::from_array((past_shape, cache.keys[layer].clone().into_boxed_slice()))?
                    .into(),
            ));
            inputs.push((
                format!("past_key_values.{layer}.value"),
                Tensor::from_array((past_shape, cache.values[layer].clone().into_boxed_slice()))?
                    .into(),
            ));
        }

        let outputs = session.run(inputs)?;

        let (shape, data) = outputs["logits"].try_extract_tensor::<f32>().map_err(|e| {
            GuardError::InferenceError(format!("Failed to extract logits: {}", e))
        })?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        if dims.len() != 3 || dims[0] != 1 || dims[1] as usize != seq_len {
            return Err(GuardError::InferenceError(format!(
                "Unexpected logits shape: {:?}",
                dims
            )));
        }
        let vocab = dims[2] as usize;
        let logits = data[(seq_len - 1) * vocab..seq_len * vocab].to_vec();

        for layer in 0..self.model_config.num_hidden_layers {
            for (kind, slot) in [
                ("key", &mut cache.keys[layer]),
                ("value", &mut cache.values[layer]),
            ] {
                let name = format!("present.{layer}.{kind}");
                let (_, present) = outputs[name.as_str()]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| {
                        GuardError::InferenceError(format!("Failed to extract {}: {}", name, e))
                    })?;
                *slot = present.to_vec();
            }
        }
        cache.past_len = total_len;

        Ok(logits)
    }
}

#[cfg(feature = "ml")]
impl SafetyClassifier for LlamaGuardClassifier {
    fn classify(&self, text: &str) -> Result<Verdict, GuardError> {
        let output = self.generate(text)?;
        tracing::debug!(output = %output, "Llama Guard assessment");
        Ok(Verdict::parse(&output))
    }

    fn name(&self) -> &'static str {
        "llama_guard"
    }
}

/// Stub classifier when ML feature is not enabled.
///
/// Always returns an error indicating ML is not available.
#[cfg(not(feature = "ml"))]
pub struct LlamaGuardClassifier {
    _config: LlamaGuardConfig,
}

#[cfg(not(feature = "ml"))]
impl LlamaGuardClassifier {
    /// Creates a stub classifier (ML feature not enabled).
    pub fn new(_config: LlamaGuardConfig) -> Result<Self, GuardError> {
        Err(GuardError::MlNotEnabled)
    }

    /// Generates an assessment (ML feature not enabled).
    pub fn generate(&self, _text: &str) -> Result<String, GuardError> {
        Err(GuardError::MlNotEnabled)
    }
}

#[cfg(not(feature = "ml"))]
impl SafetyClassifier for LlamaGuardClassifier {
    fn classify(&self, _text: &str) -> Result<Verdict, GuardError> {
        Err(GuardError::MlNotEnabled)
    }

    fn name(&self) -> &'static str {
        "llama_guard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LLAMA_GUARD_1B_CONFIG: &str = r#"{
        "architectures": ["LlamaForCausalLM"],
        "eos_token_id": [128001, 128008, 128009],
        "head_dim": 64,
        "hidden_size": 2048,
        "num_attention_heads": 32,
        "num_hidden_layers": 16,
        "num_key_value_heads": 8,
        "vocab_size": 128256
    }"#;

    #[test]
    fn prompt_wraps_text_as_user_turn() {
        let prompt = format_prompt("How do I bake bread?");
        assert!(prompt.starts_with("<|begin_of_text|><|start_header_id|>user<|end_header_id|>"));
        assert!(prompt.contains("User: How do I bake bread?\n\n<END CONVERSATION>"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn prompt_lists_every_category() {
        let prompt = format_prompt("");
        assert!(prompt.contains("S1: Violent Crimes.\n"));
        assert!(prompt.contains("S4: Child Exploitation.\n"));
        assert!(prompt.contains("S13: Elections.\n<END UNSAFE CONTENT CATEGORIES>"));
        for code in CategoryCode::all() {
            assert!(prompt.contains(&format!("{}: {}.", code, code.name())));
        }
    }

    #[test]
    fn model_config_parses_grouped_query_attention() {
        let config: ModelConfig = serde_json::from_str(LLAMA_GUARD_1B_CONFIG).unwrap();
        assert_eq!(config.num_hidden_layers, 16);
        assert_eq!(config.kv_heads(), 8);
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.eos_ids(), vec![128001, 128008, 128009]);
    }

    #[test]
    fn model_config_defaults() {
        let config: ModelConfig = serde_json::from_str(
            r#"{
                "num_hidden_layers": 2,
                "num_attention_heads": 4,
                "hidden_size": 256,
                "eos_token_id": 2
            }"#,
        )
        .unwrap();
        assert_eq!(config.kv_heads(), 4);
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.eos_ids(), vec![2]);
    }

    #[test]
    fn model_config_from_missing_file() {
        let err = ModelConfig::from_file("nonexistent/config.json").unwrap_err();
        assert!(matches!(err, GuardError::InvalidConfig(_)));
    }

    #[test]
    fn config_default_values() {
        let config = LlamaGuardConfig::default();
        assert_eq!(config.max_new_tokens, 128);
        assert_eq!(config.sampler.temperature, 0.1);
        assert_eq!(config.sampler.top_p, 0.9);
    }

    #[test]
    fn config_from_dir_joins_paths() {
        let config = LlamaGuardConfig::from_dir("/models/guard", "onnx/model.onnx");
        assert!(config.model_path.ends_with("onnx/model.onnx"));
        assert!(config.tokenizer_path.ends_with("tokenizer.json"));
        assert!(config.config_path.ends_with("config.json"));
    }

    const EOS: u32 = 7;

    fn one_hot(token: u32) -> Vec<f32> {
        let mut logits = vec![0.0; 8];
        logits[token as usize] = 10.0;
        logits
    }

    fn greedy_config(max_new_tokens: usize) -> LlamaGuardConfig {
        LlamaGuardConfig {
            max_new_tokens,
            sampler: Sampler::greedy(),
            max_generation_time: None,
            ..Default::default()
        }
    }

    #[test]
    fn decode_stops_at_eos_and_returns_only_new_tokens() {
        let script = [3, 1, 4, EOS, 5];
        let mut fed: Vec<Vec<i64>> = Vec::new();
        let mut rng = rand::thread_rng();

        let config = greedy_config(16);

        let generated = decode_tokens(vec![10, 11, 12], &[EOS], &config, &mut rng, |ids| {
            fed.push(ids.to_vec());
            Ok(one_hot(script[fed.len() - 1]))
        })
        .unwrap();

        assert_eq!(generated, vec![3, 1, 4]);
        assert_eq!(fed, vec![vec![10, 11, 12], vec![3], vec![1], vec![4]]);
    }

    #[test]
    fn decode_without_eos_stops_at_max_new_tokens() {
        let mut steps = 0;
        let mut rng = rand::thread_rng();

        let generated = decode_tokens(vec![1], &[EOS], &greedy_config(5), &mut rng, |_| {
            steps += 1;
            Ok(one_hot(2))
        })
        .unwrap();

        assert_eq!(generated, vec![2; 5]);
        assert_eq!(steps, 5);
    }

    #[test]
    fn decode_times_out_when_deadline_passed() {
        let config = LlamaGuardConfig {
            max_generation_time: Some(Duration::ZERO),
            ..greedy_config(4)
        };
        let mut rng = rand::thread_rng();

        let err = decode_tokens(vec![1], &[EOS], &config, &mut rng, |_| Ok(one_hot(2)))
            .unwrap_err();
        assert!(matches!(err, GuardError::Timeout(d) if d == Duration::ZERO));
    }

    #[test]
    fn decode_propagates_step_errors() {
        let mut rng = rand::thread_rng();
        let err = decode_tokens(vec![1], &[EOS], &greedy_config(4), &mut rng, |_| {
            Err(GuardError::InferenceError("bad output".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, GuardError::InferenceError(_)));

        let err = decode_tokens(Vec::new(), &[EOS], &greedy_config(4), &mut rng, |_| {
            Ok(one_hot(2))
        })
        .unwrap_err();
        assert!(matches!(err, GuardError::InferenceError(_)));
    }

    #[test]
    fn new_fails_when_model_missing() {
        let config = LlamaGuardConfig::from_dir("nonexistent", "onnx/model.onnx");
        assert!(LlamaGuardClassifier::new(config).is_err());
    }
}
