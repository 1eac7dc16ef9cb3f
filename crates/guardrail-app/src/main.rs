//! Guardrail - Llama Guard content moderation service.
//!
//! This is the main binary. It resolves the model artifacts, loads the
//! moderation engine once, and then either serves the HTTP API or moderates
//! texts given on the command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use directories::ProjectDirs;
use guardrail_core::classifier::{LlamaGuardConfig, Sampler, DEFAULT_MODEL_ID};
use guardrail_core::model_downloader::DEFAULT_ONNX_REPO;
use guardrail_core::{
    EngineSlot, ModelDownloader, ModelSource, ModerationEngine, ModerationService, ServiceConfig,
};
use guardrail_server::{
    AppState, Server, ServerConfig, DEFAULT_CORS_ORIGIN, DEFAULT_HOST, DEFAULT_PORT,
};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Guardrail - classify text as safe or unsafe with Llama Guard
#[derive(Parser, Debug)]
#[command(name = "guardrail", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    model: ModelArgs,

    /// Attach the placeholder confidence_score to results (mock data)
    #[arg(long, global = true)]
    mock_confidence: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Port to bind to
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Origin allowed to call the API with credentials
        #[arg(long, default_value = DEFAULT_CORS_ORIGIN)]
        cors_origin: String,
    },
    /// Moderate each text once and print the JSON results
    Check {
        /// Texts to moderate
        #[arg(required = true)]
        texts: Vec<String>,
    },
}

/// Where the model comes from and how it generates.
#[derive(ClapArgs, Debug)]
struct ModelArgs {
    /// Hugging Face repository holding the tokenizer and config
    #[arg(long, default_value = DEFAULT_MODEL_ID, global = true)]
    model_repo: String,

    /// Revision of the model repository (branch, tag, or commit)
    #[arg(long, default_value = "main", global = true)]
    revision: String,

    /// Hugging Face repository holding the ONNX export of the decoder
    #[arg(long, default_value = DEFAULT_ONNX_REPO, global = true)]
    onnx_repo: String,

    /// Revision of the ONNX export repository
    #[arg(long, default_value = "main", global = true)]
    onnx_revision: String,

    /// ONNX decoder path inside the export repository (or --model-dir)
    #[arg(long, default_value = "onnx/model.onnx", global = true)]
    model_file: String,

    /// External weights file next to the decoder ("none" if the export has none)
    #[arg(long, default_value = "onnx/model.onnx_data", global = true)]
    model_data_file: String,

    /// Use artifacts from this directory instead of downloading
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Hugging Face access token (falls back to HUGGINGFACE_TOKEN)
    #[arg(long, env = "HF_TOKEN", hide_env_values = true, global = true)]
    hf_token: Option<String>,

    /// Maximum number of generated tokens
    #[arg(long, default_value_t = 128, global = true)]
    max_new_tokens: usize,

    /// Sampling temperature (0 for greedy decoding)
    #[arg(long, default_value_t = 0.1, global = true)]
    temperature: f32,

    /// Nucleus sampling threshold
    #[arg(long, default_value_t = 0.9, global = true)]
    top_p: f32,

    /// Per-request generation deadline in seconds (0 disables it)
    #[arg(long, default_value_t = 30, global = true)]
    generation_timeout_secs: u64,
}

impl ModelArgs {
    /// Hub source for downloads.
    fn source(&self) -> ModelSource {
        let model_data_file = match self.model_data_file.as_str() {
            "" | "none" => None,
            file => Some(file.to_string()),
        };

        ModelSource {
            repo_id: self.model_repo.clone(),
            revision: self.revision.clone(),
            onnx_repo_id: self.onnx_repo.clone(),
            onnx_revision: self.onnx_revision.clone(),
            model_file: self.model_file.clone(),
            model_data_file,
            token: self.hf_token.clone().or_else(ModelSource::token_from_env),
            ..Default::default()
        }
    }

    /// Applies the generation settings to a classifier config.
    fn apply(&self, mut config: LlamaGuardConfig) -> LlamaGuardConfig {
        config.max_new_tokens = self.max_new_tokens;
        config.sampler = Sampler {
            temperature: self.temperature,
            top_p: self.top_p,
        };
        config.max_generation_time = match self.generation_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        config
    }
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "guardrail", "Guardrail").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging to stderr plus a daily rolling file.
///
/// Stdout is left clean for `check` output.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "guardrail={0},guardrail_core={0},guardrail_server={0},warn",
            log_level
        ))
    });

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("guardrail")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

/// Resolves artifacts and loads the engine into `slot`.
///
/// Any failure here is fatal: the service never starts without a model.
async fn load_engine(
    args: &ModelArgs,
    slot: Arc<EngineSlot>,
) -> anyhow::Result<Arc<ModerationEngine>> {
    let downloader = ModelDownloader::new().context("no platform data directory available")?;

    if cfg!(feature = "ml") && !downloader.setup_environment() {
        downloader
            .ensure_onnx_runtime()
            .await
            .context("failed to install ONNX Runtime")?;
        downloader.setup_environment();
    }

    let config = match &args.model_dir {
        Some(dir) => {
            tracing::info!("Using local model artifacts in {:?}", dir);
            LlamaGuardConfig::from_dir(dir, &args.model_file)
        }
        None => {
            let source = args.source();
            if source.token.is_none() {
                tracing::warn!(
                    "No Hugging Face token set; gated repository {} may refuse downloads",
                    source.repo_id
                );
            }
            downloader
                .ensure_model(&source)
                .await
                .with_context(|| format!("failed to fetch model {}", source.repo_id))?
        }
    };
    let config = args.apply(config);

    let engine = tokio::task::spawn_blocking(move || slot.get_or_load(config))
        .await
        .context("model loading task failed")?
        .context("failed to initialize moderation engine")?;

    Ok(engine)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args);

    let engine = load_engine(&args.model, Arc::new(EngineSlot::new())).await?;
    let service_config = ServiceConfig {
        annotate_confidence: args.mock_confidence,
    };

    match args.command {
        Command::Serve {
            host,
            port,
            cors_origin,
        } => {
            let config = ServerConfig::default()
                .with_host(host)
                .with_port(port)
                .with_cors_origin(cors_origin);
            let state = AppState::with_engine(engine, service_config);
            let server = Server::with_state(config, state)?;
            server.run().await?;
        }
        Command::Check { texts } => {
            let service = Arc::new(ModerationService::with_config(engine, service_config));
            for text in texts {
                let service = service.clone();
                let result = tokio::task::spawn_blocking(move || service.moderate(&text))
                    .await
                    .context("moderation task failed")?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
    }

    Ok(())
}
