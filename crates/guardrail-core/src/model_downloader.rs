//! Model artifact and ONNX Runtime downloader.
//!
//! Fetches the Llama Guard tokenizer and config from the upstream model
//! repository and the ONNX decoder from an export repository on the Hugging
//! Face hub, plus the ONNX Runtime shared library that `ort` loads
//! dynamically. Gated repositories need an access token, which is always
//! supplied from outside (flag or environment), never compiled in.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::classifier::{LlamaGuardConfig, DEFAULT_MODEL_ID};

/// Hugging Face hub endpoint.
pub const HF_ENDPOINT: &str = "https://huggingface.co";

/// Default repository holding the ONNX export of the decoder.
pub const DEFAULT_ONNX_REPO: &str = "onnx-community/Llama-Guard-3-1B";

/// Environment variables checked for the hub access token, in order.
pub const TOKEN_ENV_VARS: &[&str] = &["HF_TOKEN", "HUGGINGFACE_TOKEN"];

/// Error types for artifact downloading.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive extraction error: {0}")]
    Archive(String),

    #[error("Access denied for {0} - check the Hugging Face token and model license")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "ONNX export {file} not found in {repo_id}; export the model with \
         `optimum-cli export onnx --model {model_id} --task text-generation-with-past <dir>` \
         and pass `--model-dir <dir>`, or point `--onnx-repo` at an existing export"
    )]
    MissingExport {
        repo_id: String,
        file: String,
        model_id: String,
    },
}

/// ONNX Runtime version to download.
const ONNX_RUNTIME_VERSION: &str = "1.23.2";

#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
const ONNX_RUNTIME_URL: &str = "https://github.com/microsoft/onnxruntime/releases/download/v1.23.2/onnxruntime-win-x64-1.23.2.zip";

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
const ONNX_RUNTIME_URL: &str = "https://github.com/microsoft/onnxruntime/releases/download/v1.23.2/onnxruntime-linux-x64-1.23.2.tgz";

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
const ONNX_RUNTIME_URL: &str = "https://github.com/microsoft/onnxruntime/releases/download/v1.23.2/onnxruntime-linux-aarch64-1.23.2.tgz";

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
const ONNX_RUNTIME_URL: &str = "https://github.com/microsoft/onnxruntime/releases/download/v1.23.2/onnxruntime-osx-arm64-1.23.2.tgz";

#[cfg(not(any(
    all(target_os = "windows", target_arch = "x86_64"),
    all(target_os = "linux", target_arch = "x86_64"),
    all(target_os = "linux", target_arch = "aarch64"),
    all(target_os = "macos", target_arch = "aarch64"),
)))]
const ONNX_RUNTIME_URL: &str = "";

#[cfg(target_os = "windows")]
const ONNX_RUNTIME_LIB: &str = "onnxruntime.dll";
#[cfg(target_os = "macos")]
const ONNX_RUNTIME_LIB: &str = "libonnxruntime.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const ONNX_RUNTIME_LIB: &str = "libonnxruntime.so";

/// Where to fetch model artifacts from.
///
/// The tokenizer and config come from the upstream model repository, the
/// decoder from a repository holding its ONNX export. Both may be the same.
#[derive(Debug, Clone)]
pub struct ModelSource {
    /// Upstream model repository, e.g. `meta-llama/Llama-Guard-3-1B`.
    pub repo_id: String,
    /// Branch, tag, or commit of `repo_id`.
    pub revision: String,
    /// Repository holding the ONNX decoder.
    pub onnx_repo_id: String,
    /// Branch, tag, or commit of `onnx_repo_id`.
    pub onnx_revision: String,
    /// ONNX decoder path inside the export repository.
    pub model_file: String,
    /// External weights file stored next to the decoder, if the export has one.
    pub model_data_file: Option<String>,
    /// Hub access token.
    pub token: Option<String>,
    /// Hub base URL.
    pub endpoint: String,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self {
            repo_id: DEFAULT_MODEL_ID.to_string(),
            revision: "main".to_string(),
            onnx_repo_id: DEFAULT_ONNX_REPO.to_string(),
            onnx_revision: "main".to_string(),
            model_file: "onnx/model.onnx".to_string(),
            model_data_file: Some("onnx/model.onnx_data".to_string()),
            token: None,
            endpoint: HF_ENDPOINT.to_string(),
        }
    }
}

/// One file of a hub repository at a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubFile<'a> {
    pub repo_id: &'a str,
    pub revision: &'a str,
    pub path: &'a str,
    /// Part of the ONNX export rather than the upstream model.
    pub export: bool,
}

impl ModelSource {
    /// Reads the access token from the first set variable in [`TOKEN_ENV_VARS`].
    pub fn token_from_env() -> Option<String> {
        TOKEN_ENV_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|v| !v.trim().is_empty())
    }

    /// Files required to run the model.
    pub fn files(&self) -> Vec<HubFile<'_>> {
        let upstream = |path| HubFile {
            repo_id: &self.repo_id,
            revision: &self.revision,
            path,
            export: false,
        };
        let export = |path| HubFile {
            repo_id: &self.onnx_repo_id,
            revision: &self.onnx_revision,
            path,
            export: true,
        };

        let mut files = vec![
            upstream("config.json"),
            upstream("tokenizer.json"),
            export(self.model_file.as_str()),
        ];
        if let Some(ref data) = self.model_data_file {
            files.push(export(data.as_str()));
        }
        files
    }

    /// Download URL of a repository file.
    pub fn file_url(&self, file: &HubFile<'_>) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint.trim_end_matches('/'),
            file.repo_id,
            file.revision,
            file.path
        )
    }

    /// Rewrites a 404 on an export file into an actionable error.
    fn explain(&self, file: &HubFile<'_>, err: DownloadError) -> DownloadError {
        match err {
            DownloadError::NotFound(_) if file.export => DownloadError::MissingExport {
                repo_id: file.repo_id.to_string(),
                file: file.path.to_string(),
                model_id: self.repo_id.clone(),
            },
            other => other,
        }
    }
}

/// Downloader for ONNX Runtime and model artifacts.
pub struct ModelDownloader {
    /// Directory for models.
    models_dir: PathBuf,
    /// Directory for runtime libraries.
    lib_dir: PathBuf,
    client: reqwest::Client,
}

impl ModelDownloader {
    /// Creates a downloader rooted in the platform data directory.
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "guardrail", "Guardrail")?;
        Some(Self::with_data_dir(project_dirs.data_dir()))
    }

    /// Creates a downloader rooted in `data_dir`.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            models_dir: data_dir.join("models"),
            lib_dir: data_dir.join("lib"),
            client: reqwest::Client::new(),
        }
    }

    /// Returns the models directory path.
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Returns the lib directory path.
    pub fn lib_dir(&self) -> &Path {
        &self.lib_dir
    }

    /// Local directory mirroring `repo_id` at `revision`.
    pub fn repo_dir(&self, repo_id: &str, revision: &str) -> PathBuf {
        self.models_dir.join(repo_id.replace('/', "--")).join(revision)
    }

    /// Local path of a hub file.
    pub fn local_path(&self, file: &HubFile<'_>) -> PathBuf {
        self.repo_dir(file.repo_id, file.revision).join(file.path)
    }

    /// Classifier config pointing at the local copies of `source`.
    pub fn classifier_config(&self, source: &ModelSource) -> LlamaGuardConfig {
        let upstream = self.repo_dir(&source.repo_id, &source.revision);
        let export = self.repo_dir(&source.onnx_repo_id, &source.onnx_revision);
        LlamaGuardConfig {
            model_path: path_string(export.join(&source.model_file)),
            tokenizer_path: path_string(upstream.join("tokenizer.json")),
            config_path: path_string(upstream.join("config.json")),
            ..Default::default()
        }
    }

    /// Checks if every artifact of `source` is present.
    pub fn is_model_installed(&self, source: &ModelSource) -> bool {
        source.files().iter().all(|f| self.local_path(f).exists())
    }

    /// Returns the path to the ONNX Runtime library.
    pub fn onnx_runtime_path(&self) -> PathBuf {
        self.lib_dir.join(ONNX_RUNTIME_LIB)
    }

    /// Checks if ONNX Runtime is installed.
    pub fn is_onnx_runtime_installed(&self) -> bool {
        self.onnx_runtime_path().exists()
    }

    /// Downloads any missing artifact of `source` and returns a classifier
    /// config pointing at the local copies.
    pub async fn ensure_model(
        &self,
        source: &ModelSource,
    ) -> Result<LlamaGuardConfig, DownloadError> {
        for file in source.files() {
            let dest = self.local_path(&file);
            if dest.exists() {
                debug!("{} already present at {:?}", file.path, dest);
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            info!("Downloading {} from {}", file.path, file.repo_id);
            self.download_to(&source.file_url(&file), &dest, source.token.as_deref())
                .await
                .map_err(|e| source.explain(&file, e))?;
        }

        Ok(self.classifier_config(source))
    }

    /// Downloads ONNX Runtime if not already installed.
    pub async fn ensure_onnx_runtime(&self) -> Result<PathBuf, DownloadError> {
        if self.is_onnx_runtime_installed() {
            return Ok(self.onnx_runtime_path());
        }
        if ONNX_RUNTIME_URL.is_empty() {
            return Err(DownloadError::NotFound(
                "ONNX Runtime not available for this platform".to_string(),
            ));
        }

        fs::create_dir_all(&self.lib_dir)?;
        info!("Downloading ONNX Runtime v{}", ONNX_RUNTIME_VERSION);

        let response = self
            .client
            .get(ONNX_RUNTIME_URL)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        let response = check_status(response, ONNX_RUNTIME_URL)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        self.extract_runtime(&bytes)?;
        info!("ONNX Runtime installed at {:?}", self.onnx_runtime_path());

        Ok(self.onnx_runtime_path())
    }

    /// Streams `url` into `dest` through a `.part` file.
    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        token: Option<&str>,
    ) -> Result<(), DownloadError> {
        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        let mut response = check_status(response, url)?;

        let total = response.content_length();
        let partial = part_path(dest);
        let mut file = File::create(&partial)?;
        let mut downloaded: u64 = 0;
        let mut last_reported = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?
        {
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;

            if let Some(pct) = percentage(downloaded, total) {
                if pct >= last_reported + 10 {
                    last_reported = pct;
                    info!("{:?}: {}%", dest.file_name().unwrap_or_default(), pct);
                }
            }
        }

        file.flush()?;
        drop(file);
        fs::rename(&partial, dest)?;

        debug!(bytes = downloaded, "Saved {:?}", dest);
        Ok(())
    }

    /// Extracts the runtime library from a ZIP archive (Windows).
    #[cfg(target_os = "windows")]
    fn extract_runtime(&self, data: &[u8]) -> Result<(), DownloadError> {
        use std::io::Cursor;
        use zip::ZipArchive;

        let mut archive = ZipArchive::new(Cursor::new(data))
            .map_err(|e| DownloadError::Archive(e.to_string()))?;

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| DownloadError::Archive(e.to_string()))?;
            if file.name().ends_with(ONNX_RUNTIME_LIB) {
                let mut dest = File::create(self.onnx_runtime_path())?;
                io::copy(&mut file, &mut dest)?;
                return Ok(());
            }
        }

        Err(DownloadError::Archive(format!(
            "{} not found in archive",
            ONNX_RUNTIME_LIB
        )))
    }

    /// Extracts the runtime library from a tar.gz archive (Linux/macOS).
    #[cfg(not(target_os = "windows"))]
    fn extract_runtime(&self, data: &[u8]) -> Result<(), DownloadError> {
        use flate2::read::GzDecoder;
        use std::io::Cursor;
        use tar::Archive;

        let mut archive = Archive::new(GzDecoder::new(Cursor::new(data)));

        for entry in archive
            .entries()
            .map_err(|e| DownloadError::Archive(e.to_string()))?
        {
            let mut entry = entry.map_err(|e| DownloadError::Archive(e.to_string()))?;
            let is_lib = entry
                .path()
                .map_err(|e| DownloadError::Archive(e.to_string()))?
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(ONNX_RUNTIME_LIB))
                .unwrap_or(false);

            // Skip symlinks; the versioned file carries the content.
            if is_lib && entry.header().entry_type().is_file() {
                let mut dest = File::create(self.onnx_runtime_path())?;
                io::copy(&mut entry, &mut dest)?;
                return Ok(());
            }
        }

        Err(DownloadError::Archive(format!(
            "{} not found in archive",
            ONNX_RUNTIME_LIB
        )))
    }

    /// Gets the environment variable name for ONNX Runtime library path.
    pub fn onnx_lib_env_var() -> &'static str {
        "ORT_DYLIB_PATH"
    }

    /// Points `ort` at the downloaded runtime unless the variable is already set.
    pub fn setup_environment(&self) -> bool {
        if std::env::var_os(Self::onnx_lib_env_var()).is_some() {
            return true;
        }
        if self.is_onnx_runtime_installed() {
            let lib_path = self.onnx_runtime_path();
            std::env::set_var(Self::onnx_lib_env_var(), &lib_path);
            info!("Set {} to {:?}", Self::onnx_lib_env_var(), lib_path);
            true
        } else {
            false
        }
    }
}

/// Maps hub error statuses onto [`DownloadError`].
fn check_status(
    response: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, DownloadError> {
    match response.status() {
        s if s.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(DownloadError::Unauthorized(url.to_string()))
        }
        StatusCode::NOT_FOUND => Err(DownloadError::NotFound(url.to_string())),
        s => Err(DownloadError::Network(format!("HTTP error: {} for {}", s, url))),
    }
}

fn path_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

/// `dest` with `.part` appended to its file name.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Progress as a percentage (0-100), if the total is known.
fn percentage(downloaded: u64, total: Option<u64>) -> Option<u8> {
    total.map(|t| {
        if t == 0 {
            100
        } else {
            ((downloaded as f64 / t as f64) * 100.0).min(100.0) as u8
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(files: &[HubFile<'_>]) -> Vec<String> {
        files
            .iter()
            .map(|f| format!("{}@{}:{}", f.repo_id, f.revision, f.path))
            .collect()
    }

    #[test]
    fn default_source_splits_upstream_and_export() {
        let source = ModelSource::default();
        assert_eq!(source.repo_id, "meta-llama/Llama-Guard-3-1B");
        assert_eq!(source.onnx_repo_id, "onnx-community/Llama-Guard-3-1B");
        assert_eq!(
            paths(&source.files()),
            vec![
                "meta-llama/Llama-Guard-3-1B@main:config.json",
                "meta-llama/Llama-Guard-3-1B@main:tokenizer.json",
                "onnx-community/Llama-Guard-3-1B@main:onnx/model.onnx",
                "onnx-community/Llama-Guard-3-1B@main:onnx/model.onnx_data",
            ]
        );
        assert!(source.files().iter().all(|f| f.export == f.path.starts_with("onnx/")));
    }

    #[test]
    fn file_url_uses_resolve_path() {
        let source = ModelSource {
            endpoint: "https://hub.example/".to_string(),
            revision: "v1".to_string(),
            onnx_revision: "v2".to_string(),
            ..Default::default()
        };
        let files = source.files();
        assert_eq!(
            source.file_url(&files[1]),
            "https://hub.example/meta-llama/Llama-Guard-3-1B/resolve/v1/tokenizer.json"
        );
        assert_eq!(
            source.file_url(&files[2]),
            "https://hub.example/onnx-community/Llama-Guard-3-1B/resolve/v2/onnx/model.onnx"
        );
    }

    #[test]
    fn missing_export_names_the_export_step() {
        let source = ModelSource::default();
        let files = source.files();

        let err = source.explain(&files[2], DownloadError::NotFound("url".to_string()));
        let message = err.to_string();
        assert!(matches!(err, DownloadError::MissingExport { .. }));
        assert!(message.contains("onnx-community/Llama-Guard-3-1B"));
        assert!(message.contains("optimum-cli export onnx --model meta-llama/Llama-Guard-3-1B"));
        assert!(message.contains("--model-dir"));

        let err = source.explain(&files[1], DownloadError::NotFound("url".to_string()));
        assert!(matches!(err, DownloadError::NotFound(_)));
    }

    #[test]
    fn repo_dir_is_per_repo_and_revision() {
        let tmp = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::with_data_dir(tmp.path());
        let dir = downloader.repo_dir("meta-llama/Llama-Guard-3-1B", "main");
        assert!(dir.starts_with(tmp.path().join("models")));
        assert!(dir.ends_with("meta-llama--Llama-Guard-3-1B/main"));
    }

    #[test]
    fn installed_only_when_every_file_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::with_data_dir(tmp.path());
        let source = ModelSource {
            model_data_file: None,
            ..Default::default()
        };
        assert!(!downloader.is_model_installed(&source));

        let files = source.files();
        for file in &files[..2] {
            let path = downloader.local_path(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "{}").unwrap();
        }
        assert!(!downloader.is_model_installed(&source));

        let decoder = downloader.local_path(&files[2]);
        fs::create_dir_all(decoder.parent().unwrap()).unwrap();
        fs::write(decoder, b"onnx").unwrap();
        assert!(downloader.is_model_installed(&source));
    }

    #[test]
    fn ensure_model_skips_present_files() {
        let tmp = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::with_data_dir(tmp.path());
        let source = ModelSource {
            // Unroutable, so any attempted request would fail.
            endpoint: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        for file in source.files() {
            let path = downloader.local_path(&file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"x").unwrap();
        }

        let config = tokio_test::block_on(downloader.ensure_model(&source)).unwrap();
        assert_eq!(config.model_path, downloader.classifier_config(&source).model_path);
    }

    #[test]
    fn classifier_config_reads_each_repo_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::with_data_dir(tmp.path());
        let source = ModelSource::default();
        let config = downloader.classifier_config(&source);
        assert_eq!(
            PathBuf::from(&config.model_path),
            downloader
                .repo_dir("onnx-community/Llama-Guard-3-1B", "main")
                .join("onnx/model.onnx")
        );
        assert_eq!(
            PathBuf::from(&config.tokenizer_path),
            downloader
                .repo_dir("meta-llama/Llama-Guard-3-1B", "main")
                .join("tokenizer.json")
        );
        assert_eq!(config.max_new_tokens, 128);
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/a/b/model.onnx")),
            PathBuf::from("/a/b/model.onnx.part")
        );
    }

    #[test]
    fn download_percentage() {
        assert_eq!(percentage(50, Some(100)), Some(50));
        assert_eq!(percentage(0, Some(100)), Some(0));
        assert_eq!(percentage(100, Some(100)), Some(100));
        assert_eq!(percentage(10, Some(0)), Some(100));
        assert_eq!(percentage(50, None), None);
    }

    #[test]
    fn downloader_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::with_data_dir(tmp.path());
        assert!(downloader.models_dir().ends_with("models"));
        assert!(downloader.lib_dir().ends_with("lib"));
        assert!(downloader
            .onnx_runtime_path()
            .to_string_lossy()
            .ends_with(ONNX_RUNTIME_LIB));
        assert!(!downloader.is_onnx_runtime_installed());
    }
}
