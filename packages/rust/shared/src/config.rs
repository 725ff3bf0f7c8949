//! Application configuration for CadMesh.
//!
//! User config lives at `~/.cadmesh/cadmesh.toml`.
//! Environment variables override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CadMeshError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "cadmesh.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".cadmesh";

/// Default maximum input size: 50 MB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Config structs (matching cadmesh.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Artifact storage roots.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Size, concurrency, and time limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Mesh generation engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// External normalization tools.
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,

    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            processed_dir: default_processed_dir(),
            models_dir: default_models_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    "uploads".into()
}
fn default_processed_dir() -> PathBuf {
    "processed".into()
}
fn default_models_dir() -> PathBuf {
    "models".into()
}

/// `[limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum accepted input size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Cap on concurrently running generations (0 = unbounded).
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Engine deadline per job, in seconds.
    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            processing_timeout_secs: default_processing_timeout(),
        }
    }
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}
fn default_max_concurrent_jobs() -> usize {
    5
}
fn default_processing_timeout() -> u64 {
    3600
}

/// Which engine implementation to wire up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Remote engine service over HTTP.
    #[default]
    Http,
    /// In-process fake engine for offline dry runs.
    Fake,
}

/// `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,

    /// Base URL of the engine service.
    #[serde(default = "default_engine_url")]
    pub base_url: Url,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Interval between engine status polls, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            base_url: default_engine_url(),
            api_key_env: default_api_key_env(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_engine_url() -> Url {
    Url::parse("http://localhost:8080").expect("static URL is valid")
}
fn default_api_key_env() -> String {
    "MESH_ENGINE_API_KEY".into()
}
fn default_poll_interval() -> u64 {
    1000
}

/// `[tools]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Geometry kernel executable for vector drawings.
    #[serde(default = "default_kernel_cmd")]
    pub kernel_cmd: String,

    /// Page rasterizer executable for PDF documents.
    #[serde(default = "default_rasterizer_cmd")]
    pub rasterizer_cmd: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            kernel_cmd: default_kernel_cmd(),
            rasterizer_cmd: default_rasterizer_cmd(),
        }
    }
}

fn default_kernel_cmd() -> String {
    "DRAWEXE".into()
}
fn default_rasterizer_cmd() -> String {
    "pdftoppm".into()
}

// ---------------------------------------------------------------------------
// Job config (runtime, derived from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime settings for the generation job manager.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Deadline handed to the engine adapter for each job.
    pub processing_timeout: Duration,
    /// Worker pool size (0 = unbounded).
    pub max_concurrent_jobs: usize,
    /// Fixed progress tick used when the engine reports nothing.
    pub progress_tick: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for JobConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            processing_timeout: Duration::from_secs(config.limits.processing_timeout_secs),
            max_concurrent_jobs: config.limits.max_concurrent_jobs,
            progress_tick: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply the recognized environment overrides, reading through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("UPLOAD_FOLDER") {
            self.storage.upload_dir = v.into();
        }
        if let Some(v) = lookup("PROCESSED_FOLDER") {
            self.storage.processed_dir = v.into();
        }
        if let Some(v) = lookup("MODELS_FOLDER") {
            self.storage.models_dir = v.into();
        }
        if let Some(v) = lookup("MAX_FILE_SIZE") {
            self.limits.max_file_size = parse_env("MAX_FILE_SIZE", &v)?;
        }
        if let Some(v) = lookup("MAX_CONCURRENT_JOBS") {
            self.limits.max_concurrent_jobs = parse_env("MAX_CONCURRENT_JOBS", &v)?;
        }
        if let Some(v) = lookup("PROCESSING_TIMEOUT") {
            self.limits.processing_timeout_secs = parse_env("PROCESSING_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("MESH_ENGINE_URL") {
            self.engine.base_url = Url::parse(&v).map_err(|e| {
                CadMeshError::config(format!("MESH_ENGINE_URL '{v}' is not a valid URL: {e}"))
            })?;
        }
        Ok(())
    }

    /// Read the engine API key from the configured env var, if set.
    pub fn engine_api_key(&self) -> Option<String> {
        std::env::var(&self.engine.api_key_env)
            .ok()
            .filter(|v| !v.is_empty())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CadMeshError::config(format!("{name}='{value}' is invalid: {e}")))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.cadmesh/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CadMeshError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.cadmesh/cadmesh.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk plus environment overrides.
/// Falls back to defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    config.apply_env_overrides(|name| std::env::var(name).ok())?;
    Ok(config)
}

/// Load the application config from a specific file path (no env overrides).
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CadMeshError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| CadMeshError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CadMeshError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| CadMeshError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CadMeshError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config_serializes() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        assert!(toml_str.contains("max_file_size = 52428800"));
        assert!(toml_str.contains("MESH_ENGINE_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.limits.max_concurrent_jobs, 5);
        assert_eq!(parsed.limits.processing_timeout_secs, 3600);
        assert_eq!(parsed.engine.kind, EngineKind::Http);
        assert_eq!(parsed.tools.kernel_cmd, "DRAWEXE");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[engine]
kind = "fake"

[storage]
models_dir = "/srv/models"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.engine.kind, EngineKind::Fake);
        assert_eq!(config.storage.models_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.limits.max_file_size, DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[
                ("MODELS_FOLDER", "/data/models"),
                ("MAX_CONCURRENT_JOBS", "2"),
                ("PROCESSING_TIMEOUT", "60"),
                ("MESH_ENGINE_URL", "http://engine:9000"),
            ]))
            .expect("overrides");
        assert_eq!(config.storage.models_dir, PathBuf::from("/data/models"));
        assert_eq!(config.limits.max_concurrent_jobs, 2);
        assert_eq!(config.engine.base_url.as_str(), "http://engine:9000/");

        let jobs = JobConfig::from(&config);
        assert_eq!(jobs.processing_timeout, Duration::from_secs(60));
    }

    #[test]
    fn bad_numeric_override_is_config_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(env(&[("MAX_FILE_SIZE", "fifty megs")]))
            .expect_err("must fail");
        assert!(err.to_string().contains("MAX_FILE_SIZE"));
        assert_eq!(err.code(), "config");
    }
}
