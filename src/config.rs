use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Completed produce/review/revise cycles allowed before the run is failed.
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
    /// Hard cap on controller loop iterations, independent of revision counting.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_human_input_timeout")]
    pub human_input_timeout_secs: u64,
    /// Use the structured (JSON) critique interpreter before keyword matching.
    #[serde(default = "default_structured_critique")]
    pub structured_critique: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            max_iterations: default_max_iterations(),
            human_input_timeout_secs: default_human_input_timeout(),
            structured_critique: default_structured_critique(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_type_check_command")]
    pub type_check_command: Vec<String>,
    #[serde(default = "default_test_command")]
    pub test_command: Vec<String>,
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_dir: default_sandbox_dir(),
            type_check_command: default_type_check_command(),
            test_command: default_test_command(),
            exec_timeout_secs: default_exec_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory for per-run JSON state files. None keeps state in memory only.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { data_dir: None }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_max_turns() -> u32 {
    30
}

fn default_max_revisions() -> u32 {
    3
}

fn default_max_iterations() -> u32 {
    50
}

fn default_human_input_timeout() -> u64 {
    24 * 60 * 60
}

fn default_structured_critique() -> bool {
    false
}

fn default_sandbox_dir() -> PathBuf {
    PathBuf::from("/tmp/greenloop-sandboxes")
}

fn default_type_check_command() -> Vec<String> {
    vec!["python3".into(), "-m".into(), "mypy".into(), ".".into()]
}

fn default_test_command() -> Vec<String> {
    vec!["python3".into(), "-m".into(), "pytest".into(), "-q".into()]
}

fn default_exec_timeout() -> u64 {
    300
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(
                config::File::with_name("greenloop")
                    .required(false),
            );
        }

        // Environment variable overrides with GREENLOOP_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("GREENLOOP")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn api_key(&self) -> &str {
        &self.model.api_key
    }
}
