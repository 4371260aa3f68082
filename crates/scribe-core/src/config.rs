//! Configuration management for Scribe
//!
//! This module provides configuration structures for the sandbox limits,
//! pipeline retry policy, completion service connection and the system
//! prompts of each stage.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, ScribeError};

/// Directory holding Scribe state inside a project
pub const CONFIG_DIR: &str = ".scribe";
/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.toml";

/// Project-level Scribe configuration
///
/// Loaded from `.scribe/config.toml` in the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScribeConfig {
    /// Script sandbox limits
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Pipeline retry policy
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Completion service connection
    #[serde(default)]
    pub completion: CompletionConfig,

    /// System prompts for each stage
    #[serde(default)]
    pub prompts: StagePrompts,
}

/// Limits applied by the script sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Size of the permit pool shared by all concurrent runs
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,

    /// Upper bound on a single run, in milliseconds
    #[serde(default = "default_max_execution_time_ms")]
    pub max_execution_time_ms: u64,

    /// Global bindings scripts may use; everything else is removed
    #[serde(default = "default_allowed_globals")]
    pub allowed_globals: Vec<String>,

    /// Cache compile verdicts by exact source text
    #[serde(default = "default_enable_cache")]
    pub enable_cache: bool,

    /// Maximum number of cached verdicts
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,

    /// Engine loop iteration ceiling
    #[serde(default = "default_loop_iteration_limit")]
    pub loop_iteration_limit: u64,

    /// Engine call depth ceiling
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,

    /// Ceiling on live engine threads, including ones still running after
    /// their caller timed out or cancelled (default: twice the slot count)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_engine_threads: Option<usize>,
}

/// Retry policy for the Developer feedback cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum code generation attempts per run (0 = unlimited)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Hard ceiling on stage invocations per run
    #[serde(default)]
    pub max_steps: Option<usize>,
}

/// Connection to an OpenAI-compatible chat completion service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Service root, without the `/v1` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// System prompt for each completion-backed stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePrompts {
    #[serde(default = "default_analyst_prompt")]
    pub analyst: String,

    #[serde(default = "default_developer_prompt")]
    pub developer: String,

    #[serde(default = "default_reviewer_prompt")]
    pub reviewer: String,

    #[serde(default = "default_presenter_prompt")]
    pub presenter: String,
}

// Default value providers
fn default_max_concurrent_executions() -> usize {
    4
}

fn default_max_execution_time_ms() -> u64 {
    5_000
}

fn default_allowed_globals() -> Vec<String> {
    [
        "globalThis",
        "undefined",
        "NaN",
        "Infinity",
        "Object",
        "Array",
        "Number",
        "String",
        "Boolean",
        "BigInt",
        "Symbol",
        "Math",
        "JSON",
        "Date",
        "Map",
        "Set",
        "RegExp",
        "Error",
        "TypeError",
        "RangeError",
        "parseInt",
        "parseFloat",
        "isNaN",
        "isFinite",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_enable_cache() -> bool {
    true
}

fn default_max_cache_size() -> usize {
    128
}

fn default_loop_iteration_limit() -> u64 {
    50_000_000
}

fn default_recursion_limit() -> usize {
    512
}

fn default_max_attempts() -> usize {
    5
}

fn default_base_url() -> String {
    "http://127.0.0.1:55443".to_string()
}

fn default_model() -> String {
    "mistralai/mistral-nemo-instruct-2407".to_string()
}

fn default_api_key_env() -> String {
    "SCRIBE_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
    2048
}

fn default_temperature() -> f32 {
    0.2
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_analyst_prompt() -> String {
    "You are an expert requirements analyst. Turn the user's question into requirements \
for a short JavaScript snippet that computes the answer.

Focus on the computational task: arithmetic, data transformation, small algorithms.

Respond with a single JSON object:
{\"task\": string, \"inputs\": [string], \"outputs\": [string], \"constraints\": [string]}

Example for 'What is 20+20+20*10':
{\"task\": \"Evaluate the expression 20+20+20*10\", \"inputs\": [\"The expression 20+20+20*10\"], \
\"outputs\": [\"Numeric result\"], \"constraints\": [\"Apply operator precedence\"]}"
        .to_string()
}

fn default_developer_prompt() -> String {
    "You are an expert JavaScript developer writing snippets for an embedded script engine.

The value of the LAST expression is the result. Do not print, do not return, do not wrap \
the code in a function that is never called.

Rules:
1. Write plain JavaScript statements; the final line is an expression without `return`.
2. No console, no require, no import, no network or file access.
3. For arithmetic, write the expression exactly: 20 + 20 + 20 * 10
4. Intermediate variables are fine: const total = 20 + 20 + 20 * 10; total
5. Reply with the code in a ```javascript fenced block and nothing else."
        .to_string()
}

fn default_reviewer_prompt() -> String {
    "You are a senior reviewer of JavaScript snippets run in an embedded engine.

Primary question: does the code solve the original task correctly?

Criteria, in order: correctness, the last expression yields the result, no console/require/import, \
simplicity. For arithmetic check operator precedence: 20+20+20*10 is 240.

Respond with a single JSON object: {\"approved\": boolean, \"comments\": string}
Explain the expected result in the comments."
        .to_string()
}

fn default_presenter_prompt() -> String {
    "You turn code execution results into a short answer for an end user.

Respond with a single JSON object: {\"summary\": string, \"formatted_result\": string}
The formatted_result must contain the computed value."
        .to_string()
}

impl ScribeConfig {
    /// Path of the config file under a project root
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ScribeError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `.scribe/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = Self::path_in(root);

        if config_path.exists() {
            tracing::debug!("Loading config from {:?}", config_path);
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.scribe/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let content = Self::default().to_toml()?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Render as pretty TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ScribeError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Reject settings the sandbox or client cannot honour
    pub fn validate(&self) -> Result<()> {
        self.sandbox.validate()?;
        if self.completion.base_url.trim().is_empty() {
            return Err(ScribeError::Config(
                "completion.base_url must not be empty".to_string(),
            ));
        }
        if self.completion.model.trim().is_empty() {
            return Err(ScribeError::Config(
                "completion.model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl SandboxConfig {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }

    /// Effective engine thread ceiling
    pub fn engine_thread_limit(&self) -> usize {
        self.max_engine_threads
            .unwrap_or(self.max_concurrent_executions.saturating_mul(2))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_executions == 0 {
            return Err(ScribeError::Config(
                "sandbox.max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        if self.max_execution_time_ms == 0 {
            return Err(ScribeError::Config(
                "sandbox.max_execution_time_ms must be greater than 0".to_string(),
            ));
        }
        if self.enable_cache && self.max_cache_size == 0 {
            return Err(ScribeError::Config(
                "sandbox.max_cache_size must be at least 1 when caching is enabled".to_string(),
            ));
        }
        if self.engine_thread_limit() < self.max_concurrent_executions {
            return Err(ScribeError::Config(
                "sandbox.max_engine_threads must be at least max_concurrent_executions"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: default_max_concurrent_executions(),
            max_execution_time_ms: default_max_execution_time_ms(),
            allowed_globals: default_allowed_globals(),
            enable_cache: default_enable_cache(),
            max_cache_size: default_max_cache_size(),
            loop_iteration_limit: default_loop_iteration_limit(),
            recursion_limit: default_recursion_limit(),
            max_engine_threads: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_steps: None,
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for StagePrompts {
    fn default() -> Self {
        Self {
            analyst: default_analyst_prompt(),
            developer: default_developer_prompt(),
            reviewer: default_reviewer_prompt(),
            presenter: default_presenter_prompt(),
        }
    }
}
