//! Layered configuration: built-in defaults, an optional `medra.toml`,
//! `MEDRA_*` environment overrides, then the dedicated variables the
//! enclosing service exports (`LLM_API_KEY`, `FORGE_TOKEN`, `RESULTS_DIR`,
//! `WORKSPACE_ROOT`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MedraError, Result};

/// Per-operation wall-clock budgets, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub clone_secs: u64,
    pub runtime_exec_secs: u64,
    pub analyzer_secs: u64,
    pub llm_secs: u64,
    pub test_run_secs: u64,
    pub ci_poll_total_secs: u64,
    pub ci_poll_interval_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            clone_secs: 120,
            runtime_exec_secs: 30,
            analyzer_secs: 120,
            llm_secs: 60,
            test_run_secs: 300,
            ci_poll_total_secs: 600,
            ci_poll_interval_secs: 15,
        }
    }
}

/// Iteration and resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_iterations: u32,
    pub test_tail_iterations: u32,
    pub max_retries: u32,
    /// Cap on captured stdout/stderr per child process, in bytes.
    pub captured_output_bytes: usize,
    /// Cap on the file slice embedded in an LLM prompt, in bytes.
    pub prompt_file_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            test_tail_iterations: 3,
            max_retries: 3,
            captured_output_bytes: 256 * 1024,
            prompt_file_bytes: 6000,
        }
    }
}

/// Isolated runtime execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    pub python_image: String,
    pub node_image: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            python_image: "python:3.11-alpine".to_string(),
            node_image: "node:20-alpine".to_string(),
        }
    }
}

/// LLM endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2048,
            temperature: 0.1,
        }
    }
}

/// Top-level platform settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Root under which per-run workspaces are created.
    pub workspace_root: Option<PathBuf>,
    /// Directory the result store writes to.
    pub results_dir: Option<PathBuf>,
    /// Forge API token, used for push and PR operations.
    pub forge_token: Option<String>,
    pub timeouts: Timeouts,
    pub limits: Limits,
    pub sandbox: SandboxSettings,
    pub llm: LlmSettings,
}

impl Settings {
    /// Load settings from defaults, `medra.toml` and the environment.
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("medra").required(false))
            .add_source(config::Environment::with_prefix("MEDRA").separator("__"));

        let mut settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| MedraError::InvalidInput(format!("configuration error: {e}")))?;

        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Apply the dedicated variables exported by the enclosing service.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = key;
            }
        }
        if let Ok(token) = std::env::var("FORGE_TOKEN") {
            if !token.is_empty() {
                self.forge_token = Some(token);
            }
        }
        if let Ok(dir) = std::env::var("RESULTS_DIR") {
            if !dir.is_empty() {
                self.results_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(root) = std::env::var("WORKSPACE_ROOT") {
            if !root.is_empty() {
                self.workspace_root = Some(PathBuf::from(root));
            }
        }
    }

    /// Workspace root, falling back to the system temp directory.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Results directory, falling back to `./results`.
    pub fn results_dir(&self) -> PathBuf {
        self.results_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("results"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budgets() {
        let s = Settings::default();
        assert_eq!(s.timeouts.clone_secs, 120);
        assert_eq!(s.timeouts.runtime_exec_secs, 30);
        assert_eq!(s.timeouts.test_run_secs, 300);
        assert_eq!(s.timeouts.ci_poll_total_secs, 600);
        assert_eq!(s.timeouts.ci_poll_interval_secs, 15);
        assert_eq!(s.limits.max_iterations, 5);
        assert_eq!(s.limits.test_tail_iterations, 3);
        assert_eq!(s.sandbox.memory_limit_mb, 256);
        assert!((s.sandbox.cpu_limit - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn workspace_root_falls_back_to_temp() {
        let s = Settings::default();
        assert_eq!(s.workspace_root(), std::env::temp_dir());
    }
}
