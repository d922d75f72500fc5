//! Workflow configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default user agent sent with playlist and segment requests
pub const DEFAULT_USER_AGENT: &str = "M3U8Workflow/1.0.0";

/// Environment variable names understood by [`WorkflowConfig::apply_env_overrides`]
pub const ENV_WORKSPACE: &str = "M3U8_WORKSPACE";
pub const ENV_USER_AGENT: &str = "M3U8_USER_AGENT";
pub const ENV_TIMEOUT_SECS: &str = "M3U8_TIMEOUT_SECS";
pub const ENV_PROGRESS_INTERVAL_MS: &str = "M3U8_PROGRESS_INTERVAL_MS";

/// Main workflow configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Root under which every per-playlist workspace directory is created
    pub workspace_root: PathBuf,
    pub user_agent: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Progress sampling period in milliseconds
    pub progress_interval_ms: u64,
    /// Copy buffer used while combining segments
    pub buffer_size: usize,
    /// Extra request headers
    pub headers: HashMap<String, String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workspace_root: Self::default_workspace_root(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_seconds: 30,
            progress_interval_ms: 1000,
            buffer_size: 64 * 1024, // 64KB
            headers: HashMap::new(),
        }
    }
}

impl WorkflowConfig {
    /// Configuration rooted at an explicit workspace directory
    pub fn with_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the project config dir, creating default if not exists
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let config: WorkflowConfig =
                serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

            tracing::info!("Loaded configuration from: {:?}", config_path);
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(config_path)?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Save configuration to the project config dir
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved configuration to: {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "videodownloader", "m3u8-workflow")
            .with_context(|| "Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.json"))
    }

    fn default_workspace_root() -> PathBuf {
        ProjectDirs::from("com", "videodownloader", "m3u8-workflow")
            .map(|dirs| dirs.data_dir().join("workspace"))
            .unwrap_or_else(|| std::env::temp_dir().join("m3u8_workflow"))
    }

    /// Apply `M3U8_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_WORKSPACE) {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(agent) = lookup(ENV_USER_AGENT) {
            self.user_agent = agent;
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_SECS) {
            self.timeout_seconds = timeout
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_TIMEOUT_SECS, timeout))?;
        }
        if let Some(interval) = lookup(ENV_PROGRESS_INTERVAL_MS) {
            self.progress_interval_ms = interval
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_PROGRESS_INTERVAL_MS, interval))?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.workspace_root.as_os_str().is_empty() {
            anyhow::bail!("Workspace root must not be empty");
        }

        if self.user_agent.trim().is_empty() {
            anyhow::bail!("User agent must not be empty");
        }

        if self.timeout_seconds == 0 || self.timeout_seconds > 300 {
            anyhow::bail!("Timeout should be between 1 and 300 seconds");
        }

        if self.progress_interval_ms == 0 {
            anyhow::bail!("Progress interval must be greater than 0");
        }

        if self.buffer_size == 0 {
            anyhow::bail!("Buffer size must be greater than 0");
        }

        Ok(())
    }
}
