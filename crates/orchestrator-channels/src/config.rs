//! Typed configuration file for channel credentials and webhook settings.
//! Thin glue carried here because the webhook and messenger layers need
//! somewhere to source their settings from.

use std::path::{Path, PathBuf};

use orchestrator_core::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeishuChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "appId")]
    pub app_id: String,
    #[serde(default, rename = "appSecret")]
    pub app_secret: String,
    #[serde(default, rename = "encryptKey")]
    pub encrypt_key: String,
    #[serde(default, rename = "verificationToken")]
    pub verification_token: String,
    #[serde(default, rename = "allowFrom")]
    pub allow_from: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub feishu: FeishuChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_tasks_root")]
    pub tasks_root: String,
    #[serde(default = "default_artifacts_root")]
    pub artifacts_root: String,
    #[serde(default = "default_reports_root")]
    pub reports_root: String,
    #[serde(default = "default_state_root")]
    pub state_root: String,
    #[serde(default)]
    pub repo_path: String,
    #[serde(default)]
    pub worktrees_root: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

fn default_tasks_root() -> String {
    "~/.orchestrator/tasks".to_string()
}

fn default_artifacts_root() -> String {
    "~/.orchestrator/artifacts".to_string()
}

fn default_reports_root() -> String {
    "~/.orchestrator/reports".to_string()
}

fn default_state_root() -> String {
    "~/.orchestrator/state".to_string()
}

fn default_branch_prefix() -> String {
    "agent".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    900
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tasks_root: default_tasks_root(),
            artifacts_root: default_artifacts_root(),
            reports_root: default_reports_root(),
            state_root: default_state_root(),
            repo_path: String::new(),
            worktrees_root: String::new(),
            branch_prefix: default_branch_prefix(),
            agent_timeout_secs: default_agent_timeout_secs(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Resolves a configured path, expanding a leading `~/` against the home
    /// directory the same way `default_config_path` does.
    pub fn resolved_path(&self, raw: &str) -> PathBuf {
        expand_path(raw)
    }
}

fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn default_config_path() -> PathBuf {
    expand_path("~/.orchestrator/config.json")
}

pub fn load_config(path: &Path, create_if_missing: bool) -> Result<AppConfig> {
    if !path.exists() {
        if create_if_missing {
            let config = AppConfig::default();
            save_config(&config, path)?;
            return Ok(config);
        }
        return Err(OrchestratorError::orchestrator(format!(
            "config file not found: {}",
            path.display()
        )));
    }
    let data = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&data)?;
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_string_pretty(config)?;
    std::fs::write(path, payload)?;
    Ok(path.to_path_buf())
}

pub fn init_config(path: &Path, force: bool) -> Result<PathBuf> {
    if path.exists() && !force {
        return Err(OrchestratorError::orchestrator(format!(
            "config already exists: {} (use force to overwrite)",
            path.display()
        )));
    }
    save_config(&AppConfig::default(), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.channels.feishu.enabled = true;
        config.channels.feishu.app_id = "app1".to_string();
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path, false).unwrap();
        assert!(loaded.channels.feishu.enabled);
        assert_eq!(loaded.channels.feishu.app_id, "app1");
    }

    #[test]
    fn missing_file_without_create_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(load_config(&path, false).is_err());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        init_config(&path, false).unwrap();
        assert!(init_config(&path, false).is_err());
        assert!(init_config(&path, true).is_ok());
    }
}
