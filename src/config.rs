use std::path::PathBuf;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::models::TrackedProject;

const APP_NAME: &str = "logbook";
const CONFIG_FILE: &str = "config.json";

/// Daemon configuration, stored as JSON in the user's config directory.
///
/// Every threshold the scheduler and compactor consult lives here rather
/// than as a constant, so operators can tune extraction cadence and archive
/// pressure per machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API key for the summarization service.
    #[serde(default)]
    pub api_key: String,
    /// Model used for extraction and archive summaries.
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of the summarization service.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Seconds between scheduler polls across all projects.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// New-byte threshold that triggers extraction regardless of idleness.
    #[serde(default = "default_min_new_bytes")]
    pub min_new_bytes: u64,
    /// Idle seconds after which any pending bytes trigger extraction.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    /// Floor between summarizer calls for one project, independent of the
    /// byte/idle trigger.
    #[serde(default = "default_min_extract_interval")]
    pub min_extract_interval_seconds: u64,

    /// Session-count threshold for archive compaction.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Line-count threshold for archive compaction.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Newest records never folded into the archive.
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
    /// Token budget hint passed to archive summarization.
    #[serde(default = "default_archive_summary_max_tokens")]
    pub archive_summary_max_tokens: u32,

    /// Port for the local status API.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Projects to track.
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,

    /// Override for the Claude Code projects directory (tests, unusual
    /// installs). Defaults to `~/.claude/projects`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_projects_dir: Option<PathBuf>,
    /// Override for the Codex sessions directory. Defaults to
    /// `~/.codex/sessions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_sessions_dir: Option<PathBuf>,
}

/// One tracked project as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub root: PathBuf,
    /// Display name; defaults to the root's basename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_model() -> String {
    "gemini-2.5-flash-lite".to_string()
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_min_new_bytes() -> u64 {
    500
}

fn default_idle_seconds() -> u64 {
    60
}

fn default_min_extract_interval() -> u64 {
    30
}

fn default_max_sessions() -> usize {
    15
}

fn default_max_lines() -> usize {
    400
}

fn default_keep_recent() -> usize {
    10
}

fn default_archive_summary_max_tokens() -> u32 {
    500
}

fn default_api_port() -> u16 {
    17020
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default config deserializes")
    }
}

impl Config {
    /// Load configuration from the user's config directory.
    /// Returns default config if the file doesn't exist or fails to parse.
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {}", e);
                Self::default()
            }
        }
    }

    fn try_load() -> Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config = serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Enabled projects, resolved into tracked-project records.
    pub fn tracked_projects(&self) -> Vec<TrackedProject> {
        self.projects
            .iter()
            .filter(|p| p.enabled)
            .map(|p| {
                let mut project = TrackedProject::new(p.root.clone());
                if let Some(name) = &p.name {
                    project.name = name.clone();
                }
                project
            })
            .collect()
    }

    /// Directory where Claude Code writes per-project session logs.
    pub fn claude_projects_dir(&self) -> Option<PathBuf> {
        self.claude_projects_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".claude").join("projects")))
    }

    /// Directory where Codex writes session logs.
    pub fn codex_sessions_dir(&self) -> Option<PathBuf> {
        self.codex_sessions_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".codex").join("sessions")))
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = Config::default();
        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.min_new_bytes, 500);
        assert_eq!(config.idle_seconds, 60);
        assert_eq!(config.max_sessions, 15);
        assert_eq!(config.max_lines, 400);
        assert_eq!(config.keep_recent, 10);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"min_new_bytes": 2000, "api_key": "k"}"#).unwrap();
        assert_eq!(config.min_new_bytes, 2000);
        assert_eq!(config.api_key, "k");
        assert_eq!(config.idle_seconds, 60);
        assert!(config.projects.is_empty());
    }

    #[test]
    fn project_entries_resolve_names() {
        let config: Config = serde_json::from_str(
            r#"{"projects": [
                {"root": "/tmp/alpha"},
                {"root": "/tmp/beta", "name": "Beta", "enabled": false}
            ]}"#,
        )
        .unwrap();

        let tracked = config.tracked_projects();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].name, "alpha");
    }
}
