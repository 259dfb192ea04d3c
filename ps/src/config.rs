//! Configuration for phasestore

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::lock::LockStrategy;

/// Project-local config file name
pub const LOCAL_CONFIG_FILE: &str = ".phasestore.yml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Directory under the project root holding all state files
    pub state_dir: PathBuf,

    /// State document file name, inside `state_dir`
    pub state_file: String,

    /// Structured (JSONL) event log file name, inside `state_dir`
    pub event_log_file: String,

    /// Narrative (Markdown) event log file name, inside `state_dir`
    pub narrative_file: String,

    /// Friction event log (JSONL) file name, inside `state_dir`
    pub friction_log_file: String,

    /// Batch file directory, relative to `state_dir`
    pub reasoning_dir: PathBuf,

    /// Records buffered before an automatic flush
    pub batch_size: usize,

    /// Manually coded documents required before leaving stage1
    pub min_manual_documents: u64,

    /// Overrides within one phase that mark a rule as strained
    pub strain_threshold: u32,

    /// Locking implementation
    pub locking: LockStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".interpretive-orchestration"),
            state_file: "config.json".to_string(),
            event_log_file: "conversation-log.jsonl".to_string(),
            narrative_file: "conversation-log.md".to_string(),
            friction_log_file: "friction-log.jsonl".to_string(),
            reasoning_dir: PathBuf::from("reasoning"),
            batch_size: crate::DEFAULT_BATCH_SIZE,
            min_manual_documents: crate::DEFAULT_MIN_MANUAL_DOCUMENTS,
            strain_threshold: crate::DEFAULT_STRAIN_THRESHOLD,
            locking: LockStrategy::Auto,
        }
    }
}

impl Config {
    /// Load config with fallback chain
    ///
    /// Explicit path, then `.phasestore.yml` in the project root, then
    /// `~/.config/phasestore/phasestore.yml`, then defaults.
    pub fn load(config_path: Option<&Path>, project_root: &Path) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = project_root.join(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("phasestore").join("phasestore.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        tracing::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Reject values the components cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(eyre::eyre!("batch-size must be at least 1"));
        }
        if self.strain_threshold == 0 {
            return Err(eyre::eyre!("strain-threshold must be at least 1"));
        }
        Ok(())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn state_dir_in(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.state_dir)
    }

    pub fn state_path(&self, project_root: &Path) -> PathBuf {
        self.state_dir_in(project_root).join(&self.state_file)
    }

    pub fn event_log_path(&self, project_root: &Path) -> PathBuf {
        self.state_dir_in(project_root).join(&self.event_log_file)
    }

    pub fn narrative_path(&self, project_root: &Path) -> PathBuf {
        self.state_dir_in(project_root).join(&self.narrative_file)
    }

    pub fn friction_log_path(&self, project_root: &Path) -> PathBuf {
        self.state_dir_in(project_root).join(&self.friction_log_file)
    }

    pub fn reasoning_path(&self, project_root: &Path) -> PathBuf {
        self.state_dir_in(project_root).join(&self.reasoning_dir)
    }
}
