//! Configuration management
//!
//! Settings live in `<data_dir>/settings.json`:
//! ```json
//! {
//!   "projectId": "personal-finance",
//!   "filesRoot": "/srv/statements",
//!   "pipeline": { "gapLimit": 100, "batchSize": 20, "rowDedup": true },
//!   "dbt": { "projectDir": "/srv/dbt_project", "installDeps": true },
//!   "llm": { "model": "gemini-2.5-flash", "timeoutSecs": 60 }
//! }
//! ```
//! Environment variables override the file (see `ENV_*`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::adapters::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::domain::result::{Error, Result};

pub const ENV_PROJECT_ID: &str = "LEDGERFLOW_PROJECT_ID";
pub const ENV_FILES_ROOT: &str = "LEDGERFLOW_FILES_ROOT";
pub const ENV_DBT_DIR: &str = "LEDGERFLOW_DBT_DIR";
pub const ENV_DBT_ENABLED: &str = "LEDGERFLOW_DBT_ENABLED";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";

/// Pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// Ceiling on descriptions classified per run
    pub gap_limit: usize,
    /// Descriptions per LLM request
    pub batch_size: usize,
    /// Skip rows already stored by a different file
    pub row_dedup: bool,
    pub staging_tags: Vec<String>,
    pub final_tags: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            gap_limit: 100,
            batch_size: 20,
            row_dedup: true,
            staging_tags: vec!["staging".to_string()],
            final_tags: vec!["intermediate".to_string(), "marts".to_string()],
        }
    }
}

/// dbt invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DbtSettings {
    pub enabled: bool,
    pub program: String,
    pub project_dir: Option<PathBuf>,
    pub install_deps: bool,
}

impl Default for DbtSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "dbt".to_string(),
            project_dir: None,
            install_deps: true,
        }
    }
}

/// LLM classifier endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
        }
    }
}

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files_root: Option<PathBuf>,
    #[serde(default)]
    pipeline: PipelineSettings,
    #[serde(default)]
    dbt: DbtSettings,
    #[serde(default)]
    llm: LlmSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: Option<String>,
    pub files_root: PathBuf,
    pub pipeline: PipelineSettings,
    pub dbt: DbtSettings,
    pub llm: LlmSettings,
    // Keep the raw settings for preservation when saving
    raw_settings: SettingsFile,
}

impl Config {
    /// Load settings.json from the data directory, applying environment overrides
    pub fn load(data_dir: &Path) -> Result<Self> {
        Self::load_with_env(data_dir, |key| std::env::var(key).ok())
    }

    /// Load with an explicit environment lookup
    pub fn load_with_env<F>(data_dir: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings_path = data_dir.join("settings.json");
        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content).map_err(|e| {
                Error::config(format!("Invalid {}: {}", settings_path.display(), e))
            })?
        } else {
            SettingsFile::default()
        };

        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let project_id = non_empty(ENV_PROJECT_ID).or_else(|| raw.project_id.clone());
        let files_root = non_empty(ENV_FILES_ROOT)
            .map(PathBuf::from)
            .or_else(|| raw.files_root.clone())
            .unwrap_or_else(|| data_dir.join("files"));

        let mut dbt = raw.dbt.clone();
        if let Some(dir) = non_empty(ENV_DBT_DIR) {
            dbt.project_dir = Some(PathBuf::from(dir));
        }
        match non_empty(ENV_DBT_ENABLED).as_deref() {
            Some("true" | "1" | "yes" | "TRUE" | "YES") => dbt.enabled = true,
            Some("false" | "0" | "no" | "FALSE" | "NO") => dbt.enabled = false,
            _ => {}
        }

        let mut llm = raw.llm.clone();
        if let Some(key) = non_empty(ENV_GEMINI_API_KEY) {
            llm.api_key = Some(key);
        }

        let config = Self {
            project_id,
            files_root,
            pipeline: raw.pipeline.clone(),
            dbt,
            llm,
            raw_settings: raw,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.gap_limit == 0 {
            return Err(Error::config("pipeline.gapLimit must be at least 1"));
        }
        if self.pipeline.batch_size == 0 {
            return Err(Error::config("pipeline.batchSize must be at least 1"));
        }
        if let Some(id) = &self.project_id {
            if id.contains(['/', '\\']) || id.contains("..") {
                return Err(Error::config(format!("Invalid projectId '{}'", id)));
            }
        }
        Ok(())
    }

    /// The project id, required by every warehouse operation
    pub fn require_project_id(&self) -> Result<&str> {
        self.project_id.as_deref().ok_or_else(|| {
            Error::config(format!(
                "projectId is not configured (set it in settings.json or {})",
                ENV_PROJECT_ID
            ))
        })
    }

    /// `<data_dir>/<projectId>.duckdb`
    pub fn warehouse_path(&self, data_dir: &Path) -> Result<PathBuf> {
        Ok(data_dir.join(format!("{}.duckdb", self.require_project_id()?)))
    }

    /// Save to settings.json, preserving fields this crate doesn't manage
    ///
    /// Environment overrides and the API key are never written back.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let settings_path = data_dir.join("settings.json");
        let mut settings = self.raw_settings.clone();
        settings.project_id = self.project_id.clone();
        settings.pipeline = self.pipeline.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }
}
