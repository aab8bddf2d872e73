//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Environment variable that overrides the configured base URL
pub const BASE_URL_ENV: &str = "BASE_URL";

/// Base URL used when neither the environment nor the config file sets one
pub const FALLBACK_BASE_URL: &str = "http://localhost:3000";

/// Top-level harness configuration, usually read from `counterprobe.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory spec patterns and relative paths are resolved against
    #[serde(skip)]
    pub project_root: PathBuf,

    /// Base for relative navigations
    pub base_url: Option<String>,

    /// Glob selecting spec files
    pub spec_pattern: String,

    /// File holding the root-level hooks
    pub support_file: Option<PathBuf>,

    /// Budget for a single command or assertion
    pub command_timeout_ms: u64,

    /// Actionability budget for a single click
    pub click_timeout_ms: u64,

    /// Polling interval for retried commands
    pub poll_interval_ms: u64,

    /// Budget for a task bridge acknowledgement
    pub task_timeout_ms: u64,

    /// Check that the base URL answers before running
    pub verify_server: bool,

    pub retries: RetriesConfig,

    pub video: bool,
    pub videos_folder: PathBuf,

    pub screenshot_on_failure: bool,
    pub screenshots_folder: PathBuf,

    pub reporter: ReporterConfig,

    pub browser: BrowserConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            base_url: None,
            spec_pattern: "specs/**/*.spec.{yaml,yml}".to_string(),
            support_file: Some(PathBuf::from("specs/support.yaml")),
            command_timeout_ms: 8000,
            click_timeout_ms: 4000,
            poll_interval_ms: 50,
            task_timeout_ms: 60_000,
            verify_server: true,
            retries: RetriesConfig::default(),
            video: false,
            videos_folder: PathBuf::from("test-results/videos"),
            screenshot_on_failure: true,
            screenshots_folder: PathBuf::from("test-results/screenshots"),
            reporter: ReporterConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

/// Test-level retry budget per invocation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetriesConfig {
    pub batch_mode: u32,
    pub interactive_mode: u32,
}

impl Default for RetriesConfig {
    fn default() -> Self {
        Self {
            batch_mode: 1,
            interactive_mode: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReporterKind {
    /// JSON + HTML report files
    #[default]
    Mochawesome,
    /// Console summary only
    Spec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub kind: ReporterKind,
    pub report_dir: PathBuf,
    pub report_filename: String,
    pub overwrite: bool,
    pub html: bool,
    pub json: bool,
    pub charts: bool,
    pub embedded_screenshots: bool,
    pub inline_assets: bool,
    pub save_all_attempts: bool,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            kind: ReporterKind::Mochawesome,
            report_dir: PathBuf::from("test-results/reports"),
            report_filename: "report".to_string(),
            overwrite: false,
            html: true,
            json: true,
            charts: true,
            embedded_screenshots: true,
            inline_assets: true,
            save_all_attempts: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub name: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            name: "chromium".to_string(),
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

/// Invocation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Live UI, fail fast
    Interactive,
    /// Unattended, headless
    Batch,
}

impl RunMode {
    pub fn is_interactive(&self) -> bool {
        matches!(self, RunMode::Interactive)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Interactive => write!(f, "interactive"),
            RunMode::Batch => write!(f, "batch"),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when it is missing.
    ///
    /// Relative paths in the file are resolved against the file's directory.
    pub fn load(path: &Path) -> E2eResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)?
        } else {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&root);
        config.project_root = root;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string without touching the filesystem
    pub fn from_toml(content: &str) -> E2eResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, root: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        if let Some(support) = self.support_file.as_mut() {
            join(support);
        }
        join(&mut self.videos_folder);
        join(&mut self.screenshots_folder);
        join(&mut self.reporter.report_dir);
    }

    fn validate(&self) -> E2eResult<()> {
        if self.command_timeout_ms == 0 {
            return Err(E2eError::Config("command_timeout_ms must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(E2eError::Config("poll_interval_ms must be positive".into()));
        }
        if self.spec_pattern.trim().is_empty() {
            return Err(E2eError::Config("spec_pattern must not be empty".into()));
        }
        Ok(())
    }

    /// Resolve the base URL: `BASE_URL` wins over the file, then the fallback
    pub fn resolve_base_url(&self) -> String {
        let from_env = std::env::var(BASE_URL_ENV).ok();
        Self::pick_base_url(from_env, self.base_url.clone())
    }

    fn pick_base_url(from_env: Option<String>, configured: Option<String>) -> String {
        from_env
            .filter(|v| !v.trim().is_empty())
            .or(configured)
            .unwrap_or_else(|| FALLBACK_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn retries_for(&self, mode: RunMode) -> u32 {
        match mode {
            RunMode::Interactive => self.retries.interactive_mode,
            RunMode::Batch => self.retries.batch_mode,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn click_timeout(&self) -> Duration {
        Duration::from_millis(self.click_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = HarnessConfig::default();
        assert_eq!(config.command_timeout_ms, 8000);
        assert_eq!(config.retries, RetriesConfig { batch_mode: 1, interactive_mode: 0 });
        assert!(!config.video);
        assert!(config.screenshot_on_failure);
        assert!(!config.reporter.overwrite);
        assert!(!config.reporter.save_all_attempts);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HarnessConfig::from_toml(
            r#"
base_url = "http://127.0.0.1:5173"
command_timeout_ms = 2000

[retries]
batch_mode = 2

[reporter]
html = false
"#,
        )
        .unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://127.0.0.1:5173"));
        assert_eq!(config.command_timeout_ms, 2000);
        assert_eq!(config.retries.batch_mode, 2);
        assert_eq!(config.retries.interactive_mode, 0);
        assert!(!config.reporter.html);
        assert!(config.reporter.json);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = HarnessConfig::from_toml("command_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, E2eError::Config(_)));
    }

    #[test]
    fn test_base_url_precedence() {
        assert_eq!(
            HarnessConfig::pick_base_url(Some("http://env:1/".into()), Some("http://file:2".into())),
            "http://env:1"
        );
        assert_eq!(
            HarnessConfig::pick_base_url(None, Some("http://file:2".into())),
            "http://file:2"
        );
        assert_eq!(HarnessConfig::pick_base_url(Some("  ".into()), None), FALLBACK_BASE_URL);
    }

    #[test]
    fn test_retries_by_mode() {
        let config = HarnessConfig::default();
        assert_eq!(config.retries_for(RunMode::Batch), 1);
        assert_eq!(config.retries_for(RunMode::Interactive), 0);
    }

    #[test]
    fn test_load_missing_file_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load(&dir.path().join("counterprobe.toml")).unwrap();
        assert!(config.reporter.report_dir.starts_with(dir.path()));
        assert!(config.support_file.unwrap().starts_with(dir.path()));
    }
}
