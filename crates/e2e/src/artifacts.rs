//! Failure screenshots and video folders

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::engine::AutomationEngine;
use crate::error::E2eResult;

/// A screenshot written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Where per-spec artifacts go
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    screenshots_dir: PathBuf,
    videos_dir: Option<PathBuf>,
    overwrite: bool,
}

impl ArtifactStore {
    pub fn new(screenshots_dir: PathBuf, videos_dir: Option<PathBuf>, overwrite: bool) -> Self {
        Self {
            screenshots_dir,
            videos_dir,
            overwrite,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.screenshots_folder.clone(),
            config.video.then(|| config.videos_folder.clone()),
            config.reporter.overwrite,
        )
    }

    /// Video folder for a spec file, when recording is on
    pub fn video_dir(&self, spec: &str) -> Option<PathBuf> {
        self.videos_dir.as_ref().map(|dir| dir.join(spec))
    }

    /// Capture the current page for a failed attempt
    pub async fn capture_failure(
        &self,
        engine: &dyn AutomationEngine,
        spec: &str,
        suite_path: &[String],
        title: &str,
        attempt: u32,
    ) -> E2eResult<Screenshot> {
        let dir = self.screenshots_dir.join(spec);
        std::fs::create_dir_all(&dir)?;

        let path = self.free_path(&dir, &failure_screenshot_stem(suite_path, title, attempt));
        engine.screenshot(&path).await?;

        let data = std::fs::read(&path)?;
        let screenshot = Screenshot {
            sha256: hash_bytes(&data),
            size_bytes: data.len() as u64,
            path,
        };
        info!("Screenshot saved: {}", screenshot.path.display());
        Ok(screenshot)
    }

    /// `<stem>.png`, or `<stem> (k).png` when overwriting is off and the file exists
    fn free_path(&self, dir: &Path, stem: &str) -> PathBuf {
        let first = dir.join(format!("{}.png", stem));
        if self.overwrite || !first.exists() {
            return first;
        }
        let mut k = 1;
        loop {
            let candidate = dir.join(format!("{} ({}).png", stem, k));
            if !candidate.exists() {
                debug!("{} exists, using {}", first.display(), candidate.display());
                return candidate;
            }
            k += 1;
        }
    }
}

/// `<suite path> -- <test title> (failed)[ (attempt N)]`
pub fn failure_screenshot_stem(suite_path: &[String], title: &str, attempt: u32) -> String {
    let mut parts: Vec<&str> = suite_path.iter().map(String::as_str).collect();
    parts.push(title);
    let mut stem = format!("{} (failed)", parts.join(" -- "));
    if attempt > 1 {
        stem.push_str(&format!(" (attempt {})", attempt));
    }
    sanitize(&stem)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect()
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
