//! Automation engine seam
//!
//! The harness only needs a handful of primitives from a browser automation
//! engine. Each primitive is a single attempt: waiting and retrying belong to
//! [`crate::commands::Commands`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::E2eResult;

/// Actionability snapshot of one element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actionability {
    pub attached: bool,
    pub visible: bool,
    pub enabled: bool,
    pub obscured: bool,
}

impl Actionability {
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn ready() -> Self {
        Self {
            attached: true,
            visible: true,
            enabled: true,
            obscured: false,
        }
    }

    /// First condition preventing a normal click, if any
    pub fn blocker(&self) -> Option<&'static str> {
        if !self.attached {
            Some("element not found")
        } else if !self.visible {
            Some("element is not visible")
        } else if !self.enabled {
            Some("element is disabled")
        } else if self.obscured {
            Some("element is covered by another element")
        } else {
            None
        }
    }
}

#[async_trait]
pub trait AutomationEngine: Send + Sync {
    /// Load `url`; fails with a navigation error when the page does not load
    async fn visit(&self, url: &str, timeout: Duration) -> E2eResult<()>;

    /// Text content of the first match, `None` when nothing matches
    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>>;

    async fn actionability(&self, selector: &str) -> E2eResult<Actionability>;

    /// Deliver one click without any actionability checks
    async fn click(&self, selector: &str) -> E2eResult<()>;

    async fn dblclick(&self, selector: &str) -> E2eResult<()>;

    async fn focus(&self, selector: &str) -> E2eResult<()>;

    /// Id of the focused element
    async fn focused_id(&self) -> E2eResult<Option<String>>;

    /// Press a key on the focused element
    async fn press(&self, key: &str) -> E2eResult<()>;

    async fn screenshot(&self, path: &Path) -> E2eResult<()>;

    async fn close(&self) -> E2eResult<()>;
}

/// Session options passed to a factory for each spec file
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub spec_name: String,
    pub headless: bool,
    pub video_dir: Option<PathBuf>,
}

/// Launches a fresh engine session per spec file
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn launch(&self, options: &SessionOptions) -> E2eResult<Arc<dyn AutomationEngine>>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocker_order() {
        assert_eq!(Actionability::detached().blocker(), Some("element not found"));
        assert_eq!(Actionability::ready().blocker(), None);
        let disabled = Actionability {
            enabled: false,
            ..Actionability::ready()
        };
        assert_eq!(disabled.blocker(), Some("element is disabled"));
        let covered = Actionability {
            obscured: true,
            ..Actionability::ready()
        };
        assert_eq!(covered.blocker(), Some("element is covered by another element"));
    }
}
