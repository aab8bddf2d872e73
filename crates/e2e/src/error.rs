//! Error types for the E2E harness

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Timed out after {timeout_ms} ms waiting for {selector} to have text '{expected}' (last seen: {actual})")]
    AssertionTimeout {
        selector: String,
        expected: String,
        actual: String,
        timeout_ms: u64,
    },

    #[error("Element {selector} not interactable after {timeout_ms} ms: {reason}")]
    ElementNotInteractable {
        selector: String,
        reason: String,
        timeout_ms: u64,
    },

    #[error("Hook '{phase}' failed: {source}")]
    Hook {
        phase: String,
        source: Box<E2eError>,
    },

    #[error("Fatal runner error: {0}")]
    RunnerFatal(String),

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Invalid spec pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("The task '{0}' was not handled by the host")]
    TaskNotHandled(String),

    #[error("Task '{name}' was not acknowledged within {timeout_ms} ms")]
    TaskTimeout { name: String, timeout_ms: u64 },

    #[error("Task bridge closed")]
    BridgeClosed,

    #[error("Attempt {attempt} for '{key}' recorded out of sequence")]
    DuplicateAttempt { key: String, attempt: u32 },

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Server at {url} unreachable after {attempts} attempts")]
    ServerUnreachable { url: String, attempts: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Coarse classification used by attempts and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Navigation,
    Assertion,
    NotInteractable,
    Hook,
    Engine,
    Task,
    Fatal,
}

impl E2eError {
    pub fn kind(&self) -> FailureKind {
        match self {
            E2eError::Navigation { .. } => FailureKind::Navigation,
            E2eError::AssertionTimeout { .. } => FailureKind::Assertion,
            E2eError::ElementNotInteractable { .. } => FailureKind::NotInteractable,
            E2eError::Hook { .. } => FailureKind::Hook,
            E2eError::TaskNotHandled(_)
            | E2eError::TaskTimeout { .. }
            | E2eError::BridgeClosed => FailureKind::Task,
            E2eError::RunnerFatal(_)
            | E2eError::InvalidPattern { .. }
            | E2eError::InvalidPhaseTransition { .. }
            | E2eError::DuplicateAttempt { .. }
            | E2eError::ServerUnreachable { .. }
            | E2eError::Config(_) => FailureKind::Fatal,
            _ => FailureKind::Engine,
        }
    }

    /// Expected/actual pair for failures that carry one
    pub fn expectation(&self) -> Option<(String, String)> {
        match self {
            E2eError::AssertionTimeout { expected, actual, .. } => {
                Some((expected.clone(), actual.clone()))
            }
            E2eError::Hook { source, .. } => source.expectation(),
            _ => None,
        }
    }

    /// Wrap an error raised inside a hook body
    pub fn into_hook(self, phase: impl Into<String>) -> Self {
        match self {
            hook @ E2eError::Hook { .. } => hook,
            other => E2eError::Hook {
                phase: phase.into(),
                source: Box::new(other),
            },
        }
    }
}
