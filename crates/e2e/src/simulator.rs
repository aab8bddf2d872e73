//! In-memory counter application
//!
//! Implements [`AutomationEngine`] against a simulated page that honours the
//! counter selector contract. Used for offline runs (`--engine simulated`)
//! and throughout the test suite. By default it reproduces the known defect
//! of the real application: decrementing below zero is allowed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::engine::{Actionability, AutomationEngine, EngineFactory, SessionOptions};
use crate::error::{E2eError, E2eResult};
use crate::page::{COUNTER, DECREMENT_BUTTON, INCREMENT_BUTTON};

/// 1x1 transparent PNG written for screenshots
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Reproduce the negative-value defect
    pub allow_negative: bool,
    /// Fail this many visits per session before loading succeeds
    pub fail_first_visits: u32,
    /// Paths that load; anything else is a 404
    pub routes: Vec<String>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            allow_negative: true,
            fail_first_visits: 0,
            routes: vec!["/".to_string()],
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    loaded: bool,
    value: i64,
    focused: Option<String>,
    visits: u32,
    failed_visits: u32,
    disabled: HashSet<String>,
    hidden: HashSet<String>,
    obscured: HashSet<String>,
    clicks: HashMap<String, u32>,
    closed: bool,
}

pub struct SimulatedCounterApp {
    config: SimulatorConfig,
    state: Mutex<SimState>,
}

impl SimulatedCounterApp {
    pub fn new() -> Self {
        Self::with_config(SimulatorConfig::default())
    }

    pub fn with_config(config: SimulatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn value(&self) -> i64 {
        self.state.lock().value
    }

    pub fn visits(&self) -> u32 {
        self.state.lock().visits
    }

    pub fn clicks(&self, selector: &str) -> u32 {
        self.state.lock().clicks.get(selector).copied().unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn set_disabled(&self, selector: &str, disabled: bool) {
        toggle(&mut self.state.lock().disabled, selector, disabled);
    }

    pub fn set_hidden(&self, selector: &str, hidden: bool) {
        toggle(&mut self.state.lock().hidden, selector, hidden);
    }

    pub fn set_obscured(&self, selector: &str, obscured: bool) {
        toggle(&mut self.state.lock().obscured, selector, obscured);
    }

    fn is_element(selector: &str) -> bool {
        matches!(selector, COUNTER | INCREMENT_BUTTON | DECREMENT_BUTTON)
    }

    fn is_button(selector: &str) -> bool {
        matches!(selector, INCREMENT_BUTTON | DECREMENT_BUTTON)
    }

    fn require_element(state: &SimState, selector: &str) -> E2eResult<()> {
        if state.closed {
            return Err(E2eError::Playwright("page has been closed".into()));
        }
        if !state.loaded || !Self::is_element(selector) {
            return Err(E2eError::Playwright(format!("no element matches {}", selector)));
        }
        Ok(())
    }

    fn activate(&self, state: &mut SimState, selector: &str) {
        *state.clicks.entry(selector.to_string()).or_insert(0) += 1;
        // Disabled buttons swallow clicks, like the browser does
        if state.disabled.contains(selector) {
            return;
        }
        match selector {
            INCREMENT_BUTTON => state.value += 1,
            DECREMENT_BUTTON => {
                state.value -= 1;
                if !self.config.allow_negative && state.value < 0 {
                    state.value = 0;
                }
            }
            _ => {}
        }
    }
}

impl Default for SimulatedCounterApp {
    fn default() -> Self {
        Self::new()
    }
}

fn toggle(set: &mut HashSet<String>, selector: &str, on: bool) {
    if on {
        set.insert(selector.to_string());
    } else {
        set.remove(selector);
    }
}

fn path_of(url: &str) -> &str {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match after_scheme.find('/') {
        Some(idx) => {
            let path = &after_scheme[idx..];
            path.split(['?', '#']).next().unwrap_or("/")
        }
        None => "/",
    }
}

#[async_trait]
impl AutomationEngine for SimulatedCounterApp {
    async fn visit(&self, url: &str, _timeout: Duration) -> E2eResult<()> {
        let mut state = self.state.lock();
        state.visits += 1;
        if state.failed_visits < self.config.fail_first_visits {
            state.failed_visits += 1;
            return Err(E2eError::Navigation {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let path = path_of(url);
        if !self.config.routes.iter().any(|r| r == path) {
            return Err(E2eError::Navigation {
                url: url.to_string(),
                reason: "404 Not Found".to_string(),
            });
        }
        debug!("simulator loaded {}", url);
        state.loaded = true;
        state.closed = false;
        state.value = 0;
        state.focused = None;
        Ok(())
    }

    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>> {
        let state = self.state.lock();
        if !state.loaded || !Self::is_element(selector) {
            return Ok(None);
        }
        Ok(Some(match selector {
            COUNTER => state.value.to_string(),
            INCREMENT_BUTTON => "Increment".to_string(),
            _ => "Decrement".to_string(),
        }))
    }

    async fn actionability(&self, selector: &str) -> E2eResult<Actionability> {
        let state = self.state.lock();
        if !state.loaded || !Self::is_element(selector) {
            return Ok(Actionability::detached());
        }
        Ok(Actionability {
            attached: true,
            visible: !state.hidden.contains(selector),
            enabled: !state.disabled.contains(selector),
            obscured: state.obscured.contains(selector),
        })
    }

    async fn click(&self, selector: &str) -> E2eResult<()> {
        let mut state = self.state.lock();
        Self::require_element(&state, selector)?;
        if Self::is_button(selector) {
            state.focused = Some(selector.trim_start_matches('#').to_string());
        }
        self.activate(&mut state, selector);
        Ok(())
    }

    async fn dblclick(&self, selector: &str) -> E2eResult<()> {
        let mut state = self.state.lock();
        Self::require_element(&state, selector)?;
        self.activate(&mut state, selector);
        self.activate(&mut state, selector);
        Ok(())
    }

    async fn focus(&self, selector: &str) -> E2eResult<()> {
        let mut state = self.state.lock();
        Self::require_element(&state, selector)?;
        if Self::is_button(selector) {
            state.focused = Some(selector.trim_start_matches('#').to_string());
        }
        Ok(())
    }

    async fn focused_id(&self) -> E2eResult<Option<String>> {
        Ok(self.state.lock().focused.clone())
    }

    async fn press(&self, key: &str) -> E2eResult<()> {
        let mut state = self.state.lock();
        let focused = state.focused.clone();
        if let Some(id) = focused {
            if matches!(key, "Enter" | "Space") {
                let selector = format!("#{}", id);
                self.activate(&mut state, &selector);
            }
        }
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, PLACEHOLDER_PNG)?;
        Ok(())
    }

    async fn close(&self) -> E2eResult<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.loaded = false;
        Ok(())
    }
}

/// Launches a fresh simulated page per spec file and keeps every session for inspection
#[derive(Default)]
pub struct SimulatorFactory {
    config: SimulatorConfig,
    sessions: Mutex<Vec<Arc<SimulatedCounterApp>>>,
}

impl SimulatorFactory {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn sessions(&self) -> Vec<Arc<SimulatedCounterApp>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl EngineFactory for SimulatorFactory {
    async fn launch(&self, options: &SessionOptions) -> E2eResult<Arc<dyn AutomationEngine>> {
        debug!("Launching simulated session for {}", options.spec_name);
        let app = Arc::new(SimulatedCounterApp::with_config(self.config.clone()));
        self.sessions.lock().push(app.clone());
        Ok(app)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
