//! Retried UI commands on top of an [`AutomationEngine`]

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::engine::AutomationEngine;
use crate::error::{E2eError, E2eResult};
use crate::retry::{CommandPolicy, PollOutcome, Probe};

/// Generic command layer: every assertion polls, every click waits for actionability
#[derive(Clone)]
pub struct Commands {
    engine: Arc<dyn AutomationEngine>,
    base_url: String,
    policy: CommandPolicy,
    click_policy: CommandPolicy,
}

impl Commands {
    pub fn new(
        engine: Arc<dyn AutomationEngine>,
        base_url: impl Into<String>,
        policy: CommandPolicy,
        click_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            click_policy: policy.with_timeout(click_timeout),
            policy,
        }
    }

    /// Absolute URL for `path`; absolute URLs pass through
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub async fn visit(&self, path: &str) -> E2eResult<()> {
        let url = self.url_for(path);
        debug!("visit {}", url);
        match tokio::time::timeout(self.policy.timeout, self.engine.visit(&url, self.policy.timeout)).await {
            Ok(result) => result,
            Err(_) => Err(E2eError::Navigation {
                url,
                reason: format!("page did not load within {} ms", self.policy.timeout_ms()),
            }),
        }
    }

    /// Poll the element's text until it equals `expected`
    pub async fn should_have_text(&self, selector: &str, expected: &str) -> E2eResult<()> {
        let outcome = self
            .policy
            .poll(|| async move {
                Ok(match self.engine.text_content(selector).await? {
                    Some(text) if text.trim() == expected => Probe::Ready(()),
                    Some(text) => Probe::Pending(text.trim().to_string()),
                    None => Probe::Pending("<element not found>".to_string()),
                })
            })
            .await?;
        match outcome {
            PollOutcome::Matched { polls, .. } => {
                debug!("{} has text '{}' after {} polls", selector, expected, polls);
                Ok(())
            }
            PollOutcome::TimedOut { last_observed, .. } => Err(E2eError::AssertionTimeout {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual: last_observed,
                timeout_ms: self.policy.timeout_ms(),
            }),
        }
    }

    /// Wait until the element can receive a click. `force` only requires it to exist.
    pub async fn wait_actionable(&self, selector: &str, force: bool) -> E2eResult<()> {
        let outcome = self
            .click_policy
            .poll(|| async move {
                let state = self.engine.actionability(selector).await?;
                let blocker = if force {
                    (!state.attached).then_some("element not found")
                } else {
                    state.blocker()
                };
                Ok(match blocker {
                    None => Probe::Ready(()),
                    Some(reason) => Probe::Pending(reason.to_string()),
                })
            })
            .await?;
        match outcome {
            PollOutcome::Matched { .. } => Ok(()),
            PollOutcome::TimedOut { last_observed, .. } => Err(E2eError::ElementNotInteractable {
                selector: selector.to_string(),
                reason: last_observed,
                timeout_ms: self.click_policy.timeout_ms(),
            }),
        }
    }

    pub async fn click(&self, selector: &str, force: bool) -> E2eResult<()> {
        self.wait_actionable(selector, force).await?;
        debug!("click {}{}", selector, if force { " (forced)" } else { "" });
        self.engine.click(selector).await
    }

    pub async fn dblclick(&self, selector: &str) -> E2eResult<()> {
        self.wait_actionable(selector, false).await?;
        debug!("dblclick {}", selector);
        self.engine.dblclick(selector).await
    }

    pub async fn focus(&self, selector: &str) -> E2eResult<()> {
        self.wait_actionable(selector, true).await?;
        self.engine.focus(selector).await
    }

    pub async fn should_be_focused(&self, id: &str) -> E2eResult<()> {
        let outcome = self
            .policy
            .poll(|| async move {
                Ok(match self.engine.focused_id().await? {
                    Some(focused) if focused == id => Probe::Ready(()),
                    Some(focused) => Probe::Pending(format!("#{}", focused)),
                    None => Probe::Pending("<nothing focused>".to_string()),
                })
            })
            .await?;
        self.expect_matched(outcome, "focused element", &format!("#{}", id))
    }

    pub async fn should_be_visible(&self, selector: &str) -> E2eResult<()> {
        let outcome = self
            .policy
            .poll(|| async move {
                let state = self.engine.actionability(selector).await?;
                Ok(match (state.attached, state.visible) {
                    (true, true) => Probe::Ready(()),
                    (false, _) => Probe::Pending("not found".to_string()),
                    (true, false) => Probe::Pending("hidden".to_string()),
                })
            })
            .await?;
        self.expect_matched(outcome, selector, "visible")
    }

    pub async fn should_be_enabled(&self, selector: &str) -> E2eResult<()> {
        let outcome = self
            .policy
            .poll(|| async move {
                let state = self.engine.actionability(selector).await?;
                Ok(match (state.attached, state.enabled) {
                    (true, true) => Probe::Ready(()),
                    (false, _) => Probe::Pending("not found".to_string()),
                    (true, false) => Probe::Pending("disabled".to_string()),
                })
            })
            .await?;
        self.expect_matched(outcome, selector, "enabled")
    }

    /// Focus the element, then press each key of `text`
    pub async fn type_text(&self, selector: &str, text: &str) -> E2eResult<()> {
        let keys = parse_key_sequence(text)?;
        self.wait_actionable(selector, false).await?;
        self.engine.focus(selector).await?;
        for key in keys {
            debug!("press {}", key);
            self.engine.press(&key).await?;
        }
        Ok(())
    }

    fn expect_matched(&self, outcome: PollOutcome<()>, subject: &str, expected: &str) -> E2eResult<()> {
        match outcome {
            PollOutcome::Matched { .. } => Ok(()),
            PollOutcome::TimedOut { last_observed, .. } => Err(E2eError::AssertionTimeout {
                selector: subject.to_string(),
                expected: expected.to_string(),
                actual: last_observed,
                timeout_ms: self.policy.timeout_ms(),
            }),
        }
    }
}

/// Split typed text into key presses; `{enter}`-style sequences name special keys
pub fn parse_key_sequence(text: &str) -> E2eResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if c == '{' {
            let end = rest
                .find('}')
                .ok_or_else(|| E2eError::SpecParse(format!("unterminated key sequence in '{}'", text)))?;
            let name = &rest[1..end];
            let key = match name.to_ascii_lowercase().as_str() {
                "enter" => "Enter",
                "esc" => "Escape",
                "backspace" => "Backspace",
                "del" => "Delete",
                "tab" => "Tab",
                "space" => "Space",
                "uparrow" => "ArrowUp",
                "downarrow" => "ArrowDown",
                "leftarrow" => "ArrowLeft",
                "rightarrow" => "ArrowRight",
                "{" => "{",
                other => {
                    return Err(E2eError::SpecParse(format!(
                        "unknown key sequence '{{{}}}'",
                        other
                    )))
                }
            };
            keys.push(key.to_string());
            rest = &rest[end + 1..];
        } else {
            keys.push(c.to_string());
            rest = &rest[c.len_utf8()..];
        }
    }

    Ok(keys)
}
