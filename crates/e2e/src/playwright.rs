//! Playwright browser automation
//!
//! Each session runs a small generated node driver that keeps one browser page
//! open and answers JSON-line requests on stdin/stdout:
//!
//! ```text
//! -> {"id":3,"op":"text","selector":"#counter"}
//! <- {"id":3,"ok":true,"value":"1"}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::engine::{Actionability, AutomationEngine, EngineFactory, SessionOptions};
use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn parse(name: &str) -> E2eResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unsupported browser '{}'", other))),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Directory whose `node_modules` provides the `playwright` package
    pub project_root: PathBuf,
}

impl PlaywrightConfig {
    pub fn from_harness(config: &HarnessConfig) -> E2eResult<Self> {
        Ok(Self {
            browser: Browser::parse(&config.browser.name)?,
            viewport_width: config.browser.viewport_width,
            viewport_height: config.browser.viewport_height,
            project_root: config.project_root.clone(),
        })
    }
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            viewport_width: 1280,
            viewport_height: 720,
            project_root: PathBuf::from("."),
        }
    }
}

/// Check if Playwright is installed
pub async fn check_playwright_installed() -> E2eResult<()> {
    if command_succeeds("npx", &["playwright", "--version"]).await {
        Ok(())
    } else {
        Err(E2eError::PlaywrightNotFound)
    }
}

async fn command_succeeds(program: &str, args: &[&str]) -> bool {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    matches!(status, Ok(status) if status.success())
}

/// Build the driver script for one session
pub fn build_driver_script(config: &PlaywrightConfig, options: &SessionOptions) -> E2eResult<String> {
    let mut context_options = json!({
        "viewport": { "width": config.viewport_width, "height": config.viewport_height }
    });
    if let Some(dir) = &options.video_dir {
        context_options["recordVideo"] = json!({
            "dir": dir.to_string_lossy(),
            "size": { "width": config.viewport_width, "height": config.viewport_height }
        });
    }

    Ok(format!(
        r#"
const {{ {browser} }} = require('playwright');
const readline = require('readline');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({context});
  const page = await context.newPage();

  const handlers = {{
    goto: async (r) => {{
      const resp = await page.goto(r.url, {{ timeout: r.timeout }});
      if (!resp || !resp.ok()) {{
        throw new Error(resp ? 'HTTP ' + resp.status() : 'no response');
      }}
      return null;
    }},
    text: async (r) => {{
      const el = await page.$(r.selector);
      return el ? await el.textContent() : null;
    }},
    actionability: async (r) => {{
      const el = await page.$(r.selector);
      if (!el) return {{ attached: false, visible: false, enabled: false, obscured: false }};
      const visible = await el.isVisible();
      const enabled = await el.isEnabled();
      const obscured = await el.evaluate((node) => {{
        const box = node.getBoundingClientRect();
        const top = document.elementFromPoint(box.left + box.width / 2, box.top + box.height / 2);
        return !!top && top !== node && !node.contains(top);
      }});
      return {{ attached: true, visible, enabled, obscured }};
    }},
    click: async (r) => {{ await page.click(r.selector, {{ force: true }}); return null; }},
    dblclick: async (r) => {{ await page.dblclick(r.selector, {{ force: true }}); return null; }},
    focus: async (r) => {{ await page.focus(r.selector); return null; }},
    focused: async () => page.evaluate(() => (document.activeElement && document.activeElement.id) || null),
    press: async (r) => {{ await page.keyboard.press(r.key); return null; }},
    screenshot: async (r) => {{ await page.screenshot({{ path: r.path }}); return null; }},
    close: async () => {{ await context.close(); await browser.close(); return null; }},
  }};

  const rl = readline.createInterface({{ input: process.stdin }});
  for await (const line of rl) {{
    let req;
    try {{ req = JSON.parse(line); }} catch (e) {{ continue; }}
    try {{
      const handler = handlers[req.op];
      if (!handler) throw new Error('unknown op ' + req.op);
      const value = await handler(req);
      process.stdout.write(JSON.stringify({{ id: req.id, ok: true, value }}) + '\n');
    }} catch (error) {{
      process.stdout.write(JSON.stringify({{ id: req.id, ok: false, error: error.message }}) + '\n');
    }}
    if (req.op === 'close') process.exit(0);
  }}
}})();
"#,
        browser = config.browser.as_str(),
        headless = options.headless,
        context = serde_json::to_string(&context_options)?,
    ))
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    op: &'a str,
    #[serde(flatten)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

struct DriverIo {
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

/// One browser page driven through a node process
pub struct PlaywrightSession {
    io: Mutex<DriverIo>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    _script_dir: TempDir,
}

impl PlaywrightSession {
    pub async fn spawn(config: &PlaywrightConfig, options: &SessionOptions) -> E2eResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(&script_path, build_driver_script(config, options)?)?;
        if let Some(dir) = &options.video_dir {
            std::fs::create_dir_all(dir)?;
        }

        debug!("Starting Playwright driver: {}", script_path.display());

        let mut child = Command::new("node")
            .arg(&script_path)
            .current_dir(&config.project_root)
            .env("NODE_PATH", config.project_root.join("node_modules"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("driver stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("driver stdout unavailable".into()))?;

        info!(
            "Playwright session for '{}' ({}, headless: {})",
            options.spec_name,
            config.browser.as_str(),
            options.headless
        );

        Ok(Self {
            io: Mutex::new(DriverIo {
                stdin,
                lines: BufReader::new(stdout).lines(),
            }),
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            _script_dir: script_dir,
        })
    }

    async fn call(&self, op: &str, args: Value) -> E2eResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_string(&Request { id, op, args })?;
        line.push('\n');

        let mut io = self.io.lock().await;
        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.flush().await?;

        loop {
            let Some(raw) = io.lines.next_line().await? else {
                return Err(E2eError::Playwright(format!("driver exited during '{}'", op)));
            };
            match serde_json::from_str::<Response>(&raw) {
                Ok(resp) if resp.id == id => {
                    return if resp.ok {
                        Ok(resp.value)
                    } else {
                        Err(E2eError::Playwright(
                            resp.error.unwrap_or_else(|| format!("'{}' failed", op)),
                        ))
                    };
                }
                Ok(resp) => warn!("Ignoring stale driver response #{}", resp.id),
                Err(_) => debug!("driver: {}", raw),
            }
        }
    }
}

#[async_trait]
impl AutomationEngine for PlaywrightSession {
    async fn visit(&self, url: &str, timeout: Duration) -> E2eResult<()> {
        self.call("goto", json!({ "url": url, "timeout": timeout.as_millis() as u64 }))
            .await
            .map(|_| ())
            .map_err(|e| E2eError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>> {
        let value = self.call("text", json!({ "selector": selector })).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn actionability(&self, selector: &str) -> E2eResult<Actionability> {
        let value = self.call("actionability", json!({ "selector": selector })).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn click(&self, selector: &str) -> E2eResult<()> {
        self.call("click", json!({ "selector": selector })).await.map(|_| ())
    }

    async fn dblclick(&self, selector: &str) -> E2eResult<()> {
        self.call("dblclick", json!({ "selector": selector })).await.map(|_| ())
    }

    async fn focus(&self, selector: &str) -> E2eResult<()> {
        self.call("focus", json!({ "selector": selector })).await.map(|_| ())
    }

    async fn focused_id(&self) -> E2eResult<Option<String>> {
        let value = self.call("focused", json!({})).await?;
        Ok(value.as_str().filter(|s| !s.is_empty()).map(str::to_string))
    }

    async fn press(&self, key: &str) -> E2eResult<()> {
        self.call("press", json!({ "key": key })).await.map(|_| ())
    }

    async fn screenshot(&self, path: &Path) -> E2eResult<()> {
        self.call("screenshot", json!({ "path": path.to_string_lossy() }))
            .await
            .map(|_| ())
    }

    async fn close(&self) -> E2eResult<()> {
        let result = self.call("close", json!({})).await.map(|_| ());
        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(10), child.wait()).await {
            Ok(status) => debug!("Playwright driver exited: {:?}", status?),
            Err(_) => {
                warn!("Playwright driver did not exit, killing it");
                child.kill().await?;
            }
        }
        result
    }
}

/// Launches one Playwright session per spec file
pub struct PlaywrightFactory {
    config: PlaywrightConfig,
    installed: AtomicBool,
}

impl PlaywrightFactory {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self {
            config,
            installed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EngineFactory for PlaywrightFactory {
    /// The first launch fails with [`E2eError::PlaywrightNotFound`] when `npx playwright` is unavailable
    async fn launch(&self, options: &SessionOptions) -> E2eResult<Arc<dyn AutomationEngine>> {
        if !self.installed.load(Ordering::SeqCst) {
            check_playwright_installed().await?;
            self.installed.store(true, Ordering::SeqCst);
        }
        Ok(Arc::new(PlaywrightSession::spawn(&self.config, options).await?))
    }

    fn name(&self) -> &'static str {
        "playwright"
    }
}
