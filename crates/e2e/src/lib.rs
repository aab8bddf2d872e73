//! counterprobe E2E harness
//!
//! Drives a counter web application through declarative YAML specs:
//! - Discovers spec files with a glob and parses them into explicit trees
//! - Runs lifecycle hooks around spec files, suites and tests
//! - Polls every command until it matches or times out, and retries whole tests
//! - Streams results into a JSON/HTML report
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SpecRunner (Rust)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RunContext (config, base URL, mode, support hooks, bridge) │
//! │    └── per spec file                                        │
//! │          ├── EngineFactory::launch() -> AutomationEngine    │
//! │          ├── Lifecycle + HookDispatcher                     │
//! │          ├── StepInterpreter -> CounterPage -> Commands     │
//! │          └── Reporter::record_attempt() -> partial flush    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Engines                                                    │
//! │    ├── playwright: node driver over JSON lines              │
//! │    └── simulated:  in-memory counter page                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TaskBridge ──mpsc──> TaskHost (stdout, transcript)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifacts;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod html;
pub mod interpreter;
pub mod page;
pub mod pattern;
pub mod playwright;
pub mod probe;
pub mod report;
pub mod retry;
pub mod runner;
pub mod simulator;
pub mod spec;

pub use config::{HarnessConfig, RunMode};
pub use error::{E2eError, E2eResult};
pub use page::CounterPage;
pub use report::{Report, Reporter};
pub use runner::{RunContext, RunOutcome, SpecRunner};
pub use spec::{SpecFile, TestStep};
