//! Executes spec steps against the page object, the command layer and the task bridge

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::bridge::TaskBridge;
use crate::commands::Commands;
use crate::error::{E2eError, E2eResult};
use crate::page::CounterPage;
use crate::spec::TestStep;

/// Result of executing a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub command: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Results of a step list; `error` is the failure that stopped it, if any
#[derive(Debug, Default)]
pub struct StepsRun {
    pub steps: Vec<StepResult>,
    pub error: Option<E2eError>,
}

impl StepsRun {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

pub struct StepInterpreter {
    commands: Commands,
    bridge: TaskBridge,
}

impl StepInterpreter {
    pub fn new(commands: Commands, bridge: TaskBridge) -> Self {
        Self { commands, bridge }
    }

    /// Run steps in order, stopping at the first failure
    pub async fn run_steps(&self, steps: &[TestStep]) -> StepsRun {
        let mut run = StepsRun::default();

        for step in steps {
            let start = Instant::now();
            let step_name = step.label();
            debug!("Executing step: {}", step_name);

            let result = self.execute_step(step).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(()) => run.steps.push(StepResult {
                    success: true,
                    step_name,
                    command: step.command().to_string(),
                    duration_ms,
                    error: None,
                }),
                Err(e) => {
                    run.steps.push(StepResult {
                        success: false,
                        step_name,
                        command: step.command().to_string(),
                        duration_ms,
                        error: Some(e.to_string()),
                    });
                    run.error = Some(e);
                    break;
                }
            }
        }

        run
    }

    pub async fn execute_step(&self, step: &TestStep) -> E2eResult<()> {
        let page = CounterPage::new(&self.commands);

        match step {
            TestStep::Visit { path } if path == "/" => page.visit().await,
            TestStep::Visit { path } => self.commands.visit(path).await,
            TestStep::AssertValue { value } => page.assert_value(*value).await,
            TestStep::Increment { times } => page.increment_by(*times).await,
            TestStep::Decrement { times } => page.decrement_by(*times).await,
            TestStep::Click { selector, force } => self.commands.click(selector, *force).await,
            TestStep::Dblclick { selector } => self.commands.dblclick(selector).await,
            TestStep::Focus { selector } => self.commands.focus(selector).await,
            TestStep::AssertFocused { id } => self.commands.should_be_focused(id).await,
            TestStep::Type { selector, text } => self.commands.type_text(selector, text).await,
            TestStep::AssertVisible { selector } => self.commands.should_be_visible(selector).await,
            TestStep::AssertEnabled { selector } => self.commands.should_be_enabled(selector).await,
            TestStep::AssertText { selector, text } => {
                self.commands.should_have_text(selector, text).await
            }
            TestStep::Log { message } => self.bridge.log(message).await,
            TestStep::Task { name, arg } => {
                self.bridge.send(name, arg.clone()).await?;
                Ok(())
            }
        }
    }
}
