//! Lifecycle phases and hook dispatch
//!
//! Each spec file walks a small state machine:
//!
//! ```text
//! NotStarted -> SpecSetup -> ( SuiteSetup -> [ TestSetup -> TestBody -> TestTeardown ]* -> SuiteTeardown )* -> SpecTeardown -> Done
//! ```
//!
//! Nested suites re-enter `SuiteSetup`. Hooks are collected into a stack of
//! [`HookScope`]s (support file, spec root, outer suite ... inner suite) so
//! per-test hooks run outer to inner before a test and inner to outer after it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};
use crate::interpreter::{StepInterpreter, StepResult};
use crate::spec::{HookKind, HookNode, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecPhase {
    NotStarted,
    SpecSetup,
    SuiteSetup,
    TestSetup,
    TestBody,
    TestTeardown,
    SuiteTeardown,
    SpecTeardown,
    Done,
}

impl SpecPhase {
    pub fn can_transition_to(self, next: SpecPhase) -> bool {
        use SpecPhase::*;
        matches!(
            (self, next),
            (NotStarted, SpecSetup)
                | (SpecSetup, SuiteSetup | TestSetup | SpecTeardown)
                | (SuiteSetup, SuiteSetup | TestSetup | SuiteTeardown)
                | (TestSetup, TestBody | TestTeardown)
                | (TestBody, TestTeardown)
                | (TestTeardown, TestSetup | SuiteSetup | SuiteTeardown | SpecTeardown)
                | (SuiteTeardown, SuiteSetup | SuiteTeardown | TestSetup | SpecTeardown)
                | (SpecTeardown, Done)
        )
    }
}

impl fmt::Display for SpecPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks the phase of one spec file and rejects illegal transitions
#[derive(Debug)]
pub struct Lifecycle {
    spec: String,
    phase: SpecPhase,
}

impl Lifecycle {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            phase: SpecPhase::NotStarted,
        }
    }

    pub fn phase(&self) -> SpecPhase {
        self.phase
    }

    pub fn advance(&mut self, next: SpecPhase) -> E2eResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(E2eError::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!("[{}] {} -> {}", self.spec, self.phase, next);
        self.phase = next;
        Ok(())
    }
}

/// Named hook phases as they appear in reports and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookPhase {
    BeforeAllSpecs,
    AfterAllSpecs,
    BeforeEachSpec,
    AfterEachSpec,
    BeforeSuite,
    AfterSuite,
    BeforeEachTest,
    AfterEachTest,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::BeforeAllSpecs => "beforeAllSpecs",
            HookPhase::AfterAllSpecs => "afterAllSpecs",
            HookPhase::BeforeEachSpec => "beforeEachSpec",
            HookPhase::AfterEachSpec => "afterEachSpec",
            HookPhase::BeforeSuite => "beforeSuite",
            HookPhase::AfterSuite => "afterSuite",
            HookPhase::BeforeEachTest => "beforeEachTest",
            HookPhase::AfterEachTest => "afterEachTest",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a scope's hooks were declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeLevel {
    Support,
    SpecRoot,
    Suite,
}

/// Hooks declared directly in one scope, in declaration order
#[derive(Debug, Clone)]
pub struct HookScope {
    pub level: ScopeLevel,
    pub label: String,
    pub hooks: Vec<HookNode>,
}

impl HookScope {
    pub fn new(level: ScopeLevel, label: impl Into<String>, hooks: Vec<HookNode>) -> Self {
        Self {
            level,
            label: label.into(),
            hooks,
        }
    }

    /// Collect the hook children of a node list, wherever they sit among siblings
    pub fn from_nodes(level: ScopeLevel, label: impl Into<String>, nodes: &[Node]) -> Self {
        let hooks = nodes
            .iter()
            .filter_map(|n| match n {
                Node::Hook(h) => Some(h.clone()),
                _ => None,
            })
            .collect();
        Self::new(level, label, hooks)
    }

    pub fn of_kind(&self, kind: HookKind) -> impl Iterator<Item = &HookNode> {
        self.hooks.iter().filter(move |h| h.hook == kind)
    }

    /// Phase a `before`/`after` hook of this scope maps to
    pub fn phase_for(&self, kind: HookKind) -> HookPhase {
        match (self.level, kind) {
            (_, HookKind::BeforeEach) => HookPhase::BeforeEachTest,
            (_, HookKind::AfterEach) => HookPhase::AfterEachTest,
            (ScopeLevel::Support, HookKind::Before) => HookPhase::BeforeAllSpecs,
            (ScopeLevel::Support, HookKind::After) => HookPhase::AfterAllSpecs,
            (ScopeLevel::SpecRoot, HookKind::Before) => HookPhase::BeforeEachSpec,
            (ScopeLevel::SpecRoot, HookKind::After) => HookPhase::AfterEachSpec,
            (ScopeLevel::Suite, HookKind::Before) => HookPhase::BeforeSuite,
            (ScopeLevel::Suite, HookKind::After) => HookPhase::AfterSuite,
        }
    }
}

/// Record of one executed hook body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookRun {
    pub phase: HookPhase,
    pub scope: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

/// Runs hook bodies through the step interpreter
pub struct HookDispatcher<'a> {
    interpreter: &'a StepInterpreter,
}

impl<'a> HookDispatcher<'a> {
    pub fn new(interpreter: &'a StepInterpreter) -> Self {
        Self { interpreter }
    }

    /// Run the `kind` hooks of a single scope in declaration order.
    /// The first failing body aborts the rest and is returned as a hook error.
    pub async fn run_scope(
        &self,
        scope: &HookScope,
        kind: HookKind,
        runs: &mut Vec<HookRun>,
    ) -> E2eResult<()> {
        let phase = scope.phase_for(kind);
        for hook in scope.of_kind(kind) {
            self.run_hook(phase, &scope.label, hook, runs).await?;
        }
        Ok(())
    }

    /// `beforeEachTest` chain, outer to inner
    pub async fn before_each_test(&self, stack: &[HookScope], runs: &mut Vec<HookRun>) -> E2eResult<()> {
        for scope in stack {
            self.run_scope(scope, HookKind::BeforeEach, runs).await?;
        }
        Ok(())
    }

    /// `afterEachTest` chain, inner to outer. A failing scope stops only its own
    /// remaining hooks; outer scopes still tear down. The first failure is returned.
    pub async fn after_each_test(&self, stack: &[HookScope], runs: &mut Vec<HookRun>) -> E2eResult<()> {
        let mut first_error = None;
        for scope in stack.iter().rev() {
            if let Err(e) = self.run_scope(scope, HookKind::AfterEach, runs).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_hook(
        &self,
        phase: HookPhase,
        scope: &str,
        hook: &HookNode,
        runs: &mut Vec<HookRun>,
    ) -> E2eResult<()> {
        let start = Instant::now();
        debug!("{} hook in '{}'", phase, scope);
        let run = self.interpreter.run_steps(&hook.steps).await;

        let error = run.error.map(|e| e.into_hook(phase.as_str()));
        runs.push(HookRun {
            phase,
            scope: scope.to_string(),
            success: error.is_none(),
            duration_ms: start.elapsed().as_millis() as u64,
            steps: run.steps,
            error: error.as_ref().map(|e| e.to_string()),
        });

        match error {
            Some(e) => {
                warn!("{} hook in '{}' failed: {}", phase, scope, e);
                Err(e)
            }
            None => Ok(()),
        }
    }
}
