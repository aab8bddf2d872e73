//! Spec runner: discovery, per-file lifecycle, test retries and reporting

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::bridge::{self, TaskBridge, TaskHost};
use crate::commands::Commands;
use crate::config::{HarnessConfig, RunMode};
use crate::engine::{AutomationEngine, EngineFactory, SessionOptions};
use crate::error::{E2eError, E2eResult};
use crate::hooks::{HookDispatcher, HookRun, HookScope, Lifecycle, ScopeLevel, SpecPhase};
use crate::interpreter::StepInterpreter;
use crate::pattern::SpecPattern;
use crate::probe;
use crate::report::{
    AttemptReport, AttemptState, FailureDetail, Report, ReportArtifacts, Reporter, RunMeta, TestId,
};
use crate::retry::{CommandPolicy, TestRetryPolicy};
use crate::spec::{spec_name, HookKind, Node, SpecFile, SuiteNode, SupportFile, TestNode};

/// Everything resolved once at process start and shared by every spec file
pub struct RunContext {
    pub config: HarnessConfig,
    pub mode: RunMode,
    pub base_url: String,
    pub run_id: String,
    pub support: SupportFile,
    pub headless: bool,
    /// Probe the base URL before the first spec
    pub verify_server: bool,
    pub bridge: TaskBridge,
}

impl RunContext {
    /// Build the context and the (not yet spawned) task host serving its bridge
    pub fn new(config: HarnessConfig, mode: RunMode) -> E2eResult<(Self, TaskHost)> {
        let support = SupportFile::load(config.support_file.as_deref())?;
        let (bridge, host) = bridge::channel(bridge::DEFAULT_CAPACITY, config.task_timeout());
        let ctx = Self {
            base_url: config.resolve_base_url(),
            run_id: Uuid::new_v4().to_string(),
            support,
            headless: !mode.is_interactive(),
            verify_server: config.verify_server && !mode.is_interactive(),
            bridge,
            mode,
            config,
        };
        Ok((ctx, host))
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn command_policy(&self) -> CommandPolicy {
        CommandPolicy::new(self.config.command_timeout(), self.config.poll_interval())
    }
}

/// Discover spec files for a configuration, in lexical order
pub fn discover_specs(config: &HarnessConfig) -> E2eResult<Vec<PathBuf>> {
    let pattern = SpecPattern::new(&config.spec_pattern)?;
    pattern.discover(&config.project_root)
}

/// Result of a whole run
pub struct RunOutcome {
    pub report: Report,
    pub artifacts: ReportArtifacts,
    /// Error that aborted the run
    pub fatal: Option<E2eError>,
}

impl RunOutcome {
    /// Non-passing tests, plus errored spec files that no test accounts for
    pub fn failures(&self) -> usize {
        let spec_only = self
            .report
            .specs
            .iter()
            .filter(|s| s.errored)
            .filter(|s| s.root.all_tests().iter().all(|t| t.outcome.map(|o| o.is_pass()).unwrap_or(false)))
            .count();
        self.report.totals.not_passed() + spec_only
    }

    /// Process exit code: 1 on a fatal error, else the failure count capped at 255
    pub fn exit_code(&self) -> i32 {
        if self.fatal.is_some() {
            1
        } else {
            self.failures().min(255) as i32
        }
    }
}

/// Main E2E test runner
pub struct SpecRunner {
    ctx: RunContext,
    factory: Arc<dyn EngineFactory>,
    reporter: Reporter,
    artifacts: ArtifactStore,
}

impl SpecRunner {
    pub fn new(ctx: RunContext, factory: Arc<dyn EngineFactory>) -> Self {
        let meta = RunMeta {
            run_id: ctx.run_id.clone(),
            mode: ctx.mode,
            engine: factory.name().to_string(),
            base_url: ctx.base_url.clone(),
            command_timeout_ms: ctx.config.command_timeout_ms,
            click_timeout_ms: ctx.config.click_timeout_ms,
            retries: ctx.config.retries_for(ctx.mode),
            started_at: Utc::now(),
            ended_at: None,
            command_stats: Default::default(),
        };
        Self {
            reporter: Reporter::new(ctx.config.reporter.clone(), meta),
            artifacts: ArtifactStore::from_config(&ctx.config),
            factory,
            ctx,
        }
    }

    /// Run every discovered spec file. Fatal errors stop the run but the
    /// report gathered so far is still written.
    pub async fn run(self) -> RunOutcome {
        let fatal = self.run_all().await.err();
        if let Some(e) = &fatal {
            error!("Run aborted: {}", e);
        }

        let (report, artifacts) = match self.reporter.finish(fatal.as_ref().map(|e| e.to_string())) {
            Ok(done) => done,
            Err(e) => {
                error!("Failed to write report: {}", e);
                (self.reporter.snapshot(), ReportArtifacts::default())
            }
        };

        info!(
            "Test Results: {} passed, {} failed, {} errored, {} flaky ({} ms)",
            report.totals.passed,
            report.totals.failed,
            report.totals.errored,
            report.totals.flaky,
            report.totals.duration_ms
        );

        RunOutcome {
            report,
            artifacts,
            fatal,
        }
    }

    async fn run_all(&self) -> E2eResult<()> {
        let specs = discover_specs(&self.ctx.config)?;
        if specs.is_empty() {
            return Err(E2eError::RunnerFatal(format!(
                "no spec files found matching '{}' under {}",
                self.ctx.config.spec_pattern,
                self.ctx.config.project_root.display()
            )));
        }

        if self.ctx.verify_server {
            probe::wait_for_app(&self.ctx.base_url, self.ctx.config.command_timeout()).await?;
        }

        info!(
            "Running {} spec file(s) in {} mode against {}",
            specs.len(),
            self.ctx.mode,
            self.ctx.base_url
        );

        for path in &specs {
            match SpecFile::from_file(path) {
                Ok(spec) => self.run_spec_file(&spec).await?,
                Err(e) => {
                    error!("✗ {} - {}", path.display(), e);
                    self.reporter.declare_errored_spec(&spec_name(path), path, &e);
                    self.flush();
                }
            }
        }

        Ok(())
    }

    fn flush(&self) {
        if let Err(e) = self.reporter.flush_partial() {
            warn!("Failed to write partial report: {}", e);
        }
    }

    async fn run_spec_file(&self, spec: &SpecFile) -> E2eResult<()> {
        let start = Instant::now();
        let idx = self.reporter.declare_spec(spec);
        info!("Running: {} ({} tests)", spec.name, spec.test_count());

        let mut lifecycle = Lifecycle::new(&spec.name);
        lifecycle.advance(SpecPhase::SpecSetup)?;

        let options = SessionOptions {
            spec_name: spec.name.clone(),
            headless: self.ctx.headless,
            video_dir: self.artifacts.video_dir(&spec.name),
        };
        let session = self.factory.launch(&options).await.map_err(|e| {
            E2eError::RunnerFatal(format!("{} engine launch failed for {}: {}", self.factory.name(), spec.name, e))
        })?;

        let commands = Commands::new(
            session.clone(),
            self.ctx.base_url.as_str(),
            self.ctx.command_policy(),
            self.ctx.config.click_timeout(),
        );
        let interpreter = StepInterpreter::new(commands, self.ctx.bridge.clone());

        let mut exec = SpecExecution {
            runner: self,
            spec,
            idx,
            session: session.as_ref(),
            dispatcher: HookDispatcher::new(&interpreter),
            interpreter: &interpreter,
            lifecycle,
        };
        let result = exec.run().await;

        if let Err(e) = session.close().await {
            warn!("Closing {} session failed: {}", self.factory.name(), e);
        }
        self.reporter.finish_spec(idx, start.elapsed().as_millis() as u64);
        self.flush();
        result
    }
}

/// One plan entry of a flattened spec tree
enum PlanItem<'a> {
    Enter(&'a SuiteNode),
    Test { ordinal: usize, node: &'a TestNode },
    Exit,
}

fn plan<'a>(nodes: &'a [Node], ordinal: &mut usize, out: &mut Vec<PlanItem<'a>>) {
    for node in nodes {
        match node {
            Node::Suite(suite) => {
                out.push(PlanItem::Enter(suite));
                plan(&suite.children, ordinal, out);
                out.push(PlanItem::Exit);
            }
            Node::Test(test) => {
                out.push(PlanItem::Test {
                    ordinal: *ordinal,
                    node: test,
                });
                *ordinal += 1;
            }
            Node::Hook(_) => {}
        }
    }
}

/// Execution state of a single spec file
struct SpecExecution<'a> {
    runner: &'a SpecRunner,
    spec: &'a SpecFile,
    idx: usize,
    session: &'a dyn AutomationEngine,
    interpreter: &'a StepInterpreter,
    dispatcher: HookDispatcher<'a>,
    lifecycle: Lifecycle,
}

impl<'a> SpecExecution<'a> {
    async fn run(&mut self) -> E2eResult<()> {
        let support = HookScope::new(
            ScopeLevel::Support,
            "support",
            self.runner.ctx.support.hooks.clone(),
        );
        let root = HookScope::from_nodes(ScopeLevel::SpecRoot, &self.spec.name, &self.spec.children);

        let setup = match self.spec_hooks(&support, HookKind::Before).await {
            Ok(()) => self.spec_hooks(&root, HookKind::Before).await,
            Err(e) => Err(e),
        };

        match setup {
            Ok(()) => self.run_tree(vec![support.clone(), root.clone()]).await?,
            Err(e) => {
                error!("✗ {} - setup failed: {}", self.spec.name, e);
                self.runner.reporter.mark_spec_errored(self.idx, &e);
                for (ordinal, _) in self.spec.tests().iter().enumerate() {
                    self.record_skipped(ordinal, &e)?;
                }
            }
        }

        self.lifecycle.advance(SpecPhase::SpecTeardown)?;
        for (scope, label) in [(&root, "afterEachSpec"), (&support, "afterAllSpecs")] {
            if let Err(e) = self.spec_hooks(scope, HookKind::After).await {
                error!("✗ {} - {} failed: {}", self.spec.name, label, e);
                self.runner.reporter.mark_spec_errored(self.idx, &e);
            }
        }
        self.lifecycle.advance(SpecPhase::Done)
    }

    /// Run spec-level hooks of one scope and keep their records on the spec
    async fn spec_hooks(&self, scope: &HookScope, kind: HookKind) -> E2eResult<()> {
        let mut runs: Vec<HookRun> = Vec::new();
        let result = self.dispatcher.run_scope(scope, kind, &mut runs).await;
        for run in runs {
            self.runner.reporter.record_spec_hook(self.idx, run);
        }
        result
    }

    async fn run_tree(&mut self, mut stack: Vec<HookScope>) -> E2eResult<()> {
        let spec: &'a SpecFile = self.spec;
        let mut items = Vec::new();
        plan(&spec.children, &mut 0, &mut items);

        let mut suite_path: Vec<String> = Vec::new();
        // Depth of the suite whose `before` hook failed, with its error
        let mut skipping: Option<(usize, E2eError)> = None;

        for item in items {
            match item {
                PlanItem::Enter(suite) => {
                    self.lifecycle.advance(SpecPhase::SuiteSetup)?;
                    stack.push(HookScope::from_nodes(ScopeLevel::Suite, &suite.describe, &suite.children));
                    suite_path.push(suite.describe.clone());
                    if skipping.is_some() {
                        continue;
                    }
                    debug!("Entering suite '{}'", suite.describe);
                    let scope = stack.last().cloned();
                    if let Some(scope) = scope {
                        if let Err(e) = self.spec_hooks(&scope, HookKind::Before).await {
                            error!("✗ {} - beforeSuite failed: {}", suite.describe, e);
                            skipping = Some((stack.len(), e));
                        }
                    }
                }
                PlanItem::Test { ordinal, node } => match &skipping {
                    Some((_, e)) => self.record_skipped(ordinal, e)?,
                    None => self.run_test(ordinal, node, &stack, &suite_path).await?,
                },
                PlanItem::Exit => {
                    self.lifecycle.advance(SpecPhase::SuiteTeardown)?;
                    let depth = stack.len();
                    let run_after = match &skipping {
                        None => true,
                        Some((failed_at, _)) => *failed_at == depth,
                    };
                    if run_after {
                        if skipping.is_some() {
                            skipping = None;
                        }
                        if let Some(scope) = stack.last().cloned() {
                            if let Err(e) = self.spec_hooks(&scope, HookKind::After).await {
                                error!("✗ {} - afterSuite failed: {}", scope.label, e);
                                self.runner.reporter.mark_spec_errored(self.idx, &e);
                            }
                        }
                    }
                    stack.pop();
                    suite_path.pop();
                }
            }
        }

        Ok(())
    }

    /// Record a single errored attempt for a test that never ran
    fn record_skipped(&self, ordinal: usize, cause: &E2eError) -> E2eResult<()> {
        self.runner.reporter.record_attempt(
            TestId {
                spec: self.idx,
                ordinal,
            },
            AttemptReport {
                attempt: 1,
                state: AttemptState::Errored,
                started_at: Utc::now(),
                duration_ms: 0,
                hooks: Vec::new(),
                steps: Vec::new(),
                failure: Some(FailureDetail::from_error(cause)),
                teardown_error: None,
                screenshot: None,
            },
        )?;
        self.runner.flush();
        Ok(())
    }

    async fn run_test(
        &mut self,
        ordinal: usize,
        test: &TestNode,
        stack: &[HookScope],
        suite_path: &[String],
    ) -> E2eResult<()> {
        let runner: &'a SpecRunner = self.runner;
        let ctx = &runner.ctx;
        let policy = TestRetryPolicy::for_test(&ctx.config, ctx.mode, test.retries);
        let id = TestId {
            spec: self.idx,
            ordinal,
        };
        let mut attempt = 1;

        loop {
            let started_at = Utc::now();
            let start = Instant::now();
            let mut hooks = Vec::new();
            let mut steps = Vec::new();

            self.lifecycle.advance(SpecPhase::TestSetup)?;
            let (mut state, mut failure) = match self.dispatcher.before_each_test(stack, &mut hooks).await {
                Err(e) => (AttemptState::Errored, Some(e)),
                Ok(()) => {
                    self.lifecycle.advance(SpecPhase::TestBody)?;
                    let run = self.interpreter.run_steps(&test.steps).await;
                    steps = run.steps;
                    match run.error {
                        None => (AttemptState::Passed, None),
                        Some(e) => (AttemptState::Failed, Some(e)),
                    }
                }
            };
            self.lifecycle.advance(SpecPhase::TestTeardown)?;

            let mut teardown_error = None;
            if let Err(e) = self.dispatcher.after_each_test(stack, &mut hooks).await {
                if state.is_pass() {
                    state = AttemptState::Errored;
                    failure = Some(e);
                } else {
                    teardown_error = Some(e.to_string());
                }
            }

            let screenshot = if !state.is_pass() && ctx.config.screenshot_on_failure {
                match runner
                    .artifacts
                    .capture_failure(self.session, &self.spec.name, suite_path, &test.it, attempt)
                    .await
                {
                    Ok(shot) => Some(shot),
                    Err(e) => {
                        warn!("Screenshot failed for '{}': {}", test.it, e);
                        None
                    }
                }
            } else {
                None
            };

            let duration_ms = start.elapsed().as_millis() as u64;
            match (&state, &failure) {
                (AttemptState::Passed, _) => info!("✓ {} ({} ms)", test.it, duration_ms),
                (_, Some(e)) => error!("✗ {} (attempt {}) - {}", test.it, attempt, e),
                (_, None) => error!("✗ {} (attempt {})", test.it, attempt),
            }

            runner.reporter.record_attempt(
                id,
                AttemptReport {
                    attempt,
                    state,
                    started_at,
                    duration_ms,
                    hooks,
                    steps,
                    failure: failure.as_ref().map(FailureDetail::from_error),
                    teardown_error,
                    screenshot,
                },
            )?;
            runner.flush();

            if state.is_pass() || !policy.should_retry(attempt) {
                break;
            }
            attempt += 1;
            info!("Retrying '{}' (attempt {} of {})", test.it, attempt, policy.max_attempts());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatorFactory;

    #[test]
    fn test_plan_flattens_in_declaration_order() {
        let spec = SpecFile::from_yaml(
            "x",
            std::path::Path::new("x.spec.yaml"),
            r#"
children:
  - it: a
  - describe: outer
    children:
      - hook: before
      - it: b
      - describe: inner
        children:
          - it: c
  - it: d
"#,
        )
        .unwrap();

        let mut items = Vec::new();
        plan(&spec.children, &mut 0, &mut items);
        let shape: Vec<String> = items
            .iter()
            .map(|i| match i {
                PlanItem::Enter(s) => format!("+{}", s.describe),
                PlanItem::Test { ordinal, node } => format!("{}:{}", ordinal, node.it),
                PlanItem::Exit => "-".to_string(),
            })
            .collect();
        assert_eq!(shape, vec!["0:a", "+outer", "1:b", "+inner", "2:c", "-", "-", "3:d"]);

        let titles: Vec<&str> = spec.tests().iter().map(|(_, t)| t.it.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_no_specs_is_fatal_and_still_reports() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = HarnessConfig::load(&dir.path().join("counterprobe.toml")).unwrap();
        let (ctx, host) = RunContext::new(config, RunMode::Batch).unwrap();
        let handle = host.echo(false).spawn();

        let outcome = SpecRunner::new(ctx, Arc::new(SimulatorFactory::default())).run().await;
        assert!(matches!(outcome.fatal, Some(E2eError::RunnerFatal(_))));
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.report.aborted.is_some());
        assert!(outcome.artifacts.json.is_some());
        handle.finish().await.unwrap();
    }
}
