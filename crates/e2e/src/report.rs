//! Run report: incremental accumulation, partial flushes and final artifacts
//!
//! Results are addressed by [`TestId`] (spec file index + declaration
//! ordinal). Every declared test gets a slot when its spec file is declared,
//! so a test that never receives an attempt shows up as an anomaly instead
//! of silently disappearing.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::artifacts::Screenshot;
use crate::config::{ReporterConfig, ReporterKind, RunMode};
use crate::error::{E2eError, E2eResult, FailureKind};
use crate::hooks::HookRun;
use crate::html;
use crate::interpreter::StepResult;
use crate::spec::{Node, SpecFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Passed,
    Failed,
    Errored,
}

impl AttemptState {
    pub fn is_pass(&self) -> bool {
        matches!(self, AttemptState::Passed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl FailureDetail {
    pub fn from_error(err: &E2eError) -> Self {
        let (expected, actual) = match err.expectation() {
            Some((e, a)) => (Some(e), Some(a)),
            None => (None, None),
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            expected,
            actual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReport {
    pub attempt: u32,
    pub state: AttemptState,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub hooks: Vec<HookRun>,
    pub steps: Vec<StepResult>,
    pub failure: Option<FailureDetail>,
    /// Hook error raised after an already failed body
    pub teardown_error: Option<String>,
    pub screenshot: Option<Screenshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub title: String,
    pub full_title: String,
    #[serde(skip)]
    ordinal: usize,
    /// Terminal attempt's state; `None` until an attempt is recorded
    pub outcome: Option<AttemptState>,
    pub flaky: bool,
    pub duration_ms: u64,
    pub attempts: Vec<AttemptReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub title: String,
    pub tests: Vec<TestReport>,
    pub suites: Vec<SuiteReport>,
}

impl SuiteReport {
    fn from_nodes(title: &str, nodes: &[Node], parents: &mut Vec<String>, ordinal: &mut usize) -> Self {
        let mut suite = SuiteReport {
            title: title.to_string(),
            tests: Vec::new(),
            suites: Vec::new(),
        };
        for node in nodes {
            match node {
                Node::Suite(child) => {
                    parents.push(child.describe.clone());
                    suite
                        .suites
                        .push(Self::from_nodes(&child.describe, &child.children, parents, ordinal));
                    parents.pop();
                }
                Node::Test(test) => {
                    let mut full = parents.clone();
                    full.push(test.it.clone());
                    suite.tests.push(TestReport {
                        title: test.it.clone(),
                        full_title: full.join(" "),
                        ordinal: *ordinal,
                        outcome: None,
                        flaky: false,
                        duration_ms: 0,
                        attempts: Vec::new(),
                    });
                    *ordinal += 1;
                }
                Node::Hook(_) => {}
            }
        }
        suite
    }

    fn find_mut(&mut self, ordinal: usize) -> Option<&mut TestReport> {
        if let Some(test) = self.tests.iter_mut().find(|t| t.ordinal == ordinal) {
            return Some(test);
        }
        self.suites.iter_mut().find_map(|s| s.find_mut(ordinal))
    }

    /// Every test of this suite subtree in declaration order
    pub fn all_tests(&self) -> Vec<&TestReport> {
        let mut out: Vec<&TestReport> = self.tests.iter().collect();
        for suite in &self.suites {
            out.extend(suite.all_tests());
        }
        out.sort_by_key(|t| t.ordinal);
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecReport {
    pub name: String,
    pub path: PathBuf,
    pub errored: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Spec-level hooks: beforeAllSpecs, beforeEachSpec, beforeSuite and their `after` twins
    pub hooks: Vec<HookRun>,
    /// Root suite: tests and suites declared at the top of the file
    pub root: SuiteReport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandStat {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl CommandStat {
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub mode: RunMode,
    pub engine: String,
    pub base_url: String,
    pub command_timeout_ms: u64,
    pub click_timeout_ms: u64,
    pub retries: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub command_stats: BTreeMap<String, CommandStat>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub specs: usize,
    pub tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub flaky: usize,
    pub pending: usize,
    pub attempts: usize,
    pub duration_ms: u64,
}

impl Totals {
    /// Tests that did not end in `passed`
    pub fn not_passed(&self) -> usize {
        self.failed + self.errored + self.pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub meta: RunMeta,
    pub totals: Totals,
    pub specs: Vec<SpecReport>,
    pub anomalies: Vec<String>,
    /// Reason the run stopped early, if it did
    pub aborted: Option<String>,
}

impl Report {
    pub fn new(meta: RunMeta) -> Self {
        Self {
            meta,
            totals: Totals::default(),
            specs: Vec::new(),
            anomalies: Vec::new(),
            aborted: None,
        }
    }

    fn recompute(&mut self) {
        let mut totals = Totals {
            specs: self.specs.len(),
            ..Default::default()
        };
        let mut stats: BTreeMap<String, CommandStat> = BTreeMap::new();
        let mut anomalies = Vec::new();

        let mut add_steps = |steps: &[StepResult]| {
            for step in steps {
                let stat = stats.entry(step.command.clone()).or_default();
                stat.count += 1;
                stat.total_ms += step.duration_ms;
                stat.max_ms = stat.max_ms.max(step.duration_ms);
            }
        };

        for spec in &self.specs {
            for hook in &spec.hooks {
                add_steps(&hook.steps);
            }
            for test in spec.root.all_tests() {
                totals.tests += 1;
                totals.attempts += test.attempts.len();
                for attempt in &test.attempts {
                    for hook in &attempt.hooks {
                        add_steps(&hook.steps);
                    }
                    add_steps(&attempt.steps);
                }
                match test.outcome {
                    Some(AttemptState::Passed) => totals.passed += 1,
                    Some(AttemptState::Failed) => totals.failed += 1,
                    Some(AttemptState::Errored) => totals.errored += 1,
                    None => {
                        totals.pending += 1;
                        anomalies.push(format!(
                            "{} / {}: no outcome recorded",
                            spec.name, test.full_title
                        ));
                    }
                }
                if test.flaky {
                    totals.flaky += 1;
                }
            }
        }

        self.totals = totals;
        self.meta.command_stats = stats;
        self.anomalies = anomalies;
    }
}

/// Identifies a declared test: spec file index and declaration ordinal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TestId {
    pub spec: usize,
    pub ordinal: usize,
}

/// Files written at the end of a run
#[derive(Debug, Clone, Default)]
pub struct ReportArtifacts {
    pub json: Option<PathBuf>,
    pub html: Option<PathBuf>,
}

/// Accumulates the run report. Attempts are append-only per test.
pub struct Reporter {
    config: ReporterConfig,
    report: Mutex<Report>,
    started: Instant,
}

impl Reporter {
    pub fn new(config: ReporterConfig, meta: RunMeta) -> Self {
        Self {
            config,
            report: Mutex::new(Report::new(meta)),
            started: Instant::now(),
        }
    }

    /// Register a parsed spec file with a slot for every declared test
    pub fn declare_spec(&self, spec: &SpecFile) -> usize {
        let mut ordinal = 0;
        let root = SuiteReport::from_nodes("", &spec.children, &mut Vec::new(), &mut ordinal);
        let mut report = self.report.lock();
        report.specs.push(SpecReport {
            name: spec.name.clone(),
            path: spec.path.clone(),
            errored: false,
            error: None,
            duration_ms: 0,
            hooks: Vec::new(),
            root,
        });
        report.specs.len() - 1
    }

    /// Register a spec file that could not be loaded
    pub fn declare_errored_spec(&self, name: &str, path: &Path, error: &E2eError) -> usize {
        let mut report = self.report.lock();
        report.specs.push(SpecReport {
            name: name.to_string(),
            path: path.to_path_buf(),
            errored: true,
            error: Some(error.to_string()),
            duration_ms: 0,
            hooks: Vec::new(),
            root: SuiteReport {
                title: String::new(),
                tests: Vec::new(),
                suites: Vec::new(),
            },
        });
        report.specs.len() - 1
    }

    pub fn mark_spec_errored(&self, spec: usize, error: &E2eError) {
        let mut report = self.report.lock();
        if let Some(s) = report.specs.get_mut(spec) {
            s.errored = true;
            s.error.get_or_insert_with(|| error.to_string());
        }
    }

    pub fn record_spec_hook(&self, spec: usize, run: HookRun) {
        let mut report = self.report.lock();
        if let Some(s) = report.specs.get_mut(spec) {
            s.hooks.push(run);
        }
    }

    pub fn finish_spec(&self, spec: usize, duration_ms: u64) {
        let mut report = self.report.lock();
        if let Some(s) = report.specs.get_mut(spec) {
            s.duration_ms = duration_ms;
        }
    }

    /// Append the next attempt of a test. Attempts must arrive in sequence.
    pub fn record_attempt(&self, id: TestId, attempt: AttemptReport) -> E2eResult<()> {
        let mut report = self.report.lock();
        let spec = report
            .specs
            .get_mut(id.spec)
            .ok_or_else(|| E2eError::RunnerFatal(format!("unknown spec index {}", id.spec)))?;
        let spec_name = spec.name.clone();
        let test = spec.root.find_mut(id.ordinal).ok_or_else(|| {
            E2eError::RunnerFatal(format!("unknown test #{} in {}", id.ordinal, spec_name))
        })?;

        let expected = test.attempts.len() as u32 + 1;
        if attempt.attempt != expected {
            return Err(E2eError::DuplicateAttempt {
                key: format!("{} / {}", spec_name, test.full_title),
                attempt: attempt.attempt,
            });
        }

        if !self.config.save_all_attempts {
            for earlier in test.attempts.iter_mut() {
                earlier.screenshot = None;
            }
        }

        let state = attempt.state;
        test.duration_ms += attempt.duration_ms;
        test.attempts.push(attempt);
        test.outcome = Some(state);
        test.flaky = state.is_pass() && test.attempts.iter().any(|a| !a.state.is_pass());
        debug!("{} / {}: attempt {} {:?}", spec_name, test.full_title, expected, state);
        Ok(())
    }

    pub fn snapshot(&self) -> Report {
        let mut report = self.report.lock().clone();
        report.recompute();
        report.meta.ended_at = Some(Utc::now());
        report.totals.duration_ms = self.started.elapsed().as_millis() as u64;
        report
    }

    fn writes_files(&self) -> bool {
        self.config.kind == ReporterKind::Mochawesome
    }

    pub fn partial_path(&self) -> PathBuf {
        self.config
            .report_dir
            .join(format!("{}.partial.json", self.config.report_filename))
    }

    /// Write the report so far; called after every finished test
    pub fn flush_partial(&self) -> E2eResult<()> {
        if !self.writes_files() {
            return Ok(());
        }
        let report = self.snapshot();
        std::fs::create_dir_all(&self.config.report_dir)?;
        std::fs::write(self.partial_path(), serde_json::to_string_pretty(&report)?)?;
        Ok(())
    }

    /// Materialize the final report. `aborted` carries the fatal error that ended the run early.
    pub fn finish(&self, aborted: Option<String>) -> E2eResult<(Report, ReportArtifacts)> {
        {
            let mut report = self.report.lock();
            report.aborted = aborted;
        }
        let report = self.snapshot();
        let mut artifacts = ReportArtifacts::default();

        if !self.writes_files() {
            return Ok((report, artifacts));
        }

        let dir = &self.config.report_dir;
        std::fs::create_dir_all(dir)?;
        let stem = report_stem(dir, &self.config.report_filename, self.config.overwrite);

        if self.config.json {
            let path = dir.join(format!("{}.json", stem));
            std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
            info!("Results written to: {}", path.display());
            artifacts.json = Some(path);
        }

        if self.config.html {
            if !self.config.inline_assets {
                let assets = dir.join("assets");
                std::fs::create_dir_all(&assets)?;
                std::fs::write(assets.join("report.css"), html::STYLESHEET)?;
            }
            let path = dir.join(format!("{}.html", stem));
            std::fs::write(&path, html::render(&report, &self.config, dir)?)?;
            info!("HTML report written to: {}", path.display());
            artifacts.html = Some(path);
        }

        let partial = self.partial_path();
        if partial.exists() {
            std::fs::remove_file(partial)?;
        }

        Ok((report, artifacts))
    }
}

/// `<name>`, or the first free `<name>_NNN` when overwriting is off
pub fn report_stem(dir: &Path, name: &str, overwrite: bool) -> String {
    let taken = |stem: &str| {
        dir.join(format!("{}.json", stem)).exists() || dir.join(format!("{}.html", stem)).exists()
    };
    if overwrite || !taken(name) {
        return name.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}_{:03}", name, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
