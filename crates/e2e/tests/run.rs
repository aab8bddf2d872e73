//! End-to-end runs of whole spec trees against the simulated counter app

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use counterprobe_e2e::bridge::TaskMessage;
use counterprobe_e2e::error::FailureKind;
use counterprobe_e2e::report::{AttemptState, TestReport};
use counterprobe_e2e::simulator::{SimulatorConfig, SimulatorFactory};
use counterprobe_e2e::{HarnessConfig, RunContext, RunMode, RunOutcome, SpecRunner};

const SUPPORT: &str = r#"
children:
  - hook: before
    steps:
      - action: log
        message: "🚀 Starting all test suites"
  - hook: after
    steps:
      - action: log
        message: "🏁 All test suites completed"
"#;

const BASIC: &str = r#"
children:
  - describe: Counter - basic
    children:
      - hook: before_each
        steps:
          - action: visit
          - action: assert_value
            value: 0
      - it: increments to 1 when clicking Increment once
        steps:
          - action: increment
          - action: assert_value
            value: 1
"#;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Fast-failing configuration rooted at `root`, writing artifacts under `out`
fn config(root: &Path, out: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.project_root = root.to_path_buf();
    config.support_file = Some(root.join("specs/support.yaml"));
    config.command_timeout_ms = 300;
    config.click_timeout_ms = 200;
    config.poll_interval_ms = 10;
    config.task_timeout_ms = 2000;
    config.verify_server = false;
    config.screenshots_folder = out.join("screenshots");
    config.videos_folder = out.join("videos");
    config.reporter.report_dir = out.join("reports");
    config
}

/// Lay out a throwaway project with the given spec files
fn project(support: &str, specs: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let spec_dir = dir.path().join("specs");
    std::fs::create_dir_all(&spec_dir).unwrap();
    std::fs::write(spec_dir.join("support.yaml"), support).unwrap();
    for (name, body) in specs {
        std::fs::write(spec_dir.join(name), body).unwrap();
    }
    dir
}

async fn run(
    config: HarnessConfig,
    mode: RunMode,
    factory: Arc<SimulatorFactory>,
) -> (RunOutcome, Vec<TaskMessage>) {
    let (ctx, host) = RunContext::new(config, mode).unwrap();
    let handle = host.echo(false).spawn();
    let outcome = SpecRunner::new(ctx, factory).run().await;
    let transcript = handle.finish().await.unwrap();
    (outcome, transcript)
}

fn texts(transcript: &[TaskMessage]) -> Vec<String> {
    transcript.iter().map(|m| m.text()).collect()
}

fn find<'a>(outcome: &'a RunOutcome, title_prefix: &str) -> &'a TestReport {
    outcome
        .report
        .specs
        .iter()
        .flat_map(|s| s.root.all_tests())
        .find(|t| t.title.starts_with(title_prefix))
        .unwrap_or_else(|| panic!("no test titled {}", title_prefix))
}

#[tokio::test]
async fn test_bundled_specs_expose_negative_value_defect() {
    let out = TempDir::new().unwrap();
    let config = config(&workspace_root(), out.path());
    let (outcome, transcript) = run(config, RunMode::Batch, Arc::new(SimulatorFactory::default())).await;

    assert!(outcome.fatal.is_none());
    let totals = &outcome.report.totals;
    assert_eq!(totals.specs, 3);
    assert_eq!(totals.tests, 19);
    assert_eq!(totals.passed, 13);
    assert_eq!(totals.failed, 6);
    assert_eq!(totals.errored, 0);
    // Every failing test gets exactly one retry in batch mode
    assert_eq!(totals.attempts, 13 + 6 * 2);
    assert_eq!(outcome.exit_code(), 6);

    let tc001 = find(&outcome, "TC001");
    assert_eq!(tc001.outcome, Some(AttemptState::Failed));
    assert_eq!(tc001.attempts.len(), 2);
    let failure = tc001.attempts[1].failure.as_ref().unwrap();
    assert_eq!(failure.expected.as_deref(), Some("0"));
    assert_eq!(failure.actual.as_deref(), Some("-1"));

    assert_eq!(find(&outcome, "TC003").outcome, Some(AttemptState::Passed));
    assert_eq!(find(&outcome, "TC019").outcome, Some(AttemptState::Passed));

    // Support hooks run once per spec file
    let lines = texts(&transcript);
    assert_eq!(lines.iter().filter(|l| l.contains("Starting all test suites")).count(), 3);
    assert_eq!(lines.iter().filter(|l| l.contains("All test suites completed")).count(), 3);

    let json = outcome.artifacts.json.as_ref().unwrap();
    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
    assert_eq!(written["totals"]["tests"], 19);
    assert!(outcome.artifacts.html.as_ref().unwrap().exists());
}

#[tokio::test]
async fn test_bundled_specs_pass_against_fixed_app() {
    let out = TempDir::new().unwrap();
    let config = config(&workspace_root(), out.path());
    let factory = Arc::new(SimulatorFactory::new(SimulatorConfig {
        allow_negative: false,
        ..Default::default()
    }));
    let (outcome, _) = run(config, RunMode::Batch, factory).await;

    assert_eq!(outcome.report.totals.passed, 19);
    assert_eq!(outcome.report.totals.flaky, 0);
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_transient_failure_is_retried_and_flagged_flaky() {
    let dir = project(SUPPORT, &[("basic.spec.yaml", BASIC)]);
    let out = TempDir::new().unwrap();
    let factory = Arc::new(SimulatorFactory::new(SimulatorConfig {
        fail_first_visits: 1,
        ..Default::default()
    }));
    let (outcome, _) = run(config(dir.path(), out.path()), RunMode::Batch, factory.clone()).await;

    let test = find(&outcome, "increments to 1");
    assert_eq!(test.outcome, Some(AttemptState::Passed));
    assert!(test.flaky);
    assert_eq!(test.attempts.len(), 2);
    assert_eq!(test.attempts[0].state, AttemptState::Errored);
    assert_eq!(outcome.report.totals.flaky, 1);
    assert_eq!(outcome.exit_code(), 0);

    // Only the last attempt keeps its screenshot, and it passed
    assert!(test.attempts.iter().all(|a| a.screenshot.is_none()));
    assert_eq!(factory.sessions().len(), 1);
    assert!(factory.sessions()[0].is_closed());
}

#[tokio::test]
async fn test_interactive_mode_does_not_retry() {
    let dir = project(SUPPORT, &[("basic.spec.yaml", BASIC)]);
    let out = TempDir::new().unwrap();
    let factory = Arc::new(SimulatorFactory::new(SimulatorConfig {
        fail_first_visits: 1,
        ..Default::default()
    }));
    let (outcome, _) = run(config(dir.path(), out.path()), RunMode::Interactive, factory).await;

    let test = find(&outcome, "increments to 1");
    assert_eq!(test.attempts.len(), 1);
    assert_eq!(test.outcome, Some(AttemptState::Errored));
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_failure_after_transient_error_is_not_flaky() {
    let spec = r#"
children:
  - describe: Counter
    children:
      - hook: before_each
        steps:
          - action: visit
      - it: expects the wrong value
        steps:
          - action: increment
          - action: assert_value
            value: 5
"#;
    let dir = project(SUPPORT, &[("wrong.spec.yaml", spec)]);
    let out = TempDir::new().unwrap();
    let factory = Arc::new(SimulatorFactory::new(SimulatorConfig {
        fail_first_visits: 1,
        ..Default::default()
    }));
    let (outcome, _) = run(config(dir.path(), out.path()), RunMode::Batch, factory).await;

    let test = find(&outcome, "expects the wrong value");
    assert_eq!(test.outcome, Some(AttemptState::Failed));
    assert!(!test.flaky);
    assert_eq!(test.attempts[0].state, AttemptState::Errored);
    assert_eq!(test.attempts[1].state, AttemptState::Failed);

    // Earlier screenshots are dropped, the final one is on disk
    assert!(test.attempts[0].screenshot.is_none());
    let shot = test.attempts[1].screenshot.as_ref().unwrap();
    assert!(shot.path.exists());
    assert!(shot.path.starts_with(out.path().join("screenshots/wrong")));
}

#[tokio::test]
async fn test_hooks_run_outer_to_inner() {
    let support = r#"
children:
  - hook: before
    steps:
      - action: log
        message: support before
  - hook: before_each
    steps:
      - action: log
        message: support beforeEach
  - hook: after_each
    steps:
      - action: log
        message: support afterEach
  - hook: after
    steps:
      - action: log
        message: support after
"#;
    let spec = r#"
children:
  - hook: before
    steps:
      - action: log
        message: spec before
  - hook: after
    steps:
      - action: log
        message: spec after
  - describe: outer
    children:
      - hook: before
        steps:
          - action: log
            message: outer before
      - hook: before_each
        steps:
          - action: log
            message: outer beforeEach
          - action: visit
      - hook: after_each
        steps:
          - action: log
            message: outer afterEach
      - hook: after
        steps:
          - action: log
            message: outer after
      - describe: inner
        children:
          - hook: before_each
            steps:
              - action: log
                message: inner beforeEach
          - hook: after_each
            steps:
              - action: log
                message: inner afterEach
          - it: body
            steps:
              - action: log
                message: test body
"#;
    let dir = project(support, &[("order.spec.yaml", spec)]);
    let out = TempDir::new().unwrap();
    let (outcome, transcript) = run(
        config(dir.path(), out.path()),
        RunMode::Batch,
        Arc::new(SimulatorFactory::default()),
    )
    .await;

    assert_eq!(outcome.report.totals.passed, 1);
    assert_eq!(
        texts(&transcript),
        vec![
            "support before",
            "spec before",
            "outer before",
            "support beforeEach",
            "outer beforeEach",
            "inner beforeEach",
            "test body",
            "inner afterEach",
            "outer afterEach",
            "support afterEach",
            "outer after",
            "spec after",
            "support after",
        ]
    );
}

#[tokio::test]
async fn test_root_hooks_run_for_every_spec_file() {
    let dir = project(SUPPORT, &[("a.spec.yaml", BASIC), ("b.spec.yaml", BASIC)]);
    let out = TempDir::new().unwrap();
    let factory = Arc::new(SimulatorFactory::default());
    let (outcome, transcript) = run(config(dir.path(), out.path()), RunMode::Batch, factory.clone()).await;

    assert_eq!(outcome.report.totals.passed, 2);
    assert_eq!(
        texts(&transcript),
        vec![
            "🚀 Starting all test suites",
            "🏁 All test suites completed",
            "🚀 Starting all test suites",
            "🏁 All test suites completed",
        ]
    );
    // A fresh page per spec file
    assert_eq!(factory.sessions().len(), 2);
}

#[tokio::test]
async fn test_suite_before_failure_errors_only_its_subtree() {
    let spec = r#"
children:
  - describe: outer
    children:
      - describe: broken
        children:
          - hook: before
            steps:
              - action: visit
                path: /missing
          - hook: after
            steps:
              - action: log
                message: broken after
          - it: a
          - describe: deeper
            children:
              - it: b
      - it: c
        steps:
          - action: visit
          - action: assert_value
            value: 0
"#;
    let dir = project(SUPPORT, &[("suite.spec.yaml", spec)]);
    let out = TempDir::new().unwrap();
    let (outcome, transcript) = run(
        config(dir.path(), out.path()),
        RunMode::Batch,
        Arc::new(SimulatorFactory::default()),
    )
    .await;

    let a = find(&outcome, "a");
    assert_eq!(a.outcome, Some(AttemptState::Errored));
    assert_eq!(a.attempts.len(), 1);
    assert!(a.attempts[0].failure.as_ref().unwrap().message.contains("before"));
    assert_eq!(find(&outcome, "b").outcome, Some(AttemptState::Errored));
    assert_eq!(find(&outcome, "c").outcome, Some(AttemptState::Passed));
    assert_eq!(outcome.report.totals.errored, 2);
    assert!(texts(&transcript).contains(&"broken after".to_string()));
}

#[tokio::test]
async fn test_unparseable_spec_is_errored_and_run_continues() {
    let broken = "children:\n  - it: x\n    steps:\n      - action: teleport\n";
    let dir = project(SUPPORT, &[("a-broken.spec.yaml", broken), ("b-basic.spec.yaml", BASIC)]);
    let out = TempDir::new().unwrap();
    let (outcome, _) = run(
        config(dir.path(), out.path()),
        RunMode::Batch,
        Arc::new(SimulatorFactory::default()),
    )
    .await;

    assert!(outcome.fatal.is_none());
    let specs = &outcome.report.specs;
    assert_eq!(specs.len(), 2);
    assert!(specs[0].errored);
    assert!(specs[0].error.is_some());
    assert!(!specs[1].errored);
    assert_eq!(outcome.report.totals.passed, 1);
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_spec_setup_failure_errors_every_test() {
    let support = r#"
children:
  - hook: before
    steps:
      - action: task
        name: seedDatabase
"#;
    let dir = project(support, &[("basic.spec.yaml", BASIC)]);
    let out = TempDir::new().unwrap();
    let (outcome, _) = run(
        config(dir.path(), out.path()),
        RunMode::Batch,
        Arc::new(SimulatorFactory::default()),
    )
    .await;

    let spec = &outcome.report.specs[0];
    assert!(spec.errored);
    let test = find(&outcome, "increments to 1");
    assert_eq!(test.outcome, Some(AttemptState::Errored));
    assert_eq!(test.attempts.len(), 1);
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_partial_report_is_replaced_by_final_report() {
    let dir = project(SUPPORT, &[("basic.spec.yaml", BASIC)]);
    let out = TempDir::new().unwrap();
    let config = config(dir.path(), out.path());
    let reports = config.reporter.report_dir.clone();
    let (outcome, _) = run(config, RunMode::Batch, Arc::new(SimulatorFactory::default())).await;

    assert!(!reports.join("report.partial.json").exists());
    assert_eq!(outcome.artifacts.json.as_deref(), Some(reports.join("report.json").as_path()));

    // A second run keeps the first report
    let (second, _) = run(
        self::config(dir.path(), out.path()),
        RunMode::Batch,
        Arc::new(SimulatorFactory::default()),
    )
    .await;
    assert_eq!(second.artifacts.json.as_deref(), Some(reports.join("report_001.json").as_path()));
}

async fn run_project(support: &str, specs: &[(&str, &str)]) -> (RunOutcome, Vec<TaskMessage>) {
    let dir = project(support, specs);
    let out = TempDir::new().unwrap();
    run(
        config(dir.path(), out.path()),
        RunMode::Batch,
        Arc::new(SimulatorFactory::default()),
    )
    .await
}

#[tokio::test]
async fn test_body_failure_then_pass_is_flaky() {
    let spec = r#"
children:
  - it: loads on the second try
    steps:
      - action: visit
      - action: increment
      - action: assert_value
        value: 1
"#;
    let dir = project(SUPPORT, &[("retry.spec.yaml", spec)]);
    let out = TempDir::new().unwrap();
    let factory = Arc::new(SimulatorFactory::new(SimulatorConfig {
        fail_first_visits: 1,
        ..Default::default()
    }));
    let (outcome, _) = run(config(dir.path(), out.path()), RunMode::Batch, factory).await;

    let test = find(&outcome, "loads on the second try");
    assert_eq!(test.outcome, Some(AttemptState::Passed));
    assert!(test.flaky);
    assert_eq!(test.attempts.len(), 2);
    assert_eq!(test.attempts[0].state, AttemptState::Failed);
    assert_eq!(test.attempts[0].failure.as_ref().unwrap().kind, FailureKind::Navigation);
    assert!(test.attempts[0].hooks.is_empty());
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_before_each_assertion_keeps_expected_and_actual() {
    let spec = r#"
children:
  - hook: before_each
    steps:
      - action: visit
      - action: assert_value
        value: 3
  - it: never runs
    retries: 0
    steps:
      - action: increment
"#;
    let (outcome, _) = run_project(SUPPORT, &[("hook.spec.yaml", spec)]).await;

    let test = find(&outcome, "never runs");
    assert_eq!(test.outcome, Some(AttemptState::Errored));
    assert!(test.attempts[0].steps.is_empty());
    let failure = test.attempts[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Hook);
    assert_eq!(failure.expected.as_deref(), Some("3"));
    assert_eq!(failure.actual.as_deref(), Some("0"));
    assert!(failure.message.contains("beforeEachTest"));
}

#[tokio::test]
async fn test_after_each_failure_errors_a_passing_attempt() {
    let spec = r#"
children:
  - hook: after_each
    steps:
      - action: task
        name: resetDatabase
  - it: passes its body
    retries: 0
    steps:
      - action: visit
      - action: increment
      - action: assert_value
        value: 1
"#;
    let (outcome, _) = run_project(SUPPORT, &[("teardown.spec.yaml", spec)]).await;

    let test = find(&outcome, "passes its body");
    let attempt = &test.attempts[0];
    assert_eq!(test.outcome, Some(AttemptState::Errored));
    assert!(attempt.steps.iter().all(|s| s.success));
    let failure = attempt.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Hook);
    assert!(failure.message.contains("afterEachTest"));
    assert!(attempt.teardown_error.is_none());
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_after_each_failure_on_failed_attempt_is_teardown_error() {
    let spec = r#"
children:
  - hook: after_each
    steps:
      - action: task
        name: resetDatabase
  - it: fails its body
    retries: 0
    steps:
      - action: visit
      - action: assert_value
        value: 7
"#;
    let (outcome, _) = run_project(SUPPORT, &[("teardown.spec.yaml", spec)]).await;

    let test = find(&outcome, "fails its body");
    let attempt = &test.attempts[0];
    assert_eq!(test.outcome, Some(AttemptState::Failed));
    let failure = attempt.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Assertion);
    assert_eq!(failure.expected.as_deref(), Some("7"));
    assert!(attempt.teardown_error.as_ref().unwrap().contains("resetDatabase"));
}

#[tokio::test]
async fn test_after_each_runs_after_before_each_failure() {
    let spec = r#"
children:
  - hook: before_each
    steps:
      - action: task
        name: seedDatabase
  - hook: after_each
    steps:
      - action: log
        message: cleanup
  - it: skipped body
    retries: 0
    steps:
      - action: log
        message: body
"#;
    let (outcome, transcript) = run_project(SUPPORT, &[("cleanup.spec.yaml", spec)]).await;

    let test = find(&outcome, "skipped body");
    assert_eq!(test.outcome, Some(AttemptState::Errored));
    let lines = texts(&transcript);
    assert!(lines.contains(&"cleanup".to_string()));
    assert!(!lines.contains(&"body".to_string()));
    let phases: Vec<String> = test.attempts[0].hooks.iter().map(|h| h.phase.to_string()).collect();
    assert_eq!(phases, vec!["beforeEachTest", "afterEachTest"]);
}

#[tokio::test]
async fn test_after_suite_failure_marks_spec_errored() {
    let spec = r#"
children:
  - describe: Counter
    children:
      - hook: after
        steps:
          - action: task
            name: dropDatabase
      - it: passes
        steps:
          - action: visit
          - action: assert_value
            value: 0
"#;
    let (outcome, _) = run_project(SUPPORT, &[("suite.spec.yaml", spec)]).await;

    let spec = &outcome.report.specs[0];
    assert!(spec.errored);
    assert!(spec.error.as_ref().unwrap().contains("afterSuite"));
    assert_eq!(find(&outcome, "passes").outcome, Some(AttemptState::Passed));
    assert_eq!(outcome.report.totals.not_passed(), 0);
    assert_eq!(outcome.failures(), 1);
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_after_all_specs_failure_marks_spec_errored() {
    let support = r#"
children:
  - hook: after
    steps:
      - action: task
        name: archiveResults
"#;
    let (outcome, _) = run_project(support, &[("basic.spec.yaml", BASIC)]).await;

    let spec = &outcome.report.specs[0];
    assert!(spec.errored);
    assert!(spec.error.as_ref().unwrap().contains("afterAllSpecs"));
    assert_eq!(find(&outcome, "increments to 1").outcome, Some(AttemptState::Passed));
    assert_eq!(outcome.exit_code(), 1);
}

