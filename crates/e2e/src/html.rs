//! Static HTML rendering of a run report

use base64::Engine as _;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

use crate::config::ReporterConfig;
use crate::error::E2eResult;
use crate::report::{AttemptReport, AttemptState, Report, SuiteReport, TestReport, Totals};

pub const STYLESHEET: &str = r#"
body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 0; color: #222; background: #f5f6f8; }
header { background: #263238; color: #fff; padding: 16px 24px; }
header h1 { margin: 0 0 4px; font-size: 20px; }
header .meta { font-size: 12px; opacity: 0.8; }
main { padding: 16px 24px; }
.totals { display: flex; gap: 12px; margin-bottom: 16px; }
.totals div { background: #fff; border-radius: 4px; padding: 8px 12px; box-shadow: 0 1px 2px rgba(0,0,0,0.1); }
.spec { background: #fff; border-radius: 4px; margin-bottom: 16px; padding: 8px 16px; box-shadow: 0 1px 2px rgba(0,0,0,0.1); }
.spec.errored h2 { color: #c62828; }
.suite { margin-left: 16px; }
.test { border-left: 4px solid #9e9e9e; padding: 4px 8px; margin: 6px 0; }
.test.passed { border-color: #2e7d32; }
.test.failed { border-color: #c62828; }
.test.errored { border-color: #ef6c00; }
.flaky { font-size: 11px; background: #fff3e0; color: #ef6c00; padding: 1px 4px; border-radius: 3px; }
.attempt { font-size: 13px; margin: 4px 0 4px 12px; }
.failure { font-family: monospace; white-space: pre-wrap; color: #c62828; }
.anomalies { color: #c62828; }
table.stats { border-collapse: collapse; font-size: 12px; margin-bottom: 16px; background: #fff; }
table.stats td, table.stats th { padding: 2px 8px; text-align: left; }
img.screenshot { max-width: 480px; border: 1px solid #ddd; display: block; margin-top: 4px; }
"#;

/// Render the report as a self-contained page (or one linking `assets/report.css`)
pub fn render(report: &Report, config: &ReporterConfig, report_dir: &Path) -> E2eResult<String> {
    let mut out = String::new();
    let title = format!("{} - {}", config.report_filename, report.meta.run_id);

    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(out, "<title>{}</title>", escape(&title));
    if config.inline_assets {
        let _ = writeln!(out, "<style>{}</style>", STYLESHEET);
    } else {
        out.push_str("<link rel=\"stylesheet\" href=\"assets/report.css\">\n");
    }
    out.push_str("</head>\n<body>\n<header>\n<h1>Counter E2E report</h1>\n");
    let _ = writeln!(
        out,
        "<div class=\"meta\">run {} · {} mode · {} engine · {} · started {}</div>",
        escape(&report.meta.run_id),
        report.meta.mode,
        escape(&report.meta.engine),
        escape(&report.meta.base_url),
        report.meta.started_at.to_rfc3339(),
    );
    out.push_str("</header>\n<main>\n");

    render_totals(&mut out, &report.totals);
    if config.charts {
        out.push_str(&chart(&report.totals));
    }

    if let Some(reason) = &report.aborted {
        let _ = writeln!(out, "<p class=\"anomalies\">Run aborted: {}</p>", escape(reason));
    }
    if !report.anomalies.is_empty() {
        out.push_str("<ul class=\"anomalies\">\n");
        for anomaly in &report.anomalies {
            let _ = writeln!(out, "<li>{}</li>", escape(anomaly));
        }
        out.push_str("</ul>\n");
    }

    if !report.meta.command_stats.is_empty() {
        render_command_stats(&mut out, report);
    }

    for spec in &report.specs {
        let class = if spec.errored { "spec errored" } else { "spec" };
        let _ = writeln!(out, "<section class=\"{}\">", class);
        let _ = writeln!(
            out,
            "<h2>{}</h2>\n<div class=\"meta\">{} · {} ms</div>",
            escape(&spec.name),
            escape(&spec.path.display().to_string()),
            spec.duration_ms
        );
        if let Some(error) = &spec.error {
            let _ = writeln!(out, "<div class=\"failure\">{}</div>", escape(error));
        }
        render_suite(&mut out, &spec.root, config, report_dir);
        out.push_str("</section>\n");
    }

    out.push_str("</main>\n</body>\n</html>\n");
    Ok(out)
}

fn render_totals(out: &mut String, totals: &Totals) {
    let _ = writeln!(
        out,
        "<div class=\"totals\"><div>{} specs</div><div>{} tests</div><div>{} passed</div>\
         <div>{} failed</div><div>{} errored</div><div>{} flaky</div><div>{} attempts</div>\
         <div>{} ms</div></div>",
        totals.specs,
        totals.tests,
        totals.passed,
        totals.failed,
        totals.errored,
        totals.flaky,
        totals.attempts,
        totals.duration_ms
    );
}

fn render_command_stats(out: &mut String, report: &Report) {
    out.push_str("<table class=\"stats\">\n<tr><th>command</th><th>count</th><th>mean ms</th><th>max ms</th></tr>\n");
    for (command, stat) in &report.meta.command_stats {
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{:.1}</td><td>{}</td></tr>",
            escape(command),
            stat.count,
            stat.mean_ms(),
            stat.max_ms
        );
    }
    out.push_str("</table>\n");
}

/// Horizontal stacked bar of outcomes
fn chart(totals: &Totals) -> String {
    const WIDTH: f64 = 600.0;
    let segments = [
        (totals.passed, "#2e7d32"),
        (totals.failed, "#c62828"),
        (totals.errored, "#ef6c00"),
        (totals.pending, "#9e9e9e"),
    ];
    let total: usize = segments.iter().map(|(n, _)| n).sum();

    let mut svg = format!(
        "<svg class=\"chart\" width=\"{}\" height=\"24\" viewBox=\"0 0 {} 24\" role=\"img\">\n",
        WIDTH, WIDTH
    );
    if total == 0 {
        svg.push_str("<rect x=\"0\" y=\"0\" width=\"600\" height=\"24\" fill=\"#e0e0e0\"/>\n");
    } else {
        let mut x = 0.0;
        for (count, color) in segments {
            if count == 0 {
                continue;
            }
            let w = WIDTH * count as f64 / total as f64;
            let _ = writeln!(
                svg,
                "<rect x=\"{:.1}\" y=\"0\" width=\"{:.1}\" height=\"24\" fill=\"{}\"/>",
                x, w, color
            );
            x += w;
        }
    }
    svg.push_str("</svg>\n");
    svg
}

fn render_suite(out: &mut String, suite: &SuiteReport, config: &ReporterConfig, report_dir: &Path) {
    for test in &suite.tests {
        render_test(out, test, config, report_dir);
    }
    for child in &suite.suites {
        let _ = writeln!(out, "<div class=\"suite\">\n<h3>{}</h3>", escape(&child.title));
        render_suite(out, child, config, report_dir);
        out.push_str("</div>\n");
    }
}

fn state_class(state: Option<AttemptState>) -> &'static str {
    match state {
        Some(AttemptState::Passed) => "passed",
        Some(AttemptState::Failed) => "failed",
        Some(AttemptState::Errored) => "errored",
        None => "pending",
    }
}

fn render_test(out: &mut String, test: &TestReport, config: &ReporterConfig, report_dir: &Path) {
    let _ = writeln!(out, "<div class=\"test {}\">", state_class(test.outcome));
    let _ = write!(
        out,
        "<strong>{}</strong> <span class=\"meta\">{} · {} ms</span>",
        escape(&test.title),
        state_class(test.outcome),
        test.duration_ms
    );
    if test.flaky {
        out.push_str(" <span class=\"flaky\">flaky</span>");
    }
    out.push('\n');
    for attempt in &test.attempts {
        render_attempt(out, attempt, config, report_dir);
    }
    out.push_str("</div>\n");
}

fn render_attempt(out: &mut String, attempt: &AttemptReport, config: &ReporterConfig, report_dir: &Path) {
    let _ = writeln!(
        out,
        "<div class=\"attempt\">attempt {}: {} ({} ms, {} steps)",
        attempt.attempt,
        state_class(Some(attempt.state)),
        attempt.duration_ms,
        attempt.steps.len()
    );
    if let Some(failure) = &attempt.failure {
        let mut text = failure.message.clone();
        if let (Some(expected), Some(actual)) = (&failure.expected, &failure.actual) {
            text.push_str(&format!("\nexpected: {}\nactual:   {}", expected, actual));
        }
        let _ = writeln!(out, "<div class=\"failure\">{}</div>", escape(&text));
    }
    if let Some(error) = &attempt.teardown_error {
        let _ = writeln!(out, "<div class=\"failure\">{}</div>", escape(error));
    }
    if let Some(shot) = &attempt.screenshot {
        if let Some(src) = screenshot_src(&shot.path, config.embedded_screenshots, report_dir) {
            let _ = writeln!(out, "<img class=\"screenshot\" alt=\"screenshot\" src=\"{}\">", src);
        }
    }
    out.push_str("</div>\n");
}

fn screenshot_src(path: &Path, embed: bool, report_dir: &Path) -> Option<String> {
    if embed {
        return match std::fs::read(path) {
            Ok(data) => Some(format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(data)
            )),
            Err(e) => {
                warn!("Cannot embed screenshot {}: {}", path.display(), e);
                None
            }
        };
    }
    Some(escape(&relative_link(path, report_dir)))
}

/// `/`-separated link to `target` as seen from a page in `base`
fn relative_link(target: &Path, base: &Path) -> String {
    let target = normalize(target);
    let base = normalize(base);
    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = base.iter().skip(common).map(|_| "..".to_string()).collect();
    parts.extend(target.iter().skip(common).map(|c| c.to_string_lossy().to_string()));
    parts.join("/")
}

/// Absolute path with `.` and `..` resolved lexically
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
