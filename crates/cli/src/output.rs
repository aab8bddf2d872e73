//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use counterprobe_e2e::report::{AttemptState, Report, SuiteReport};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) -> anyhow::Result<()> {
    if items.is_empty() {
        println!("No items found.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(items)?);
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
    Ok(())
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

/// Colored end-of-run summary
pub fn print_summary(report: &Report) {
    for spec in &report.specs {
        let name = if spec.errored {
            format!("{} (errored)", spec.name).red().bold()
        } else {
            spec.name.bold()
        };
        println!("\n  {}", name);
        if let Some(error) = &spec.error {
            println!("    {}", error.red());
        }
        print_suite(&spec.root, 2);
    }

    let t = &report.totals;
    println!();
    println!(
        "  {}  {}  {}  {}",
        format!("{} passing", t.passed).green(),
        format!("{} failing", t.failed).red(),
        format!("{} errored", t.errored).yellow(),
        format!("{} flaky", t.flaky).magenta(),
    );
    println!(
        "  {} tests in {} spec files, {} attempts, {} ms",
        t.tests, t.specs, t.attempts, t.duration_ms
    );

    for anomaly in &report.anomalies {
        print_warning(anomaly);
    }
}

fn print_suite(suite: &SuiteReport, depth: usize) {
    let indent = "  ".repeat(depth);
    for test in &suite.tests {
        let line = match test.outcome {
            Some(AttemptState::Passed) if test.flaky => {
                format!("✓ {} (flaky, {} attempts)", test.title, test.attempts.len()).yellow()
            }
            Some(AttemptState::Passed) => format!("✓ {}", test.title).green(),
            Some(AttemptState::Failed) => format!("✗ {}", test.title).red(),
            Some(AttemptState::Errored) => format!("! {}", test.title).red(),
            None => format!("- {}", test.title).dimmed(),
        };
        println!("{}{}", indent, line);

        let passed = test.outcome.map(|o| o.is_pass()).unwrap_or(false);
        if let Some(failure) = test.attempts.last().and_then(|a| a.failure.as_ref()) {
            if !passed {
                println!("{}    {}", indent, failure.message.dimmed());
            }
        }
    }
    for child in &suite.suites {
        println!("{}{}", indent, child.title);
        print_suite(child, depth + 1);
    }
}
