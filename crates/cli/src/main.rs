//! counterprobe CLI - Main Entry Point
//!
//! Runs the counter E2E specs in batch (`run`) or interactive (`open`) mode
//! and lists what would run (`list`).

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use counterprobe_e2e::engine::EngineFactory;
use counterprobe_e2e::playwright::{PlaywrightConfig, PlaywrightFactory};
use counterprobe_e2e::runner::{discover_specs, RunContext, SpecRunner};
use counterprobe_e2e::simulator::SimulatorFactory;
use counterprobe_e2e::{HarnessConfig, RunMode, SpecFile};

mod output;

use output::{OutputFormat, TableDisplay};

/// counterprobe - E2E harness for the counter web app
#[derive(Parser)]
#[command(name = "counterprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "counterprobe.toml", global = true)]
    config: PathBuf,

    /// Only run spec files matching this glob
    #[arg(long, global = true)]
    spec: Option<String>,

    /// Base URL of the application under test
    #[arg(long, env = "BASE_URL", global = true)]
    base_url: Option<String>,

    /// Automation engine
    #[arg(long, value_enum, default_value = "playwright", global = true)]
    engine: EngineKind,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    /// Real browser through Playwright
    Playwright,
    /// In-memory counter page, no browser needed
    Simulated,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all specs unattended: headless, with the batch retry budget
    Run,

    /// Run specs interactively: headed browser, no retries
    Open,

    /// List discovered spec files and their tests
    List {
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Serialize)]
struct TestListing {
    spec: String,
    suite: String,
    test: String,
    retries: String,
}

impl TableDisplay for TestListing {
    fn headers() -> Vec<&'static str> {
        vec!["Spec", "Suite", "Test", "Retries"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.spec.clone(),
            self.suite.clone(),
            self.test.clone(),
            self.retries.clone(),
        ]
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let code = match &cli.command {
        Commands::Run => run(&cli, RunMode::Batch).await?,
        Commands::Open => run(&cli, RunMode::Interactive).await?,
        Commands::List { format } => {
            list(&cli, *format)?;
            0
        }
    };

    std::process::exit(code);
}

fn load_config(cli: &Cli) -> anyhow::Result<HarnessConfig> {
    let mut config = HarnessConfig::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("cannot load {}: {}", cli.config.display(), e))?;
    if let Some(pattern) = &cli.spec {
        config.spec_pattern = pattern.clone();
    }
    debug!("Configuration: {:?}", config);
    Ok(config)
}

async fn run(cli: &Cli, mode: RunMode) -> anyhow::Result<i32> {
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            output::print_error(&e.to_string());
            return Ok(1);
        }
    };

    let factory: Arc<dyn EngineFactory> = match cli.engine {
        EngineKind::Playwright => Arc::new(PlaywrightFactory::new(PlaywrightConfig::from_harness(&config)?)),
        EngineKind::Simulated => Arc::new(SimulatorFactory::default()),
    };

    let (mut ctx, host) = RunContext::new(config, mode)?;
    if let Some(url) = &cli.base_url {
        ctx = ctx.with_base_url(url);
    }
    if cli.engine == EngineKind::Simulated {
        ctx.verify_server = false;
    }
    let host = host.spawn();

    info!("counterprobe {} ({} engine)", mode, factory.name());
    let outcome = SpecRunner::new(ctx, factory).run().await;
    let transcript = host.finish().await?;
    debug!("{} task message(s) delivered", transcript.len());

    output::print_summary(&outcome.report);
    for path in [&outcome.artifacts.json, &outcome.artifacts.html].into_iter().flatten() {
        output::print_success(&format!("Report written to {}", path.display()));
    }
    if let Some(fatal) = &outcome.fatal {
        output::print_error(&fatal.to_string());
    }

    Ok(outcome.exit_code())
}

fn list(cli: &Cli, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let mut rows = Vec::new();

    for path in discover_specs(&config)? {
        match SpecFile::from_file(&path) {
            Ok(spec) => {
                for (suites, test) in spec.tests() {
                    rows.push(TestListing {
                        spec: spec.name.clone(),
                        suite: suites.join(" > "),
                        test: test.it.clone(),
                        retries: test.retries.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
                    });
                }
            }
            Err(e) => output::print_warning(&format!("{}: {}", path.display(), e)),
        }
    }

    output::print_list(&rows, format)
}
