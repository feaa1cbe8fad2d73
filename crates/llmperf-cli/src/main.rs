use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llmperf_core::metrics::gather_text;
use llmperf_core::PerfConfig;
use llmperf_harness::{
    run_performance_suite, HttpTransport, PerformanceSuite, RequestExecutor, ScenarioResult,
    SuiteSummary,
};
use llmperf_resilience::{CircuitSnapshot, ResilientClient};
use serde::Serialize;
use tracing::{info, warn};

mod logging;
mod suite;

use logging::init_logging;
use suite::SuiteFile;

#[derive(Parser, Debug)]
#[command(name = "llmperf")]
#[command(about = "Load-testing harness for LLM endpoints", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario suite
    Run {
        /// Suite file (YAML, TOML or JSON) with a `scenarios` array
        #[arg(long)]
        suite: PathBuf,

        /// Target URL; the built-in mock is used when omitted
        #[arg(long, env = "LLMPERF_TARGET")]
        target: Option<String>,

        /// Write the JSON report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Configuration file layered over the defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the effective resilience configuration
    CircuitDefaults {
        /// Configuration file layered over the defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct RunReport {
    summary: SuiteSummary,
    results: Vec<ScenarioResult>,
    circuit: CircuitSnapshot,
    /// Prometheus text exposition of the run's counters and histograms
    metrics: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            suite,
            target,
            output,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            init_logging(&config.logging);

            let passed = run(&config, &suite, target, output.as_deref()).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::CircuitDefaults { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config.resilience)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PerfConfig> {
    match path {
        Some(path) => PerfConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => PerfConfig::load().context("failed to load config"),
    }
}

/// Returns whether every required scenario passed.
async fn run(
    config: &PerfConfig,
    suite_path: &Path,
    target: Option<String>,
    output: Option<&Path>,
) -> Result<bool> {
    let suite = SuiteFile::load(suite_path)?;
    info!(
        scenarios = suite.scenarios.len(),
        suite = %suite_path.display(),
        "Loaded scenario suite"
    );

    let client_name = target.clone().unwrap_or_else(|| "mock".to_string());
    let client = Arc::new(ResilientClient::new(client_name, config.resilience.clone()));

    let executor = match target {
        Some(url) => {
            info!(target = %url, "Driving load against HTTP target");
            let transport = HttpTransport::new(url, config.resilience.timeout())?;
            RequestExecutor::with_transport(Arc::clone(&client), Arc::new(transport))
        }
        None => {
            info!(seed = config.mock.seed, "No target given, using mock target");
            RequestExecutor::mock(Arc::clone(&client), config.mock.clone())
        }
    };

    let runner = PerformanceSuite::new(Arc::new(executor), config);

    let results = tokio::select! {
        results = run_performance_suite(&suite.scenarios, &runner) => results,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, no report written");
            std::process::exit(130);
        }
    };

    let summary = SuiteSummary::from_results(&results);
    info!(
        total = summary.total,
        passed = summary.passed,
        failed = summary.failed,
        required_failed = summary.required_failed.len(),
        "Suite finished"
    );

    let all_required_passed = summary.all_required_passed();
    let report = RunReport {
        summary,
        results,
        circuit: client.get_circuit_state(),
        metrics: gather_text(),
    };
    let json = serde_json::to_string_pretty(&report)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }

    Ok(all_required_passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "llmperf",
            "run",
            "--suite",
            "suite.yaml",
            "--output",
            "out.json",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { suite, output, .. } => {
                assert_eq!(suite, PathBuf::from("suite.yaml"));
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_requires_suite() {
        assert!(Cli::try_parse_from(["llmperf", "run"]).is_err());
    }

    #[tokio::test]
    async fn test_run_writes_report_with_mock() {
        let mut suite_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            suite_file,
            r#"
scenarios:
  - id: quick
    category: warm
    required: true
    request:
      input: ping
    load:
      mode: open_loop
      rate_rps: 20
      duration_sec: 0.25
"#
        )
        .unwrap();

        let mut config = PerfConfig::default();
        config.mock.failure_rate = 0.0;
        config.harness.resource_sampling = false;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report.json");
        let passed = run(&config, suite_file.path(), None, Some(&out)).await.unwrap();
        assert!(passed);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(report["summary"]["total"], 1);
        assert_eq!(report["results"][0]["scenario_id"], "quick");
        assert_eq!(report["results"][0]["driver"], "open_loop");
        assert_eq!(report["circuit"]["state"], "CLOSED");

        let metrics = report["metrics"].as_str().unwrap();
        assert!(metrics.contains("llmperf_requests_total"));
        assert!(metrics.contains("llmperf_scenarios_total"));
    }
}
