use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use testlens::config::Config;
use testlens::detect::{Anomaly, AnomalyFilter, AnomalyType};
use testlens::ingest::{Framework, TestResultInput, TestRunBatch};
use testlens::parse::TestStatus;

#[derive(Parser)]
#[command(
    name = "testlens",
    about = "Test observability: CI log parsing and flaky/slow test detection",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a raw CI job log into steps and extract test outcomes
    ParseLog {
        /// Log file to parse
        path: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Store a batch of test results (JSON array) and optional raw logs
    Ingest {
        /// Project identifier
        #[arg(long)]
        project: String,

        /// JSON file with an array of test results
        #[arg(long)]
        results: Option<PathBuf>,

        /// Raw CI log to parse into results (repeatable)
        #[arg(long = "log")]
        logs: Vec<PathBuf>,

        /// Kind of test suite
        #[arg(long, value_enum, default_value = "unit")]
        framework: Framework,

        #[arg(long)]
        branch: Option<String>,

        #[arg(long)]
        commit: Option<String>,
    },

    /// Run anomaly detection over a project's stored history
    Detect {
        /// Project identifier
        #[arg(long)]
        project: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Inspect and manage detected anomalies
    Anomalies {
        #[command(subcommand)]
        action: AnomalyAction,
    },
}

#[derive(Subcommand)]
enum AnomalyAction {
    /// List anomalies, newest first
    List {
        #[arg(long)]
        project: Option<String>,

        /// flaky, slow, frequently-failing or resource-intensive
        #[arg(long = "type")]
        anomaly_type: Option<AnomalyType>,

        /// Only resolved (true) or unresolved (false) anomalies
        #[arg(long)]
        resolved: Option<bool>,

        #[arg(long)]
        json: bool,
    },

    /// Mark an anomaly as resolved
    Resolve {
        /// Anomaly ID
        id: uuid::Uuid,
    },

    /// Attach analysis text to an anomaly
    Annotate {
        /// Anomaly ID
        id: uuid::Uuid,

        #[arg(long)]
        text: String,
    },
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn status_label(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Passed => "PASS",
        TestStatus::Failed => "FAIL",
        TestStatus::Skipped => "SKIP",
    }
}

fn print_anomalies(anomalies: &[Anomaly]) {
    if anomalies.is_empty() {
        println!("No anomalies found.");
        return;
    }
    println!(
        "{:<36} | {:<18} | {:<6} | {:<8} | Test",
        "ID", "Type", "Sev", "Resolved"
    );
    println!("{:-<36}-|-{:-<18}-|-{:-<6}-|-{:-<8}-|-{:-<30}", "", "", "", "", "");
    for a in anomalies {
        println!(
            "{:<36} | {:<18} | {:<6} | {:<8} | {}",
            a.id,
            a.anomaly_type,
            a.severity.as_str(),
            a.resolved,
            a.test_id
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config.storage.db_path.clone());
    let db_path = db_path.to_string_lossy().into_owned();

    match cli.command {
        Commands::ParseLog { path, json } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read log: {}", path.display()))?;
            let steps = testlens::parse::parse_full_log(&raw);

            if json {
                println!("{}", serde_json::to_string_pretty(&steps)?);
            } else {
                for parsed in &steps {
                    println!("\n=== Step {}: {} ===", parsed.step.step_number, parsed.step.name);
                    if parsed.outcomes.is_empty() {
                        println!("(no test outcomes)");
                    }
                    for o in &parsed.outcomes {
                        let duration = o
                            .duration_ms
                            .map(|d| format!(" ({d}ms)"))
                            .unwrap_or_default();
                        println!("{} {}{}", status_label(o.status), o.identity(), duration);
                        if let Some(err) = &o.error {
                            for line in err.lines() {
                                println!("     {}", line.trim_start());
                            }
                        }
                    }
                }
                println!();
            }
        }
        Commands::Ingest {
            project,
            results,
            logs,
            framework,
            branch,
            commit,
        } => {
            let results: Vec<TestResultInput> = match results {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read results: {}", path.display()))?;
                    serde_json::from_str(&content)
                        .with_context(|| format!("failed to parse results: {}", path.display()))?
                }
                None => Vec::new(),
            };
            let raw_logs = logs
                .iter()
                .map(|p| {
                    std::fs::read_to_string(p)
                        .with_context(|| format!("failed to read log: {}", p.display()))
                })
                .collect::<Result<Vec<_>>>()?;

            let app = testlens::App::open(&db_path, config.detection.clone())?;
            let receipt = app
                .ingestor
                .ingest(TestRunBatch {
                    project_id: project,
                    framework,
                    branch,
                    commit_sha: commit,
                    results,
                    raw_logs,
                })
                .await?;
            println!(
                "Run {} stored: {} tests ({} passed, {} failed, {} skipped)",
                receipt.run_id,
                receipt.summary.total,
                receipt.summary.passed,
                receipt.summary.failed,
                receipt.summary.skipped
            );
        }
        Commands::Detect { project, json } => {
            let app = testlens::App::open(&db_path, config.detection.clone())?;
            let report = app.engine.scan_project(&app.ingestor, &project).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Detected {} anomalies ({} new, {} already open).",
                    report.detected.len(),
                    report.inserted.len(),
                    report.already_open
                );
                print_anomalies(&report.inserted);
            }
        }
        Commands::Anomalies { action } => {
            let app = testlens::App::open(&db_path, config.detection.clone())?;
            match action {
                AnomalyAction::List {
                    project,
                    anomaly_type,
                    resolved,
                    json,
                } => {
                    let list = app
                        .engine
                        .list_anomalies(AnomalyFilter {
                            project_id: project,
                            anomaly_type,
                            resolved,
                        })
                        .await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&list)?);
                    } else {
                        print_anomalies(&list);
                    }
                }
                AnomalyAction::Resolve { id } => {
                    app.engine.resolve_anomaly(id).await?;
                    println!("Anomaly '{}' resolved.", id);
                }
                AnomalyAction::Annotate { id, text } => {
                    app.engine.attach_insights(id, text).await?;
                    println!("Insights attached to anomaly '{}'.", id);
                }
            }
        }
    }

    Ok(())
}
