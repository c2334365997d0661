mod compare;
mod error;
mod host;
mod loader;
mod result;
mod scenarios;
mod scheduler;
mod schema;

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Write as _;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use crate::compare::ComparePolicy;
use crate::error::{HarnessError, LoadError};
use crate::host::{Host, ProjectLayout};
use crate::result::{TestResult, Verdict};
use crate::scenarios::SuiteContext;
use crate::scheduler::{RunSummary, Scheduler};
use crate::schema::SetupStep;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with checkmarks
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

#[derive(Parser)]
#[command(name = "resolvecheck")]
#[command(about = "A sequential integration test harness for dependency-resolution build steps")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the resolution suite against a project
    Run {
        /// Project directory
        #[arg(default_value = ".")]
        project: PathBuf,
        /// Config file (defaults to resolvecheck.yaml in the project)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Compare an expected artifact tree with an actual one
    Compare {
        expected: PathBuf,
        actual: PathBuf,
        /// Take archive extensions and ignore patterns from this config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Scaffold a new config file
    Init {
        /// Output path for the new config file
        #[arg(default_value = "resolvecheck.yaml")]
        path: PathBuf,
    },
    /// Output the config schema
    Schema,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            project,
            config,
            output,
            verbose,
        } => {
            init_logging(verbose);
            std::process::exit(run_suite(&project, config, output));
        }
        Command::Compare {
            expected,
            actual,
            config,
            verbose,
        } => {
            init_logging(verbose);
            let policy = match load_policy(config.as_deref()) {
                Ok(policy) => policy,
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            };
            let discrepancies = compare::compare_trees_with(&expected, &actual, &policy);
            if discrepancies.is_empty() {
                println!("✓ {} matches {}", actual.display(), expected.display());
                return;
            }
            for discrepancy in &discrepancies {
                println!("✗ {discrepancy}");
            }
            println!("\n{} discrepancies", discrepancies.len());
            std::process::exit(1);
        }
        Command::Init { path } => {
            if path.exists() {
                eprintln!("Error: file already exists: {}", path.display());
                std::process::exit(1);
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
                && let Err(e) = fs::create_dir_all(parent)
            {
                eprintln!("Error creating directory: {e}");
                std::process::exit(1);
            }
            if let Err(e) = fs::write(&path, CONFIG_TEMPLATE) {
                eprintln!("Error writing file: {e}");
                std::process::exit(1);
            }
            println!("Created: {}", path.display());
        }
        Command::Schema => {
            let schema = schema::generate_schema();
            let json = serde_json::to_string_pretty(&schema).expect("Failed to serialize schema");
            println!("{json}");
        }
    }
}

const CONFIG_TEMPLATE: &str = r#"version: 1

# Where the resolver writes resolved libraries.
output_dir: Assets/Plugins/Android

# One reference tree per scenario: NoExport/Gradle, NoExport/Internal, Export/Gradle.
expected_dir: ExpectedArtifacts

build_systems: [gradle, internal]

dependencies:
  - group: com.android.support
    artifact: support-annotations
    version: "26.1.0"

resolver:
  cmd: ./resolve.sh
  args: []
  # timeout: 600

# setup:
#   - run:
#       cmd: ./warm-up.sh
"#;

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

/// Comparison rules from a config file, or the defaults without one.
fn load_policy(config_path: Option<&Path>) -> Result<ComparePolicy, LoadError> {
    match config_path {
        Some(path) => ComparePolicy::from_config(&loader::load_config(path)?.compare),
        None => Ok(ComparePolicy::default()),
    }
}

/// Load the config and register the fixed suite with a fresh scheduler.
fn prepare_suite(
    project: &Path,
    config_path: Option<PathBuf>,
) -> Result<(Scheduler, Vec<SetupStep>), HarnessError> {
    let config_path = match config_path {
        Some(path) => path,
        None => loader::find_config(project)?,
    };
    let config = loader::load_config(&config_path)?;
    tracing::debug!("Loaded {}", config_path.display());

    let layout = ProjectLayout::new(project, &config)?;
    let context = Arc::new(SuiteContext {
        host: Host::from_config(&config, &layout),
        policy: ComparePolicy::from_config(&config.compare)?,
        layout,
        dependencies: config.dependencies,
        clean_output: config.clean_output,
    });

    let mut scheduler = Scheduler::new();
    for test_case in scenarios::build_suite(context) {
        scheduler.enqueue(test_case);
    }
    Ok((scheduler, config.setup))
}

/// Boot the suite, wait for the environment, run it, and return the exit code.
fn run_suite(project: &Path, config_path: Option<PathBuf>, output: OutputFormat) -> i32 {
    let (scheduler, setup) = match prepare_suite(project, config_path) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            return 1;
        }
    };

    let started_at = chrono::Local::now();
    let outcome = runtime.block_on(async {
        let (ready_tx, ready_rx) = oneshot::channel();
        let project_dir = project.to_path_buf();
        tokio::task::spawn_blocking(move || match host::run_setup(&setup, &project_dir) {
            Ok(()) => {
                tracing::info!("Environment ready");
                let _ = ready_tx.send(());
            }
            Err(e) => tracing::error!("Environment setup failed: {e:#}"),
        });
        scheduler.start_when_ready(ready_rx).await
    });

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    match output {
        OutputFormat::Human => print_human(&summary),
        OutputFormat::Json => {
            let results: Vec<_> = summary.results().iter().map(result_json).collect();
            let report = serde_json::json!({
                "passed": summary.passed(),
                "started_at": started_at.to_rfc3339(),
                "results": results,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&report).expect("Failed to serialize")
            );
        }
        OutputFormat::Junit => print!("{}", format_junit_xml(&summary, &started_at)),
    }

    summary.exit_code()
}

fn print_human(summary: &RunSummary) {
    let mut counts = [0usize; 3];
    for result in summary.results() {
        match result.verdict() {
            Verdict::Passed => {
                counts[0] += 1;
                println!("  ✓ {} ({:.2?})", result.name, result.duration);
            }
            Verdict::Failed => {
                counts[1] += 1;
                println!("  ✗ {} ({:.2?})", result.name, result.duration);
                for message in &result.error_messages {
                    println!("    {}", message.replace('\n', "\n    "));
                }
            }
            Verdict::Skipped => {
                counts[2] += 1;
                println!("  - {} (skipped)", result.name);
                for message in &result.error_messages {
                    println!("    {message}");
                }
            }
        }
    }
    println!(
        "\n{} passed, {} failed, {} skipped",
        counts[0], counts[1], counts[2]
    );
}

fn result_json(result: &TestResult) -> serde_json::Value {
    let mut value = serde_json::to_value(result).unwrap_or_default();
    value["verdict"] = result.verdict().to_string().into();
    value
}

/// Format the run as a single JUnit test suite.
fn format_junit_xml(summary: &RunSummary, started_at: &chrono::DateTime<chrono::Local>) -> String {
    let results = summary.results();
    let failures = results
        .iter()
        .filter(|r| r.verdict() == Verdict::Failed)
        .count();
    let skipped = results
        .iter()
        .filter(|r| r.verdict() == Verdict::Skipped)
        .count();
    let total_time: f64 = results.iter().map(|r| r.duration.as_secs_f64()).sum();

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        xml,
        "<testsuite name=\"resolvecheck\" tests=\"{}\" failures=\"{failures}\" skipped=\"{skipped}\" time=\"{total_time:.3}\" timestamp=\"{}\">",
        results.len(),
        started_at.format("%Y-%m-%dT%H:%M:%S")
    );

    for result in results {
        let _ = writeln!(
            xml,
            "  <testcase name=\"{}\" time=\"{:.3}\">",
            escape_xml(&result.name),
            result.duration.as_secs_f64()
        );
        match result.verdict() {
            Verdict::Passed => {}
            Verdict::Skipped => {
                let reason = result.error_messages.join("; ");
                let _ = writeln!(xml, "    <skipped message=\"{}\"/>", escape_xml(&reason));
            }
            Verdict::Failed => {
                let message = result
                    .error_messages
                    .first()
                    .map(|s| s.as_str())
                    .unwrap_or("Test failed");
                let _ = writeln!(xml, "    <failure message=\"{}\">", escape_xml(message));
                for failure in &result.error_messages {
                    let _ = writeln!(xml, "{}", escape_xml(failure));
                }
                xml.push_str("    </failure>\n");
            }
        }
        xml.push_str("  </testcase>\n");
    }

    xml.push_str("</testsuite>\n");
    xml
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
