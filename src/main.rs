use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use guipilot::agent_engine::state::SessionStatus;
use guipilot::commands::{self, RunOptions};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task session against the configured machine
    Run {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Task description, overrides [task].description
        #[arg(short, long)]
        task: Option<String>,

        /// Task domain, e.g. the application under automation
        #[arg(long)]
        domain: Option<String>,

        /// Task identifier from the benchmark harness
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        max_iterations: Option<u32>,

        /// Write the session report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
    /// Load and validate the configuration
    CheckConfig {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    guipilot::init_tracing(&cli.log_level);

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    match cli.command {
        Commands::Run {
            config,
            task,
            domain,
            id,
            max_iterations,
            report,
        } => {
            let opts = RunOptions {
                config,
                task,
                domain,
                id,
                max_iterations,
                report,
            };
            match commands::run_task(opts).await {
                Ok(report) => {
                    println!(
                        "session {} {} after {} iteration(s), {} error(s) recorded",
                        report.session_id,
                        report.status,
                        report.iterations.len(),
                        report.errors.len()
                    );
                    if let Some(reason) = &report.reason {
                        println!("reason: {reason}");
                    }
                    match report.status {
                        SessionStatus::Completed => ExitCode::SUCCESS,
                        SessionStatus::Failed => ExitCode::from(1),
                        SessionStatus::Exhausted => ExitCode::from(2),
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "run failed");
                    eprintln!("error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::CheckConfig { config } => match commands::check_config(config.as_deref()) {
            Ok(summary) => {
                println!("{summary}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        Commands::Version => {
            println!("guipilot {}", commands::version());
            ExitCode::SUCCESS
        }
    }
}
