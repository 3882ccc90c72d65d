use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use unifai_core::capability::CapabilityFilter;
use unifai_engine::shared::config::EngineConfig;
use unifai_engine::Engine;

#[derive(Parser)]
#[command(author, version, about = "Unified access to AI provider capabilities", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding constraints/, contracts/ and samples/
    #[arg(long, short = 'd', env = "UNIFAI_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Print the capability map as JSON
    Capabilities {
        /// Only list this provider
        provider: Option<String>,
    },

    /// Check every recorded sample against its contract
    Verify,
}

fn engine(data_dir: Option<PathBuf>) -> unifai_core::Result<Engine> {
    let mut config = EngineConfig::from_env()?;
    if let Some(data_dir) = data_dir {
        config = config.with_data_dir(data_dir);
    }
    Engine::from_config(config)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = match engine(cli.data_dir) {
        Ok(engine) => engine,
        Err(error) => {
            error!(error = %error, "Failed to initialize engine");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Capabilities { provider } => {
            let filter = match provider {
                Some(provider) => CapabilityFilter::new().provider(provider),
                None => CapabilityFilter::new(),
            };
            match serde_json::to_string_pretty(&engine.as_dict(&filter)) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(error) => {
                    error!(error = %error, "Failed to render capabilities");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Verify => match engine.verify() {
            Ok(report) => {
                for check in report.failures() {
                    println!(
                        "FAIL {} {}: {}",
                        check.provider,
                        check.path,
                        check.failure.as_deref().unwrap_or_default()
                    );
                }
                if report.passed() {
                    info!(samples = report.checks.len(), "All recorded samples conform");
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }
            Err(error) => {
                error!(error = %error, "Verification failed");
                ExitCode::FAILURE
            }
        },
    }
}
