use bash_exporter_lib::config::LoggingConfig;
use bash_exporter_lib::{load_config, run_exporter, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prometheus exporter that turns the output of shell commands into metrics
#[derive(Debug, Parser)]
#[command(name = "bash-exporter", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Validate the configuration file and exit
    #[arg(long)]
    validate_config: bool,
}

/// Main entry point for the exporter
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.validate_config {
        return validate(&cli.config);
    }

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(
        "Configuration loaded from {} and logger initialized",
        cli.config.display()
    );

    match run_exporter(cli.config, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Exporter failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn validate(path: &Path) -> ExitCode {
    println!("Validating configuration file: {}", path.display());
    match load_config(path) {
        Ok(_) => {
            println!("Configuration is valid.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("configuration is invalid: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging from the `logging` section
///
/// `RUST_LOG` takes precedence over the configured level. When a log file is
/// configured, output is appended to it without ANSI colors.
fn init_logging(logging: &LoggingConfig) -> std::io::Result<()> {
    let level = &logging.level;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("bash_exporter={level},bash_exporter_lib={level}"))
    });

    let (writer, ansi) = match &logging.path {
        Some(path) if !path.is_empty() => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        _ => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(ansi)
        .with_writer(writer)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
