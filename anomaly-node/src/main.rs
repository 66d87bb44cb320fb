use anyhow::{Context, Result};
use std::io::Write;
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

use anomaly_node::{
    render_outcome, Command, CommandError, CommandHandler, DetectorConfig, ErrorResponse,
    LogFormat, LoggingConfig, Response,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration problems are reported after logging is up
    let (config, config_error) = match DetectorConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (DetectorConfig::default(), Some(e)),
    };

    init_tracing(&config.logging);

    info!("Starting Anomaly Node v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = config_error {
        warn!("Failed to load config: {}, using defaults", e);
    }

    let outcome = run(config).await.map_err(|err| {
        error!("Command failed: {:#}", err);
        match err.downcast_ref::<CommandError>() {
            Some(command_error) => command_error.to_response(),
            None => ErrorResponse::new(format!("{:#}", err)),
        }
    });

    let (line, code) = render_outcome(&outcome);
    let mut stdout = std::io::stdout().lock();
    if writeln!(stdout, "{}", line).and_then(|_| stdout.flush()).is_err() {
        return ExitCode::FAILURE;
    }

    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(config: DetectorConfig) -> Result<Response> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::from_args(&args)?;

    let store = config
        .model_store()
        .context("Failed to resolve model location")?;
    info!("Model store: {}", store.path().display());

    let input = if command.reads_input() {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read standard input")?;
        buf
    } else {
        String::new()
    };

    let handler = CommandHandler::new(config, store);
    Ok(handler.execute(command, &input).await?)
}

/// Structured logging to stderr; stdout carries only protocol output
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "anomaly_node={level},anomaly_engine={level}",
            level = logging.level
        )
        .into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
