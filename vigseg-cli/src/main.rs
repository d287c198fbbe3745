//! CLI entry point for vigseg.
//!
//! Parses command-line arguments with clap, builds and optionally segments
//! the variable interaction graph, renders the summary to stdout, and maps
//! errors to exit codes. Structured logging is installed before anything
//! else so the commands can emit `tracing` diagnostics: output goes to
//! stderr (stdout stays parseable), the level comes from `RUST_LOG`, and
//! `VIGSEG_LOG_FORMAT=json` switches from human-readable to JSON lines.

use std::env;
use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use vigseg_cli::cli::{Cli, CliError, render_summary, run_cli};

const LOG_FORMAT_ENV: &str = "VIGSEG_LOG_FORMAT";

fn main() -> ExitCode {
    if let Err(message) = init_logging() {
        eprintln!("failed to initialize logging: {message}");
        return ExitCode::FAILURE;
    }

    let summary = match run_cli(Cli::parse()) {
        Ok(summary) => summary,
        Err(err) => {
            log_cli_error(&err);
            return ExitCode::FAILURE;
        }
    };

    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    match render_summary(&summary, &mut writer).and_then(|()| writer.flush()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "failed to render summary");
            ExitCode::FAILURE
        }
    }
}

/// Installs the global tracing subscriber and the `log` facade bridge.
fn init_logging() -> Result<(), String> {
    let raw = env::var(LOG_FORMAT_ENV).unwrap_or_default();
    let json = use_json_format(&raw)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);
    let format_layer = if json {
        format_layer.json().boxed()
    } else {
        format_layer.boxed()
    };

    // The log bridge is best-effort; an occupied global slot keeps its
    // existing configuration.
    let _ = LogTracer::init();
    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(format_layer)
        .try_init()
    {
        eprintln!("structured logging already configured elsewhere: {err}");
    }
    Ok(())
}

fn use_json_format(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "human" => Ok(false),
        "json" => Ok(true),
        other => Err(format!(
            "unsupported {LOG_FORMAT_ENV} value `{other}`; expected `human` or `json`"
        )),
    }
}

fn log_cli_error(err: &CliError) {
    match err {
        CliError::Parse(parse) => error!(
            error = %parse,
            code = %parse.code(),
            "command execution failed"
        ),
        CliError::Build(build) => error!(
            error = %build,
            code = %build.code(),
            "command execution failed"
        ),
        CliError::Segment(segment) => error!(
            error = %segment,
            code = %segment.code(),
            "command execution failed"
        ),
        _ => error!(error = %err, "command execution failed"),
    }
}
