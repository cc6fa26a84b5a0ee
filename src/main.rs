// src/main.rs

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use levelsync::lock::InstanceLock;
use levelsync::prompt::TerminalPrompt;
use levelsync::shutdown::install_interrupt_handler;
use levelsync::{Error, HttpRemote, Synchronizer};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(levelsync::EXIT_ITEM_FAILURES)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let options = cli.into_options();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let token = CancellationToken::new();
        install_interrupt_handler(token.clone());

        let remote = HttpRemote::new()?;
        let synchronizer = Synchronizer::new(options, remote, TerminalPrompt);

        match synchronizer.run(&token).await {
            Ok(report) if report.is_success() => Ok(ExitCode::SUCCESS),
            Ok(_) => Ok(ExitCode::from(levelsync::EXIT_ITEM_FAILURES)),
            Err(e) => {
                report_fatal(&e);
                Ok(ExitCode::from(e.exit_code()))
            }
        }
    })
}

fn report_fatal(e: &Error) {
    match e {
        Error::LockContention { path, pid } => {
            let state = match pid.and_then(InstanceLock::holder_alive) {
                Some(false) => " was erroneously terminated",
                Some(true) => " is already running",
                None => " is already running or was erroneously terminated",
            };
            let owner = pid.map(|pid| format!(" (pid {pid})")).unwrap_or_default();
            warn!(
                "Another instance of levelsync{}{}. Manually remove '{}' to continue anyway.",
                owner,
                state,
                path.display()
            );
        }
        // Already logged where they happened
        Error::IndexUnavailable(_) | Error::RemovalRefused { .. } => {}
        other => error!("{}", other),
    }
}
