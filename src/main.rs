//! ffrun - run commands against a bundled ffmpeg binary
//!
//! Loads the ffmpeg executable for this host once, then runs user-typed
//! command lines against it while streaming progress to the terminal.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{Level, error, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ffrun::cli::{Args, Commands};
use ffrun::config::Config;
use ffrun::console::{
    ALREADY_RUNNING_NOTICE, ConsoleHandler, DEVICE_NOT_SUPPORTED, DEVICE_NOT_SUPPORTED_MESSAGE,
    EMPTY_COMMAND_NOTICE, JsonHandler,
};
use ffrun::error::FfrunError;
use ffrun::event::RunOutcome;
use ffrun::loader::{BinaryLoader, LoadState};
use ffrun::session::Session;

/// Exit status when the command line is empty
const EMPTY_COMMAND_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Commands::Run { json, command } => {
            let Some(session) = open_session(config, false).await? else {
                return Ok(ExitCode::FAILURE);
            };
            let input = command.join(" ");

            let submitted = if json {
                session.submit(&input, JsonHandler::stdout())
            } else {
                session.submit(&input, ConsoleHandler::stdout())
            };

            let outcome = match submitted {
                Ok(handle) => handle.await?,
                Err(FfrunError::EmptyCommand) => {
                    eprintln!("{}", EMPTY_COMMAND_NOTICE);
                    return Ok(ExitCode::from(EMPTY_COMMAND_EXIT));
                }
                Err(e) => return Err(e.into()),
            };

            return Ok(ExitCode::from(outcome.exit_code()));
        }
        Commands::Shell => {
            let Some(session) = open_session(config, true).await? else {
                return Ok(ExitCode::FAILURE);
            };
            run_shell(&session).await?;
        }
        Commands::Info => {
            let loader = BinaryLoader::new(config.binary);
            // Failure is reported through the state below
            let _ = loader.load().await;

            println!("Architecture: {}", std::env::consts::ARCH);
            match loader.state() {
                LoadState::Loaded(loaded) => {
                    println!("Status:       loaded");
                    println!("Binary:       {}", loaded.path().display());
                    println!("Bundled:      {}", if loaded.installed() { "yes" } else { "no" });
                    println!("Version:      {}", loaded.version().unwrap_or("not verified"));
                }
                LoadState::Unsupported(reason) => {
                    println!("Status:       not supported");
                    println!("Reason:       {}", reason);
                }
                LoadState::Unloaded => println!("Status:       not loaded"),
            }
        }
        Commands::Init { output, force } => {
            if output.exists() && !force {
                return Err(FfrunError::Config(format!(
                    "{} already exists, pass --force to overwrite",
                    output.display()
                ))
                .into());
            }
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Open the session, or show the blocking "not supported" notice and
/// return `None` so the caller exits with a failure status.
async fn open_session(config: Config, interactive: bool) -> Result<Option<Session>> {
    match Session::open(config).await {
        Ok(session) => Ok(Some(session)),
        Err(FfrunError::NotSupported(reason)) => {
            error!("FFmpeg not supported on this host: {}", reason);
            eprintln!("{}", DEVICE_NOT_SUPPORTED);
            eprintln!("{}", reason);
            if interactive {
                eprintln!("{}", DEVICE_NOT_SUPPORTED_MESSAGE);
                let mut line = String::new();
                BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
            }
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Interactive loop: every stdin line is a command. Lines typed while a
/// command runs, including while its output is still being printed, are
/// rejected with a notice rather than queued.
async fn run_shell(session: &Session) -> Result<()> {
    info!("Shell started, enter ffmpeg arguments (exit to quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight: Option<JoinHandle<RunOutcome>> = None;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input == "exit" || input == "quit" {
            break;
        }

        match session.submit(input, ConsoleHandler::stdout()) {
            Ok(handle) => {
                // Accepted only after the previous observer finished
                if let Some(previous) = in_flight.replace(handle) {
                    previous.await?;
                }
            }
            Err(FfrunError::EmptyCommand) => eprintln!("{}", EMPTY_COMMAND_NOTICE),
            Err(FfrunError::AlreadyRunning) => eprintln!("{}", ALREADY_RUNNING_NOTICE),
            Err(e) => warn!("Command rejected: {}", e),
        }
    }

    if let Some(handle) = in_flight.take() {
        handle.await?;
    }

    info!("Shell closed");
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".ffrun").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "ffrun.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console layer goes to stderr; stdout carries command output
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("ffrun.log").display()
    );

    Ok(())
}
