use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::command::Command;
use crate::config::Config;
use crate::error::{FfrunError, Result};
use crate::event::{ResponseHandler, RunEvents, RunOutcome};
use crate::loader::{BinaryLoader, Loaded};
use crate::runner::CommandRunner;

/// One interactive screen: the loaded binary plus its runner.
pub struct Session {
    loader: BinaryLoader,
    loaded: Loaded,
    runner: CommandRunner,
}

impl Session {
    /// Load the binary and prepare the runner.
    ///
    /// Fails with `NotSupported` when the host cannot run ffmpeg; such a
    /// session never exists, so nothing can be submitted afterwards.
    pub async fn open(config: Config) -> Result<Self> {
        let loader = BinaryLoader::new(config.binary);
        let loaded = loader.load().await?;
        let runner = loader.runner(config.runner)?;

        info!("Session ready with {}", loaded.path().display());
        Ok(Self { loader, loaded, runner })
    }

    pub fn loaded(&self) -> &Loaded {
        &self.loaded
    }

    pub fn loader(&self) -> &BinaryLoader {
        &self.loader
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Tokenize `input` and run it, delivering callbacks to `handler`.
    pub fn submit<H>(&self, input: &str, handler: H) -> Result<JoinHandle<RunOutcome>>
    where
        H: ResponseHandler + 'static,
    {
        let command = Self::tokenize(input)?;
        self.runner.run(&command, handler).inspect_err(log_rejection)
    }

    /// Tokenize `input` and run it, returning the raw event stream.
    pub fn submit_events(&self, input: &str) -> Result<RunEvents> {
        let command = Self::tokenize(input)?;
        self.runner.execute(&command).inspect_err(log_rejection)
    }

    fn tokenize(input: &str) -> Result<Command> {
        let command = Command::parse(input);
        if command.is_empty() {
            return Err(FfrunError::EmptyCommand);
        }
        Ok(command)
    }
}

fn log_rejection(err: &FfrunError) {
    if matches!(err, FfrunError::AlreadyRunning) {
        warn!("Rejected command: another command is still running");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::event::{MockResponseHandler, RunEvent};
    use std::collections::BTreeMap;
    use std::path::Path;

    fn sh_config() -> Config {
        let mut config = Config::default();
        config.binary.assets = BTreeMap::new();
        config.binary.fallback = Some("/bin/sh".to_string());
        config.binary.verify = false;
        config
    }

    #[tokio::test]
    async fn test_empty_input_never_reaches_runner() {
        let session = Session::open(sh_config()).await.unwrap();

        let mut handler = MockResponseHandler::new();
        handler.expect_on_start().never();
        handler.expect_on_finish().never();

        assert!(matches!(session.submit("", handler), Err(FfrunError::EmptyCommand)));
        assert!(matches!(session.submit_events("  "), Err(FfrunError::EmptyCommand)));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_submit_events_while_running() {
        let session = Session::open(sh_config()).await.unwrap();
        assert_eq!(session.loaded().path(), Path::new("/bin/sh"));

        // The input is split on whitespace, so the script itself must not contain any
        let mut first = session.submit_events("-c sleep${IFS}0.3").unwrap();
        assert!(matches!(session.submit_events("-c true"), Err(FfrunError::AlreadyRunning)));

        let mut last = None;
        while let Some(event) = first.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(RunEvent::Finished));
        assert!(session.submit_events("-c true").is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_host_has_no_session() {
        let mut config = sh_config();
        config.binary.fallback = None;

        let result = Session::open(config).await;
        assert!(matches!(result, Err(FfrunError::NotSupported(_))));
    }
}
