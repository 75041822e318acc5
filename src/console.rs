use std::io::{self, Stdout, Write};
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use crate::event::{ResponseHandler, RunEvent};

pub const DEVICE_NOT_SUPPORTED: &str = "Device not supported";
pub const DEVICE_NOT_SUPPORTED_MESSAGE: &str =
    "FFmpeg is not supported on this device. Press Enter to exit.";
pub const EMPTY_COMMAND_NOTICE: &str = "Please enter a command";
pub const ALREADY_RUNNING_NOTICE: &str = "A command is already running, wait for it to finish";

/// Terminal rendition of the run screen: an append-only output log plus a
/// spinner that stays up while the command runs.
pub struct ConsoleHandler<W: Write + Send = Stdout> {
    out: W,
    spinner: ProgressBar,
}

impl ConsoleHandler<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), ProgressBar::new_spinner())
    }
}

impl<W: Write + Send> ConsoleHandler<W> {
    pub fn new(out: W, spinner: ProgressBar) -> Self {
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { out, spinner }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        let out = &mut self.out;
        let result = self.spinner.suspend(|| writeln!(out, "{}", text));
        if let Err(e) = result {
            warn!("Failed to write command output: {}", e);
        }
    }
}

#[async_trait]
impl<W: Write + Send> ResponseHandler for ConsoleHandler<W> {
    async fn on_start(&mut self) {
        self.spinner.set_message("Processing...");
        self.spinner.enable_steady_tick(Duration::from_millis(100));
    }

    async fn on_progress(&mut self, message: String) {
        self.line(&format!("progress : {}", message));
        self.spinner.set_message(format!("Processing {}", message));
    }

    async fn on_success(&mut self, message: String) {
        self.line(&format!("SUCCESS with output : {}", message));
    }

    async fn on_failure(&mut self, message: String) {
        self.line(&format!("FAILED with output : {}", message));
    }

    async fn on_finish(&mut self) {
        self.spinner.finish_and_clear();
        if let Err(e) = self.out.flush() {
            debug!("Failed to flush command output: {}", e);
        }
    }
}

/// Writes every lifecycle event as one JSON object per line
pub struct JsonHandler<W: Write + Send = Stdout> {
    out: W,
}

impl JsonHandler<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonHandler<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, event: RunEvent) {
        let result = serde_json::to_string(&event)
            .map_err(io::Error::from)
            .and_then(|json| writeln!(self.out, "{}", json));
        if let Err(e) = result {
            warn!("Failed to write event: {}", e);
        }
    }
}

#[async_trait]
impl<W: Write + Send> ResponseHandler for JsonHandler<W> {
    async fn on_start(&mut self) {
        self.emit(RunEvent::Started);
    }

    async fn on_progress(&mut self, message: String) {
        self.emit(RunEvent::Progress(message));
    }

    async fn on_success(&mut self, message: String) {
        self.emit(RunEvent::Succeeded(message));
    }

    async fn on_failure(&mut self, message: String) {
        self.emit(RunEvent::Failed(message));
    }

    async fn on_finish(&mut self) {
        self.emit(RunEvent::Finished);
        if let Err(e) = self.out.flush() {
            debug!("Failed to flush event output: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_log_lines() {
        let mut handler = ConsoleHandler::new(Vec::new(), ProgressBar::hidden());
        handler.on_start().await;
        handler.on_progress("ffmpeg version 6.1".into()).await;
        handler.on_failure("ffmpeg version 6.1\n".into()).await;
        handler.on_finish().await;

        let text = String::from_utf8(handler.into_inner()).unwrap();
        assert_eq!(
            text,
            "progress : ffmpeg version 6.1\nFAILED with output : ffmpeg version 6.1\n\n"
        );
    }

    #[tokio::test]
    async fn test_console_spinner_cleared_on_finish() {
        let spinner = ProgressBar::hidden();
        let mut handler = ConsoleHandler::new(Vec::new(), spinner.clone());
        handler.on_start().await;
        assert_eq!(spinner.message(), "Processing...");
        handler.on_progress("frame=42".into()).await;
        assert_eq!(spinner.message(), "Processing frame=42");
        handler.on_success(String::new()).await;
        handler.on_finish().await;
        assert!(spinner.is_finished());
    }

    #[tokio::test]
    async fn test_json_lines() {
        let mut handler = JsonHandler::new(Vec::new());
        handler.on_start().await;
        handler.on_progress("frame=1".into()).await;
        handler.on_success("frame=1\n".into()).await;
        handler.on_finish().await;

        let text = String::from_utf8(handler.into_inner()).unwrap();
        let events: Vec<RunEvent> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            events,
            vec![
                RunEvent::Started,
                RunEvent::Progress("frame=1".into()),
                RunEvent::Succeeded("frame=1\n".into()),
                RunEvent::Finished,
            ]
        );
    }

    /// Writer whose flush always fails
    struct BrokenFlush(Vec<u8>);

    impl Write for BrokenFlush {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[tokio::test]
    async fn test_flush_failure_still_finishes() {
        let spinner = ProgressBar::hidden();
        let mut handler = ConsoleHandler::new(BrokenFlush(Vec::new()), spinner.clone());
        handler.on_start().await;
        handler.on_success("ok".into()).await;
        handler.on_finish().await;

        assert!(spinner.is_finished());
        assert_eq!(handler.into_inner().0, b"SUCCESS with output : ok\n");
    }
}
