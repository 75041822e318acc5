use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::command::Command;
use crate::config::RunnerConfig;
use crate::error::{FfrunError, Result};
use crate::event::{ResponseHandler, RunEvent, RunEvents, RunOutcome};
use crate::loader::Loaded;

/// Smallest event channel; `Started`, a terminal event and `Finished` must fit
/// without a consumer when a launch fails.
const MIN_EVENT_BUFFER: usize = 4;

/// Idle/running flag shared by all clones of one runner
#[derive(Debug, Default)]
struct RunState {
    running: AtomicBool,
}

impl RunState {
    fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { state: Arc::clone(self) })
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Returns the runner to idle when dropped.
///
/// Shared between the monitor task and the consumer's `RunEvents`; the runner
/// is idle only once both the process and the observer are done.
pub(crate) struct RunGuard {
    state: Arc<RunState>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
    }
}

/// Launches the loaded ffmpeg binary, one command at a time.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    binary: PathBuf,
    config: RunnerConfig,
    state: Arc<RunState>,
}

impl CommandRunner {
    pub fn new(loaded: &Loaded, config: RunnerConfig) -> Self {
        Self {
            binary: loaded.path.clone(),
            config,
            state: Arc::new(RunState::default()),
        }
    }

    /// Whether a command is currently in flight
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Launch `command` and return its event stream.
    ///
    /// `Started` is queued before this returns. Fails with `AlreadyRunning`
    /// without emitting anything when another run holds the runner. The
    /// runner stays busy until the consumer has received `Finished` (or
    /// dropped the stream) and the process has exited.
    pub fn execute(&self, command: &Command) -> Result<RunEvents> {
        if command.is_empty() {
            return Err(FfrunError::EmptyCommand);
        }

        let guard = Arc::new(self.state.try_begin().ok_or(FfrunError::AlreadyRunning)?);

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(MIN_EVENT_BUFFER));
        let span = info_span!("run", %id);

        info!(parent: &span, "Started command : {} {}", self.binary.display(), command);
        // Fresh channel with spare capacity, cannot fail
        let _ = tx.try_send(RunEvent::Started);

        match self.spawn(command) {
            Ok(child) => {
                tokio::spawn(monitor(child, tx, Arc::clone(&guard)).instrument(span));
            }
            Err(e) => {
                let message = FfrunError::Spawn(e.to_string()).to_string();
                warn!(parent: &span, "{}", message);
                let _ = tx.try_send(RunEvent::Failed(message));
                let _ = tx.try_send(RunEvent::Finished);
                info!(parent: &span, "Finished command : {} {}", self.binary.display(), command);
            }
        }

        Ok(RunEvents::new(id, rx, Some(guard)))
    }

    /// Launch `command` and deliver its lifecycle to `handler` on a separate task.
    ///
    /// The returned handle resolves to the run's outcome after `on_finish`;
    /// the runner accepts a new command only once `on_finish` has returned.
    pub fn run<H>(&self, command: &Command, mut handler: H) -> Result<JoinHandle<RunOutcome>>
    where
        H: ResponseHandler + 'static,
    {
        let events = self.execute(command)?;
        Ok(tokio::spawn(async move { events.dispatch(&mut handler).await }))
    }

    fn spawn(&self, command: &Command) -> std::io::Result<Child> {
        let mut cmd = ProcessCommand::new(&self.binary);
        cmd.args(command.as_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        debug!("Executing ffmpeg command: {:?}", cmd);
        cmd.spawn()
    }
}

/// Stream output lines until both pipes close, then report the exit status.
async fn monitor(mut child: Child, tx: mpsc::Sender<RunEvent>, guard: Arc<RunGuard>) {
    let mut output = String::new();

    let mut stdout = child.stdout.take().map(OutputLines::new);
    let mut stderr = child.stderr.take().map(OutputLines::new);

    loop {
        tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => match line {
                Some(line) => emit_line(&tx, &mut output, line).await,
                None => stdout = None,
            },
            line = next_line(&mut stderr), if stderr.is_some() => match line {
                Some(line) => emit_line(&tx, &mut output, line).await,
                None => stderr = None,
            },
            else => break,
        }
    }

    let event = match child.wait().await {
        Ok(status) if status.success() => {
            info!("Command succeeded");
            RunEvent::Succeeded(output)
        }
        Ok(status) => {
            warn!("Command failed with {}", status);
            RunEvent::Failed(output)
        }
        Err(e) => {
            warn!("Failed to wait for ffmpeg: {}", e);
            output.push_str(&e.to_string());
            RunEvent::Failed(output)
        }
    };

    let _ = tx.send(event).await;
    drop(guard);
    let _ = tx.send(RunEvent::Finished).await;
    info!("Finished command");
}

/// Splits process output into lines on `\n`, `\r` or `\r\n`.
///
/// ffmpeg rewrites its status line with bare `\r`, so each rewrite is a line
/// of its own. Bytes that are not valid UTF-8 are replaced, never fatal.
/// Partial lines survive a cancelled `next_line`.
struct OutputLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    skip_lf: bool,
}

impl<R: AsyncRead + Unpin> OutputLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            skip_lf: false,
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            let mut start = 0;
            if self.skip_lf {
                self.skip_lf = false;
                if available[0] == b'\n' {
                    start = 1;
                }
            }

            match available[start..].iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    let end = start + pos;
                    self.buf.extend_from_slice(&available[start..end]);
                    self.skip_lf = available[end] == b'\r';
                    self.reader.consume(end + 1);
                    return Ok(Some(self.take_line()));
                }
                None => {
                    self.buf.extend_from_slice(&available[start..]);
                    let len = available.len();
                    self.reader.consume(len);
                }
            }
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }
}

async fn next_line<R>(lines: &mut Option<OutputLines<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(lines) => match lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read process output: {}", e);
                None
            }
        },
        None => None,
    }
}

async fn emit_line(tx: &mpsc::Sender<RunEvent>, output: &mut String, line: String) {
    output.push_str(&line);
    output.push('\n');
    // Receiver may be gone; keep draining so the process is not blocked on a full pipe
    let _ = tx.send(RunEvent::Progress(line)).await;
}
