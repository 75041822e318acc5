// Run lifecycle notifications
//
// A run produces an ordered stream of `RunEvent`s over a bounded channel:
//   Started, Progress*, (Succeeded | Failed), Finished
// `RunEvents::dispatch` turns that stream into `ResponseHandler` callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::runner::RunGuard;

/// Single lifecycle notification of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "message", rename_all = "snake_case")]
pub enum RunEvent {
    Started,
    Progress(String),
    Succeeded(String),
    Failed(String),
    Finished,
}

/// Terminal result of a run, carrying the accumulated process output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded(String),
    Failed(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded(_))
    }

    /// Process exit status reported by the front end for this outcome
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn output(&self) -> &str {
        match self {
            RunOutcome::Succeeded(output) | RunOutcome::Failed(output) => output,
        }
    }
}

/// Observer bound to exactly one run.
///
/// `on_start` comes first, `on_finish` comes last and exactly once, and
/// exactly one of `on_success` / `on_failure` is called in between.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseHandler: Send {
    async fn on_start(&mut self) {}

    /// One line of process output, in emission order
    async fn on_progress(&mut self, _message: String) {}

    async fn on_success(&mut self, _message: String) {}

    async fn on_failure(&mut self, _message: String) {}

    async fn on_finish(&mut self) {}
}

/// Receiving side of a run's event stream.
///
/// Holds the runner busy until `Finished` has been consumed or the stream is
/// dropped.
pub struct RunEvents {
    id: Uuid,
    rx: mpsc::Receiver<RunEvent>,
    guard: Option<Arc<RunGuard>>,
}

impl RunEvents {
    pub(crate) fn new(id: Uuid, rx: mpsc::Receiver<RunEvent>, guard: Option<Arc<RunGuard>>) -> Self {
        Self { id, rx, guard }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the run has finished and the stream is drained
    pub async fn recv(&mut self) -> Option<RunEvent> {
        let event = self.rx.recv().await;
        if matches!(event, Some(RunEvent::Finished) | None) {
            self.guard = None;
        }
        event
    }

    /// Drain the stream into `handler` and return the run's outcome.
    ///
    /// If the stream closes early the missing callbacks are synthesized, so
    /// `on_finish` and exactly one terminal callback always fire. The runner
    /// becomes idle only after `on_finish` returns.
    pub async fn dispatch<H>(mut self, handler: &mut H) -> RunOutcome
    where
        H: ResponseHandler + ?Sized,
    {
        let mut outcome = None;
        let mut finished = false;

        while let Some(event) = self.rx.recv().await {
            match event {
                RunEvent::Started => handler.on_start().await,
                RunEvent::Progress(line) => handler.on_progress(line).await,
                RunEvent::Succeeded(output) if outcome.is_none() => {
                    outcome = Some(RunOutcome::Succeeded(output.clone()));
                    handler.on_success(output).await;
                }
                RunEvent::Failed(output) if outcome.is_none() => {
                    outcome = Some(RunOutcome::Failed(output.clone()));
                    handler.on_failure(output).await;
                }
                RunEvent::Succeeded(_) | RunEvent::Failed(_) => {
                    warn!(run = %self.id, "Ignoring duplicate terminal event");
                }
                RunEvent::Finished => {
                    finished = true;
                    break;
                }
            }
        }

        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                warn!(run = %self.id, "Event stream closed before a result was reported");
                let message = "run ended without a result".to_string();
                handler.on_failure(message.clone()).await;
                RunOutcome::Failed(message)
            }
        };

        if !finished {
            warn!(run = %self.id, "Event stream closed before the finish notification");
        }
        handler.on_finish().await;
        self.guard = None;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    fn events(items: Vec<RunEvent>) -> RunEvents {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).unwrap();
        }
        RunEvents::new(Uuid::new_v4(), rx, None)
    }

    #[tokio::test]
    async fn test_dispatch_calls_handler_in_order() {
        let mut seq = Sequence::new();
        let mut handler = MockResponseHandler::new();
        handler.expect_on_start().times(1).in_sequence(&mut seq).return_const(());
        handler
            .expect_on_progress()
            .withf(|line| line == "frame=1")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        handler
            .expect_on_progress()
            .withf(|line| line == "frame=2")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        handler
            .expect_on_success()
            .withf(|output| output == "frame=1\nframe=2\n")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        handler.expect_on_failure().never();
        handler.expect_on_finish().times(1).in_sequence(&mut seq).return_const(());

        let outcome = events(vec![
            RunEvent::Started,
            RunEvent::Progress("frame=1".into()),
            RunEvent::Progress("frame=2".into()),
            RunEvent::Succeeded("frame=1\nframe=2\n".into()),
            RunEvent::Finished,
        ])
        .dispatch(&mut handler)
        .await;

        assert_eq!(outcome, RunOutcome::Succeeded("frame=1\nframe=2\n".into()));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_synthesizes_missing_terminal_callbacks() {
        let mut seq = Sequence::new();
        let mut handler = MockResponseHandler::new();
        handler.expect_on_start().times(1).in_sequence(&mut seq).return_const(());
        handler
            .expect_on_failure()
            .withf(|message| message == "run ended without a result")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        handler.expect_on_success().never();
        handler.expect_on_finish().times(1).in_sequence(&mut seq).return_const(());

        let outcome = events(vec![RunEvent::Started]).dispatch(&mut handler).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_ignores_second_terminal_event() {
        let mut handler = MockResponseHandler::new();
        handler.expect_on_start().times(1).return_const(());
        handler.expect_on_failure().times(1).return_const(());
        handler.expect_on_success().never();
        handler.expect_on_finish().times(1).return_const(());

        let outcome = events(vec![
            RunEvent::Started,
            RunEvent::Failed("exit 1".into()),
            RunEvent::Succeeded("late".into()),
            RunEvent::Finished,
        ])
        .dispatch(&mut handler)
        .await;

        assert_eq!(outcome.output(), "exit 1");
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&RunEvent::Progress("frame=10".into())).unwrap();
        assert_eq!(json, r#"{"event":"progress","message":"frame=10"}"#);

        let json = serde_json::to_string(&RunEvent::Finished).unwrap();
        assert_eq!(json, r#"{"event":"finished"}"#);
    }
}
