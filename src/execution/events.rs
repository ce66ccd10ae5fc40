// Execution Events
// Progress reporting channel for external consumers (dashboards, CLIs).
// Fire-and-forget: a dropped receiver never stalls execution.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::execution::run::RunStatus;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Wrap a progress receiver as an async `Stream` for consumers that want
/// combinator-style processing.
pub fn progress_stream(rx: ProgressReceiver) -> UnboundedReceiverStream<ExecutionEvent> {
    UnboundedReceiverStream::new(rx)
}

/// Events emitted while a run executes
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: u64,
        pipeline_name: String,
        total_stages: usize,
    },
    RunCompleted {
        run_id: u64,
        status: RunStatus,
        duration: Duration,
    },
    StageStarted {
        stage: String,
    },
    StageCompleted {
        stage: String,
        status: RunStatus,
    },
    StageSkipped {
        stage: String,
        reason: String,
    },
    JobStarted {
        stage: String,
        job: String,
    },
    JobCompleted {
        stage: String,
        job: String,
        status: RunStatus,
    },
    StepStarted {
        stage: String,
        job: String,
        step_index: usize,
        label: String,
    },
    /// Captured output of a finished step (stdout, and stderr when marked)
    StepOutput {
        stage: String,
        job: String,
        step_index: usize,
        output: String,
        is_error: bool,
    },
    StepCompleted {
        stage: String,
        job: String,
        step_index: usize,
        status: RunStatus,
        exit_code: Option<i32>,
    },
}

/// Helper trait for sending events without caring whether anyone listens.
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::RunStarted {
            run_id: 1,
            pipeline_name: "demo".to_string(),
            total_stages: 2,
        });
        tx.send_event(ExecutionEvent::StageStarted {
            stage: "Build".to_string(),
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            ExecutionEvent::RunStarted { run_id: 1, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ExecutionEvent::StageStarted { .. }
        ));
    }

    #[tokio::test]
    async fn stream_wrapper_yields_events() {
        let (tx, rx) = progress_channel();
        tx.send_event(ExecutionEvent::StageSkipped {
            stage: "Deploy".to_string(),
            reason: "dependency failed".to_string(),
        });
        drop(tx);

        let events: Vec<_> = progress_stream(rx).collect().await;
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn dropped_receiver_is_harmless() {
        let (tx, rx) = progress_channel();
        drop(rx);
        tx.send_event(ExecutionEvent::StageStarted {
            stage: "Build".to_string(),
        });

        let absent: Option<ProgressSender> = None;
        absent.send_event(ExecutionEvent::StageStarted {
            stage: "Build".to_string(),
        });
    }
}
