//! Training status monitoring with user controlled cancellation
//!
//! The front-end forwards user input into a [`SignalSender`]. Signals are
//! only accepted while a monitor is running; outside monitoring `send`
//! reports `false` so the front-end can fall back to its default handling.
//!
//! The monitor is a two-state latch. While `Polling` it checks the status
//! and sleeps for the interval; an interrupt moves it to `Paused`. While
//! `Paused` a second interrupt cancels the run, any other input resumes
//! polling.

use modeltrain_core::{JobId, JobState};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::training_service::{TrainingService, TrainingServiceResult};

/// User input relevant to a running monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSignal {
    /// Ctrl+C
    Interrupt,
    /// Any other input
    Resume,
}

/// Sending half of the monitor signal channel
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: UnboundedSender<MonitorSignal>,
    armed: Arc<AtomicBool>,
}

impl SignalSender {
    /// Deliver `signal` to the running monitor. Returns `false` when no
    /// monitor is listening.
    pub fn send(&self, signal: MonitorSignal) -> bool {
        self.is_armed() && self.tx.send(signal).is_ok()
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

/// Receiving half of the monitor signal channel
#[derive(Debug)]
pub struct SignalReceiver {
    rx: UnboundedReceiver<MonitorSignal>,
    armed: Arc<AtomicBool>,
}

pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let armed = Arc::new(AtomicBool::new(false));
    (
        SignalSender {
            tx,
            armed: armed.clone(),
        },
        SignalReceiver { rx, armed },
    )
}

impl SignalReceiver {
    fn arm(&mut self) -> ArmedReceiver<'_> {
        self.armed.store(true, Ordering::SeqCst);
        ArmedReceiver {
            receiver: self,
            open: true,
        }
    }
}

/// Accepts signals for as long as it lives
struct ArmedReceiver<'a> {
    receiver: &'a mut SignalReceiver,
    open: bool,
}

impl ArmedReceiver<'_> {
    /// Next signal. `None` reports once that every sender is gone, later
    /// calls pend forever.
    async fn recv(&mut self) -> Option<MonitorSignal> {
        if !self.open {
            return std::future::pending().await;
        }
        let signal = self.receiver.rx.recv().await;
        self.open = signal.is_some();
        signal
    }
}

impl Drop for ArmedReceiver<'_> {
    fn drop(&mut self) {
        self.receiver.armed.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Latch {
    Polling,
    Paused,
}

/// How monitoring ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The run reached a terminal state
    Finished(JobState),
    /// The user canceled the run; carries the cancel failure, if any
    Canceled { cancel_error: Option<String> },
}

/// Poll `job_id` until it reaches a terminal state or the user cancels it.
/// Server errors while polling are tolerated and shown as `?`.
pub async fn monitor(
    service: &dyn TrainingService,
    job_id: &JobId,
    interval: Duration,
    reattach_command: &str,
    signals: &mut SignalReceiver,
) -> TrainingServiceResult<MonitorOutcome> {
    println!(
        "Checking model training status every {} seconds. Press Ctrl+C once to stop monitoring or press Ctrl+C twice to cancel training.",
        interval.as_secs()
    );
    println!("Status - (p)ending (r)unning (e)rror (c)ompleted or canceled:");

    let mut signals = signals.arm();
    let mut latch = Latch::Polling;
    loop {
        match latch {
            Latch::Polling => {
                let state = service
                    .get_status(job_id, true)
                    .await?
                    .map(|status| status.state)
                    .unwrap_or_default();
                print!("{}", state.indicator());
                let _ = std::io::stdout().flush();

                if state.is_terminal() {
                    match state {
                        JobState::Completed => println!("\nTraining completed."),
                        JobState::Error => println!("\nTraining failed."),
                        _ => println!("\nTraining canceled."),
                    }
                    return Ok(MonitorOutcome::Finished(state));
                }

                let sleep = tokio::time::sleep(interval);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        signal = signals.recv() => match signal {
                            Some(MonitorSignal::Interrupt) => {
                                println!("\nTraining monitoring was stopped.");
                                println!(
                                    "Press Ctrl+C again to cancel model training or Enter to continue monitoring."
                                );
                                latch = Latch::Paused;
                                break;
                            }
                            Some(MonitorSignal::Resume) => debug!("ignoring input while polling"),
                            None => debug!("signal channel closed"),
                        },
                    }
                }
            }
            Latch::Paused => match signals.recv().await {
                Some(MonitorSignal::Interrupt) => {
                    let cancel_error = match service.cancel(job_id, true).await {
                        Ok(()) => {
                            println!("Model training was canceled.");
                            None
                        }
                        Err(e) => {
                            warn!("cancel of {} failed: {}", job_id, e);
                            println!("Model training could not be canceled: {}", e);
                            Some(e.to_string())
                        }
                    };
                    return Ok(MonitorOutcome::Canceled { cancel_error });
                }
                Some(MonitorSignal::Resume) => {
                    println!("To resume monitoring later, run \"{}\"", reattach_command);
                    println!("Resuming training monitoring ...");
                    latch = Latch::Polling;
                }
                None => latch = Latch::Polling,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training_service::{InMemoryTrainingService, StatusStep};
    use tokio::time::Instant;

    fn job() -> JobId {
        JobId::parse("training-0001").unwrap()
    }

    async fn service(states: Vec<StatusStep>) -> InMemoryTrainingService {
        InMemoryTrainingService::new()
            .with_job(&job())
            .await
            .with_statuses(states)
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_completed() {
        let service = service(vec![
            StatusStep::State(JobState::Pending),
            StatusStep::State(JobState::Running),
            StatusStep::State(JobState::Running),
            StatusStep::State(JobState::Completed),
        ])
        .await;
        let (_tx, mut rx) = signal_channel();
        let interval = Duration::from_secs(15);

        let started = Instant::now();
        let outcome = monitor(&service, &job(), interval, "reattach", &mut rx)
            .await
            .unwrap();

        assert_eq!(outcome, MonitorOutcome::Finished(JobState::Completed));
        assert_eq!(service.status_calls().await, 4);
        assert_eq!(started.elapsed(), interval * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_show_as_unknown() {
        let service = service(vec![
            StatusStep::ServerError,
            StatusStep::Missing,
            StatusStep::State(JobState::Error),
        ])
        .await;
        let (_tx, mut rx) = signal_channel();

        let outcome = monitor(&service, &job(), Duration::from_secs(1), "reattach", &mut rx)
            .await
            .unwrap();

        assert_eq!(outcome, MonitorOutcome::Finished(JobState::Error));
        assert_eq!(service.status_calls().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_interrupt_cancels_once() {
        let service = service(vec![StatusStep::State(JobState::Running)]).await;
        let (tx, mut rx) = signal_channel();
        assert!(!tx.send(MonitorSignal::Interrupt), "not armed before monitoring");

        let sender = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            assert!(sender.send(MonitorSignal::Interrupt));
            assert!(sender.send(MonitorSignal::Interrupt));
        });

        let outcome = monitor(&service, &job(), Duration::from_secs(15), "reattach", &mut rx)
            .await
            .unwrap();

        assert_eq!(outcome, MonitorOutcome::Canceled { cancel_error: None });
        assert_eq!(service.cancel_calls().await, 1);
        assert_eq!(service.status_calls().await, 2);
        assert!(!tx.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cancel_is_reported() {
        let service = service(vec![StatusStep::State(JobState::Running)])
            .await
            .rejecting_cancel()
            .await;
        let (tx, mut rx) = signal_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(MonitorSignal::Interrupt);
            tx.send(MonitorSignal::Interrupt);
        });

        let outcome = monitor(&service, &job(), Duration::from_secs(15), "reattach", &mut rx)
            .await
            .unwrap();

        let MonitorOutcome::Canceled { cancel_error } = outcome else {
            panic!("expected cancellation");
        };
        assert!(cancel_error.is_some());
        assert_eq!(service.cancel_calls().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_continues_polling() {
        let service = service(vec![
            StatusStep::State(JobState::Running),
            StatusStep::State(JobState::Completed),
        ])
        .await;
        let (tx, mut rx) = signal_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(MonitorSignal::Interrupt);
            tx.send(MonitorSignal::Resume);
        });

        let outcome = monitor(&service, &job(), Duration::from_secs(15), "reattach", &mut rx)
            .await
            .unwrap();

        assert_eq!(outcome, MonitorOutcome::Finished(JobState::Completed));
        assert_eq!(service.cancel_calls().await, 0);
        assert_eq!(service.status_calls().await, 2);
    }
}
