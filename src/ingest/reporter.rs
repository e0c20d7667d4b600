//! Best-effort status delivery over an unreliable duplex channel.
//!
//! [`TransportReporter`] never fails its caller. It tracks channel health in an explicit
//! `HEALTHY ⇄ PERMANENTLY_FAILED` state machine driven by the structured [`TransportError`]
//! kinds raised at the [`StatusSink`] boundary. Once failed, intermediate reports are dropped;
//! a terminal report (`DONE`/`ERROR`) resets the state once and gets a fresh retry cycle.

use super::types::StatusReport;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Failure to hand a report to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The channel is unusable from now on; retrying is pointless.
    #[error("status channel permanently unavailable: {0}")]
    Permanent(String),
    /// The send may succeed if attempted again.
    #[error("status channel temporarily unavailable: {0}")]
    Transient(String),
}

/// Transport boundary for status reports.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Deliver one report, classifying any failure.
    async fn deliver(&self, report: &StatusReport) -> Result<(), TransportError>;
}

/// Retry budget applied to each delivery cycle.
#[derive(Debug, Clone, Copy)]
pub struct ReporterPolicy {
    /// Attempts per cycle, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_pause: Duration,
}

impl Default for ReporterPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_pause: DEFAULT_RETRY_PAUSE,
        }
    }
}

/// Channel health as seen by the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterPhase {
    /// Reports are being attempted.
    Healthy,
    /// Intermediate reports are dropped until a terminal report forces a reset.
    PermanentlyFailed,
}

/// Snapshot of a reporter's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterHealth {
    /// Current state.
    pub phase: ReporterPhase,
    /// Failed deliveries since the last success.
    pub consecutive_failures: u32,
}

/// Failure-contained status emitter shared by every upload on one connection.
pub struct TransportReporter {
    sink: Arc<dyn StatusSink>,
    policy: ReporterPolicy,
    failed: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl TransportReporter {
    /// Create a healthy reporter writing to `sink`.
    pub fn new(sink: Arc<dyn StatusSink>, policy: ReporterPolicy) -> Self {
        Self {
            sink,
            policy,
            failed: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Send a report. Never fails and never blocks longer than one retry cycle.
    pub async fn send(&self, report: &StatusReport) {
        tracing::info!(
            upload_id = %report.id,
            phase = %report.phase,
            elapsed_seconds = report.elapsed_seconds,
            "{}",
            report.message
        );

        if report.phase.is_terminal() && self.failed.swap(false, Ordering::SeqCst) {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            tracing::info!(
                upload_id = %report.id,
                phase = %report.phase,
                "Retrying failed status channel for terminal report"
            );
        }

        if self.failed.load(Ordering::SeqCst) {
            tracing::trace!(upload_id = %report.id, "Status channel failed; report dropped");
            return;
        }

        self.deliver_with_retry(report).await;
    }

    /// Current health snapshot.
    pub fn health(&self) -> ReporterHealth {
        ReporterHealth {
            phase: if self.failed.load(Ordering::SeqCst) {
                ReporterPhase::PermanentlyFailed
            } else {
                ReporterPhase::Healthy
            },
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
        }
    }

    async fn deliver_with_retry(&self, report: &StatusReport) {
        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.sink.deliver(report).await {
                Ok(()) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    tracing::debug!(upload_id = %report.id, phase = %report.phase, attempt, "Status delivered");
                    return;
                }
                Err(TransportError::Permanent(reason)) => {
                    self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                    self.mark_failed(&report.id, &reason);
                    return;
                }
                Err(TransportError::Transient(reason)) => {
                    self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                    if attempt == 1 {
                        tracing::warn!(
                            upload_id = %report.id,
                            reason,
                            max_attempts,
                            "Status send failed; retrying"
                        );
                    }
                    if attempt == max_attempts {
                        self.mark_failed(&report.id, &reason);
                        return;
                    }
                    tokio::time::sleep(self.policy.retry_pause).await;
                }
            }
        }
    }

    fn mark_failed(&self, upload_id: &str, reason: &str) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                upload_id,
                reason,
                "Status channel permanently failed; continuing without status updates"
            );
        }
    }
}

const STATUS_QUEUE_CAPACITY: usize = 64;
const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Sink feeding a dedicated writer task through a bounded queue.
///
/// A closed queue means the writer is gone (socket closed or a write failed) and is reported
/// as [`TransportError::Permanent`]; a full queue that does not drain within the enqueue
/// timeout is [`TransportError::Transient`].
pub struct ChannelSink {
    tx: mpsc::Sender<StatusReport>,
    enqueue_timeout: Duration,
}

impl ChannelSink {
    /// Create a sink and the receiver its writer task should drain.
    pub fn new() -> (Self, mpsc::Receiver<StatusReport>) {
        Self::with_capacity(STATUS_QUEUE_CAPACITY, DEFAULT_ENQUEUE_TIMEOUT)
    }

    /// Create a sink with an explicit queue size and enqueue timeout.
    pub fn with_capacity(
        capacity: usize,
        enqueue_timeout: Duration,
    ) -> (Self, mpsc::Receiver<StatusReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                enqueue_timeout,
            },
            rx,
        )
    }
}

#[async_trait]
impl StatusSink for ChannelSink {
    async fn deliver(&self, report: &StatusReport) -> Result<(), TransportError> {
        match self
            .tx
            .send_timeout(report.clone(), self.enqueue_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(TransportError::Permanent(
                "status writer has shut down".to_string(),
            )),
            Err(SendTimeoutError::Timeout(_)) => Err(TransportError::Transient(
                "status queue is full".to_string(),
            )),
        }
    }
}
