//! Status poller: drives a submitted job to a terminal state.
//!
//! Each status read is a single idempotent request. Between reads the poller
//! sleeps for an interval that starts at `initial_interval`, grows by
//! `growth_factor` after every non-terminal read and is capped at
//! `max_interval`. Transient transport failures count as non-terminal reads,
//! so the next scheduled poll is the retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::PollSettings;
use crate::domain::{JobHandle, JobStatus, TerminalJob};
use crate::ports::{Clock, ComputationService};
use crate::{CipherflowError, Result};

/// Cooperative cancellation for an in-flight poll loop.
///
/// Checked before every status read and before every sleep.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Polls a job until it succeeds, fails, or times out.
pub struct StatusPoller<S, C>
where
    S: ComputationService + ?Sized,
    C: Clock + ?Sized,
{
    service: Arc<S>,
    clock: Arc<C>,
    settings: PollSettings,
}

impl<S, C> StatusPoller<S, C>
where
    S: ComputationService + ?Sized,
    C: Clock + ?Sized,
{
    /// Create a poller.
    ///
    /// # Errors
    /// Returns `CipherflowError::Configuration` if the settings are invalid.
    pub fn new(service: Arc<S>, clock: Arc<C>, settings: PollSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            service,
            clock,
            settings,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Poll until the job reaches a terminal state.
    ///
    /// # Errors
    /// - `JobExecution` with the server's message if the job failed
    /// - `EmptyResultSet` if the job succeeded without results
    /// - `JobTimeout` once `max_timeout` has elapsed without a terminal state
    /// - `ProtocolViolation` if the reported status moves backwards
    /// - `StatusUnavailable` on a non-transient status read failure
    pub fn poll(&self, handle: &JobHandle) -> Result<TerminalJob> {
        self.poll_with_cancel(handle, &CancellationFlag::new())
    }

    /// Same as [`poll`](Self::poll), but stops early with `Cancelled` once
    /// `cancel` is set.
    ///
    /// # Errors
    /// See [`poll`](Self::poll).
    pub fn poll_with_cancel(
        &self,
        handle: &JobHandle,
        cancel: &CancellationFlag,
    ) -> Result<TerminalJob> {
        let started = self.clock.now();
        let mut interval = self.settings.initial_interval;
        let mut last_status: Option<JobStatus> = None;
        let mut polls: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                tracing::info!("Polling of job {} cancelled after {} reads", handle, polls);
                return Err(CipherflowError::Cancelled {
                    job: handle.id.clone(),
                });
            }

            polls += 1;
            match self.service.get_status(handle) {
                Ok(report) => {
                    if let Some(previous) = last_status {
                        if !previous.can_transition_to(report.status) {
                            return Err(CipherflowError::ProtocolViolation {
                                context: format!("job {handle}"),
                                message: format!(
                                    "status moved from {previous} to {}",
                                    report.status
                                ),
                            });
                        }
                    }
                    last_status = Some(report.status);

                    match report.status {
                        JobStatus::Success => {
                            let elapsed = self.clock.now().saturating_sub(started);
                            if report.results.is_empty() {
                                tracing::error!("Job {} succeeded with an empty result set", handle);
                                return Err(CipherflowError::EmptyResultSet {
                                    job: handle.id.clone(),
                                });
                            }
                            tracing::info!(
                                "Job {} succeeded after {} reads ({:?}) with {} result(s)",
                                handle,
                                polls,
                                elapsed,
                                report.results.len()
                            );
                            return Ok(TerminalJob {
                                handle: handle.clone(),
                                results: report.results,
                                polls,
                                elapsed,
                            });
                        }
                        JobStatus::Error => {
                            let message = report
                                .error
                                .unwrap_or_else(|| "no error message provided".to_string());
                            tracing::warn!("Job {} failed: {}", handle, message);
                            return Err(CipherflowError::JobExecution {
                                job: handle.id.clone(),
                                message,
                            });
                        }
                        JobStatus::Requested | JobStatus::Running => {
                            tracing::debug!("Job {} is {} (read {})", handle, report.status, polls);
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Transient failure reading status of job {}: {}", handle, e);
                }
                Err(e) => {
                    return Err(CipherflowError::StatusUnavailable {
                        job: handle.id.clone(),
                        source: e,
                    });
                }
            }

            let elapsed = self.clock.now().saturating_sub(started);
            if elapsed > self.settings.max_timeout {
                tracing::warn!(
                    "Job {} still not terminal after {:?} ({} reads), giving up",
                    handle,
                    elapsed,
                    polls
                );
                return Err(CipherflowError::JobTimeout {
                    job: handle.id.clone(),
                    timeout: self.settings.max_timeout,
                    polls,
                });
            }

            if cancel.is_cancelled() {
                continue;
            }

            tracing::trace!("Sleeping {:?} before next status read", interval);
            self.clock.sleep(interval);
            interval = self.settings.next_interval(interval);
        }
    }
}
