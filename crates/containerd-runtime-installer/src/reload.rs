//! Supervised restart of the service consuming the CRI configuration.
//!
//! A [`ReloadCoordinator`] issues a single restart request through a
//! [`UnitManager`] and waits for the job's terminal status, racing it
//! against a [`CancellationToken`] and an optional timeout. No retries are
//! attempted, and a cancelled wait does not undo anything.

use std::future::{Future, pending};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

pub const DEFAULT_UNIT: &str = "containerd.service";

/// Status reported by the service manager for a successful job.
pub const STATUS_DONE: &str = "done";

/// Receives the terminal status of a restart job.
pub type Completion = oneshot::Receiver<String>;

/// Capability to restart a unit of the host's service manager.
#[trait_variant::make(Send)]
pub trait UnitManager {
    /// Restarts `unit`, replacing any job already queued for it, and returns
    /// the channel on which the job's result is delivered.
    async fn restart_unit(&self, unit: &str) -> Result<Completion>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadState {
    Idle,
    RequestSent,
    Completed,
    Failed(String),
    TimedOut,
    Cancelled,
}

pub struct ReloadCoordinator<M> {
    manager: M,
    unit: String,
    timeout: Option<Duration>,
    state: ReloadState,
}

impl<M: UnitManager> ReloadCoordinator<M> {
    pub fn new(manager: M, unit: impl Into<String>) -> Self {
        Self {
            manager,
            unit: unit.into(),
            timeout: None,
            state: ReloadState::Idle,
        }
    }

    /// Gives up waiting for the job status after `timeout`. A zero duration
    /// waits forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn state(&self) -> &ReloadState {
        &self.state
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Restarts the unit and waits for its job to finish.
    pub async fn reload(&mut self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(self.finish(Error::Cancelled));
        }
        log::info!("restarting {}", self.unit);

        let completion = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            completion = self.manager.restart_unit(&self.unit) => completion,
        };
        let completion = match completion {
            Ok(completion) => completion,
            Err(err) => return Err(self.finish(err)),
        };
        self.state = ReloadState::RequestSent;

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            status = completion => match status {
                Ok(status) if status == STATUS_DONE => Ok(()),
                Ok(status) => Err(Error::ReloadFailed { status }),
                Err(_) => Err(Error::ServiceManager(
                    "job status channel closed without a result".to_string(),
                )),
            },
            err = expire(self.timeout) => Err(err),
        };

        match res {
            Ok(()) => {
                log::info!("{} restarted", self.unit);
                self.state = ReloadState::Completed;
                Ok(())
            }
            Err(err) => Err(self.finish(err)),
        }
    }

    fn finish(&mut self, err: Error) -> Error {
        self.state = match &err {
            Error::Cancelled => ReloadState::Cancelled,
            Error::TimedOut(_) => ReloadState::TimedOut,
            err => ReloadState::Failed(err.to_string()),
        };
        log::warn!("restart of {} did not complete: {err}", self.unit);
        err
    }
}

fn expire(timeout: Option<Duration>) -> impl Future<Output = Error> {
    async move {
        match timeout {
            Some(timeout) => {
                tokio::time::sleep(timeout).await;
                Error::TimedOut(timeout)
            }
            None => pending().await,
        }
    }
}
