//! [`UnitManager`] talking to systemd over the system D-Bus.
//!
//! The blocking `dbus` connection lives on a dedicated thread, which queues
//! the restart job and then pumps the connection until systemd emits
//! `JobRemoved` for that job. The job result (`done`, `failed`, `canceled`,
//! `timeout`, `dependency` or `skipped`) is forwarded on the completion
//! channel. The thread stops as soon as the receiving side is dropped.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use dbus::Path as ObjectPath;
use dbus::blocking::Connection;
use dbus::message::MatchRule;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::reload::{Completion, UnitManager};

const DESTINATION: &str = "org.freedesktop.systemd1";
const OBJECT_PATH: &str = "/org/freedesktop/systemd1";
const MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";

// a new restart supersedes any job already queued for the unit
const JOB_MODE: &str = "replace";

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(25);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

type JobRemoved = (u32, ObjectPath<'static>, String, String);

#[derive(Debug, Clone)]
pub struct Systemd {
    call_timeout: Duration,
}

impl Default for Systemd {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl Systemd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout of the individual D-Bus method calls, not of the job itself.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

impl UnitManager for Systemd {
    async fn restart_unit(&self, unit: &str) -> Result<Completion> {
        let unit = unit.to_owned();
        let call_timeout = self.call_timeout;
        let (queued_tx, queued_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        thread::Builder::new()
            .name("systemd-job".to_string())
            .spawn(move || match JobWatch::restart(&unit, call_timeout) {
                Ok(watch) => {
                    let _ = queued_tx.send(Ok(()));
                    watch.wait(done_tx);
                }
                Err(err) => {
                    let _ = queued_tx.send(Err(err));
                }
            })
            .map_err(|err| Error::ServiceManager(format!("failed to spawn job watcher: {err}")))?;

        queued_rx
            .await
            .map_err(|_| Error::ServiceManager("job watcher exited".to_string()))??;
        Ok(done_rx)
    }
}

struct JobWatch {
    conn: Connection,
    job: ObjectPath<'static>,
    removed: mpsc::Receiver<(ObjectPath<'static>, String)>,
}

impl JobWatch {
    fn restart(unit: &str, call_timeout: Duration) -> Result<Self> {
        let conn = Connection::new_system().map_err(dbus_err)?;
        let proxy = conn.with_proxy(DESTINATION, OBJECT_PATH, call_timeout);

        // systemd only emits job signals to subscribed clients
        let () = proxy
            .method_call(MANAGER_INTERFACE, "Subscribe", ())
            .map_err(dbus_err)?;

        // The match is installed before the job is queued, so a job that
        // finishes immediately is not missed.
        let (tx, removed) = mpsc::channel();
        let rule = MatchRule::new_signal(MANAGER_INTERFACE, "JobRemoved");
        conn.add_match(rule, move |(_, job, _, result): JobRemoved, _, _| {
            let _ = tx.send((job, result));
            true
        })
        .map_err(dbus_err)?;

        let (job,): (ObjectPath<'static>,) = proxy
            .method_call(MANAGER_INTERFACE, "RestartUnit", (unit, JOB_MODE))
            .map_err(dbus_err)?;
        log::debug!("queued job {job} to restart {unit}");

        Ok(Self { conn, job, removed })
    }

    fn wait(self, done: oneshot::Sender<String>) {
        loop {
            if done.is_closed() {
                log::debug!("stopped watching job {}", self.job);
                return;
            }
            if let Err(err) = self.conn.process(POLL_INTERVAL) {
                log::warn!("lost connection to systemd: {err}");
                return;
            }
            while let Ok((job, result)) = self.removed.try_recv() {
                if job == self.job {
                    log::debug!("job {job} finished: {result}");
                    let _ = done.send(result);
                    return;
                }
            }
        }
    }
}

fn dbus_err(err: dbus::Error) -> Error {
    Error::ServiceManager(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_timeout() {
        assert_eq!(Systemd::new().call_timeout, DEFAULT_CALL_TIMEOUT);
        let systemd = Systemd::new().with_call_timeout(Duration::from_secs(5));
        assert_eq!(systemd.call_timeout, Duration::from_secs(5));
    }
}
