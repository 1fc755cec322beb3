//! Liveness monitor: periodic `!PING` probe, CONNECTED/DISCONNECTED signal, config refresh on reconnect.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use pwm_core::{ConnectivityState, ControlError, PinStore, Reply, Request};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::transport::Session;

/// One probe exchange. Anything but the ack literal is an error.
pub async fn probe(session: &Session) -> Result<(), ControlError> {
    match session.request(&Request::Ping, None).await? {
        Reply::Ack => Ok(()),
        other => Err(ControlError::malformed(format!("unexpected reply {:?}", other))),
    }
}

/// Probe once and report reachability. Does not publish connectivity state.
pub async fn probe_once(session: &Session) -> bool {
    match probe(session).await {
        Ok(()) => {
            debug!("ping acknowledged by {}", session.peer());
            true
        }
        Err(e) => {
            log_probe_failure(session, &e);
            false
        }
    }
}

/// Request the device's pin table and swap it into `pins` in one step.
pub async fn refresh_config(session: &Session, pins: &PinStore) -> Result<(), ControlError> {
    match session.request(&Request::RequestConfig, None).await? {
        Reply::ConfigReport(table) => {
            debug!("config report: {}", table);
            pins.replace_all(table);
            Ok(())
        }
        other => Err(ControlError::malformed(format!("unexpected reply {:?}", other))),
    }
}

fn log_probe_failure(session: &Session, e: &ControlError) {
    match e {
        ControlError::NoResponse => warn!(
            "no response from {} within {:?}",
            session.peer(),
            session.timeout()
        ),
        ControlError::MalformedReply(reason) => {
            warn!("malformed ping reply from {}: {}", session.peer(), reason)
        }
        other => warn!("ping to {} failed: {}", session.peer(), other),
    }
}

/// Single writer of the connectivity state.
pub struct LivenessMonitor {
    session: Arc<Session>,
    pins: Arc<PinStore>,
    state_tx: watch::Sender<ConnectivityState>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(
        session: Arc<Session>,
        pins: Arc<PinStore>,
        initial: ConnectivityState,
        interval: Duration,
    ) -> (Self, watch::Receiver<ConnectivityState>) {
        let (state_tx, state_rx) = watch::channel(initial);
        (
            Self {
                session,
                pins,
                state_tx,
                interval,
            },
            state_rx,
        )
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    /// One probe cycle. Coming back from DISCONNECTED, the pin table is refreshed before
    /// CONNECTED is published; if that refresh fails the state stays DISCONNECTED.
    pub async fn tick(&self) -> ConnectivityState {
        let previous = self.state();
        let next = match probe(&self.session).await {
            Ok(()) if previous == ConnectivityState::Disconnected => {
                match refresh_config(&self.session, &self.pins).await {
                    Ok(()) => ConnectivityState::Connected,
                    Err(e) => {
                        warn!("ping acknowledged but config refresh failed: {}", e);
                        ConnectivityState::Disconnected
                    }
                }
            }
            Ok(()) => ConnectivityState::Connected,
            Err(e) => {
                log_probe_failure(&self.session, &e);
                ConnectivityState::Disconnected
            }
        };
        self.publish(next);
        next
    }

    fn publish(&self, next: ConnectivityState) {
        let peer = self.session.peer();
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            info!("connection status {} = {}", peer, next);
            *state = next;
            true
        });
    }

    /// Run on the current runtime until the handle is shut down or dropped.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(shutdown_rx));
        MonitorHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        // Ticks are scheduled on the wall clock; a slow probe skips ticks instead of bursting.
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("liveness monitor started, every {:?}", self.interval);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.tick() => {}
            }
        }
        debug!("liveness monitor stopped");
    }
}

/// Owner of the monitor task. Dropping it aborts the task.
pub struct MonitorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal the monitor and wait until its task has exited.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
