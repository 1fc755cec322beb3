//! Controller: one device session, its liveness monitor and pin table, behind the UI-facing API.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use pwm_core::{ConnectivityState, ControlError, DutyCycle, PinChannel, PinStore, PinTable};
use tokio::sync::watch;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::liveness::{self, LivenessMonitor, MonitorHandle};
use crate::transport::Session;

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("device at {0} did not answer the startup probe")]
    StartupProbeFailed(SocketAddr),
}

pub struct Controller {
    session: Arc<Session>,
    pins: Arc<PinStore>,
    dispatcher: Dispatcher,
    state: watch::Receiver<ConnectivityState>,
    monitor: Option<MonitorHandle>,
}

impl Controller {
    /// Open the session, run the startup probe (unless offline) and start the liveness monitor.
    /// Must be called from within a tokio runtime.
    pub async fn start(config: &Config) -> Result<Self, StartError> {
        let session =
            Arc::new(Session::connect(&config.host, config.port, config.timeout()).await?);
        info!("transmitting to {}", session.peer());
        let pins = Arc::new(PinStore::new());

        let startup = if config.offline {
            info!("offline mode: skipping startup probe");
            Startup::default()
        } else {
            startup_probe(&session, &pins).await
        };
        if config.require_device && !config.offline && !startup.acked {
            return Err(StartError::StartupProbeFailed(session.peer()));
        }

        let (monitor, state) = LivenessMonitor::new(
            session.clone(),
            pins.clone(),
            startup.state,
            config.ping_interval(),
        );
        let dispatcher = Dispatcher::new(session.clone(), config.update_ack.clone());
        Ok(Self {
            session,
            pins,
            dispatcher,
            state,
            monitor: Some(monitor.spawn()),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.session.peer()
    }

    /// None if `index >= NUM_CHANNELS`.
    pub fn get(&self, index: usize) -> Option<PinChannel> {
        self.pins.get(index)
    }

    pub fn pins(&self) -> PinTable {
        self.pins.snapshot()
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.clone()
    }

    /// Send one update. The pin table is left alone; call `reflect` after success.
    pub async fn set_duty_cycle(&self, label: &str, value: i64) -> Result<String, ControlError> {
        self.dispatcher.set_duty_cycle(label, value).await
    }

    /// Record a confirmed update locally. The slot is changed against the table current at
    /// the time of the write, so a concurrent refresh is never overwritten.
    pub fn reflect(&self, label: &str, duty: DutyCycle) -> Result<(), ControlError> {
        if self.pins.update(|t| t.with_duty_cycle(label, duty)) {
            Ok(())
        } else {
            Err(ControlError::UnknownPin(label.to_string()))
        }
    }

    /// Re-read the device's pin table.
    pub async fn refresh(&self) -> Result<(), ControlError> {
        liveness::refresh_config(&self.session, &self.pins).await
    }

    /// Manual ping. Reports reachability without changing the published state.
    pub async fn probe_once(&self) -> bool {
        liveness::probe_once(&self.session).await
    }

    /// Stop the liveness monitor and wait for its task to exit.
    pub async fn shutdown(mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.shutdown().await;
        }
    }
}

/// Outcome of the startup probe. `acked` alone decides `require_device`; `state` is what the
/// monitor starts from.
#[derive(Debug, Clone, Copy)]
struct Startup {
    acked: bool,
    state: ConnectivityState,
}

impl Default for Startup {
    fn default() -> Self {
        Self {
            acked: false,
            state: ConnectivityState::Disconnected,
        }
    }
}

/// Startup probe and initial config request. A device that acks but cannot report its pins
/// starts DISCONNECTED so the monitor's reconnect path retries the refresh.
async fn startup_probe(session: &Session, pins: &PinStore) -> Startup {
    if !liveness::probe_once(session).await {
        warn!("no response from device; starting disconnected with placeholder pins");
        return Startup::default();
    }
    let state = match liveness::refresh_config(session, pins).await {
        Ok(()) => {
            info!("current device setup: {}", pins.snapshot());
            ConnectivityState::Connected
        }
        Err(e) => {
            warn!("config request failed: {}; using placeholder pins", e);
            ConnectivityState::Disconnected
        }
    };
    Startup { acked: true, state }
}
