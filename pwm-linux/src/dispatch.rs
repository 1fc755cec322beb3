//! Duty-cycle updates: the single write path into the device.

use std::sync::Arc;

use log::{info, warn};
use pwm_core::{ControlError, DutyCycle, Reply, Request};

use crate::transport::Session;

/// Validates and sends `<label>_<duty>` updates. Never touches the pin store; callers reflect
/// a confirmed value themselves.
pub struct Dispatcher {
    session: Arc<Session>,
    update_ack: Option<String>,
}

impl Dispatcher {
    /// `update_ack`: exact confirmation text to require, or None to accept any reply.
    pub fn new(session: Arc<Session>, update_ack: Option<String>) -> Self {
        Self {
            session,
            update_ack,
        }
    }

    /// Out-of-range values fail with `InvalidDutyCycle` before any I/O.
    pub async fn set_duty_cycle(&self, label: &str, value: i64) -> Result<String, ControlError> {
        let duty = DutyCycle::new(value)?;
        self.send(label, duty).await
    }

    /// Exactly one exchange; no retry.
    pub async fn send(&self, label: &str, duty: DutyCycle) -> Result<String, ControlError> {
        let req = Request::SetDutyCycle {
            label: label.to_string(),
            duty,
        };
        match self.session.request(&req, self.update_ack.as_deref()).await {
            Ok(Reply::UpdateAck(text)) => {
                info!("pin {} -> {}%", label, duty);
                Ok(text)
            }
            Ok(other) => Err(ControlError::malformed(format!(
                "unexpected reply {:?}",
                other
            ))),
            Err(e) => {
                warn!("update pin {} -> {}% failed: {}", label, duty, e);
                Err(e)
            }
        }
    }
}
