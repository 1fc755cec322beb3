//! Error taxonomy shared by the codec, the pin table and the host session.

/// Every failure the controller core can report. None of them is fatal to the host process.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Duty cycle outside 0..=100 or not an integer. Raised before any network I/O.
    #[error("invalid duty cycle {0:?}: expected an integer in 0..=100")]
    InvalidDutyCycle(String),
    /// Pin label that cannot be framed (empty, or contains `_` / `|`).
    #[error("invalid pin label {0:?}")]
    InvalidLabel(String),
    /// Label not present in the current pin table.
    #[error("unknown pin {0:?}")]
    UnknownPin(String),
    /// No datagram arrived within the exchange timeout.
    #[error("no response from device")]
    NoResponse,
    /// A reply arrived but did not match the expected frame shape.
    #[error("malformed reply: {0}")]
    MalformedReply(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    /// Transport-level conditions the caller should treat as "try later".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ControlError::NoResponse | ControlError::MalformedReply(_))
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        ControlError::MalformedReply(reason.into())
    }
}
