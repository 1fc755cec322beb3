//! Controller wire protocol: message types, literals and the four-channel pin model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Liveness probe request.
pub const PING: &str = "!PING";
/// Device reply to a liveness probe.
pub const ACK: &str = "acknowledged";
/// Request for the current four-channel state.
pub const REQUEST_CONFIG: &str = "!REQUEST_CONFIG";
/// Separates pin-configs in a config report.
pub const CHANNEL_SEPARATOR: char = '|';
/// Separates label and duty cycle in a pin-config or update.
pub const FIELD_SEPARATOR: char = '_';

/// Fixed number of controllable output slots.
pub const NUM_CHANNELS: usize = 4;
/// Upper bound of a duty cycle, in percent.
pub const MAX_DUTY_CYCLE: u8 = 100;
/// Receive buffer size; device replies are a few dozen bytes.
pub const MAX_DATAGRAM: usize = 1024;

/// Percentage of a PWM period held active. Always within 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct DutyCycle(u8);

impl DutyCycle {
    pub const ZERO: DutyCycle = DutyCycle(0);

    /// Rejects out-of-range values; never clamps.
    pub fn new(value: i64) -> Result<Self, ControlError> {
        if (0..=i64::from(MAX_DUTY_CYCLE)).contains(&value) {
            Ok(DutyCycle(value as u8))
        } else {
            Err(ControlError::InvalidDutyCycle(value.to_string()))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl FromStr for DutyCycle {
    type Err = ControlError;

    /// Integer text only: `"50.5"`, `"abc"` and `"+"` are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| ControlError::InvalidDutyCycle(s.to_string()))?;
        DutyCycle::new(value)
    }
}

impl TryFrom<i64> for DutyCycle {
    type Error = ControlError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        DutyCycle::new(value)
    }
}

impl From<DutyCycle> for u8 {
    fn from(d: DutyCycle) -> u8 {
        d.0
    }
}

impl fmt::Display for DutyCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check that a label can be framed: non-empty, no field or channel separator.
pub fn validate_label(label: &str) -> Result<(), ControlError> {
    if label.is_empty() || label.contains(FIELD_SEPARATOR) || label.contains(CHANNEL_SEPARATOR) {
        return Err(ControlError::InvalidLabel(label.to_string()));
    }
    Ok(())
}

/// One output slot: the device's onboard pin label and its duty cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinChannel {
    pub label: String,
    pub duty_cycle: DutyCycle,
}

impl PinChannel {
    pub fn new(label: impl Into<String>, duty_cycle: DutyCycle) -> Self {
        Self {
            label: label.into(),
            duty_cycle,
        }
    }

    /// Value held before the device has reported: label is the slot index, duty 0.
    pub fn placeholder(index: usize) -> Self {
        Self::new(index.to_string(), DutyCycle::ZERO)
    }
}

/// Exactly four channels, in slot order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinTable(pub [PinChannel; NUM_CHANNELS]);

impl PinTable {
    pub fn placeholder() -> Self {
        PinTable(std::array::from_fn(PinChannel::placeholder))
    }

    /// Panics if `index >= NUM_CHANNELS`.
    pub fn get(&self, index: usize) -> &PinChannel {
        &self.0[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PinChannel> {
        self.0.iter()
    }

    /// Copy of this table with `label` set to `duty`, or None if no slot carries that label.
    pub fn with_duty_cycle(&self, label: &str, duty: DutyCycle) -> Option<PinTable> {
        let mut next = self.clone();
        let slot = next.0.iter_mut().find(|c| c.label == label)?;
        slot.duty_cycle = duty;
        Some(next)
    }
}

impl Default for PinTable {
    fn default() -> Self {
        Self::placeholder()
    }
}

impl fmt::Display for PinTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "[{}] pin {} = {}%", i, c.label, c.duty_cycle)?;
        }
        Ok(())
    }
}

/// Requests the host sends to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    RequestConfig,
    SetDutyCycle { label: String, duty: DutyCycle },
}

/// Replies the device sends back, one per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    ConfigReport(PinTable),
    /// Update confirmation; content is device-defined.
    UpdateAck(String),
}

/// Coarse transport health. Only the liveness monitor publishes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectivityState {
    Connected,
    Disconnected,
}

impl ConnectivityState {
    pub fn is_connected(self) -> bool {
        self == ConnectivityState::Connected
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Connected => f.write_str("CONN"),
            ConnectivityState::Disconnected => f.write_str("NO CONN"),
        }
    }
}
