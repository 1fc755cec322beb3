//! PWM controller session protocol.
//! Host-driven: no I/O; the host owns the socket and passes bytes through the codec.

pub mod error;
pub mod pins;
pub mod protocol;
pub mod wire;

pub use error::ControlError;
pub use pins::PinStore;
pub use protocol::{
    ConnectivityState, DutyCycle, PinChannel, PinTable, Reply, Request, MAX_DATAGRAM,
    MAX_DUTY_CYCLE, NUM_CHANNELS,
};
pub use wire::{
    decode_ack, decode_config_report, decode_reply, decode_request, decode_update_ack,
    encode_config_report, encode_request,
};
