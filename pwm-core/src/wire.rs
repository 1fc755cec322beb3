//! Framing: one plaintext UTF-8 message per datagram, no length prefix.

use crate::error::ControlError;
use crate::protocol::{
    validate_label, DutyCycle, PinChannel, PinTable, Reply, Request, ACK, CHANNEL_SEPARATOR,
    FIELD_SEPARATOR, NUM_CHANNELS, PING, REQUEST_CONFIG,
};

/// Encode a request into the bytes of a single datagram.
pub fn encode_request(req: &Request) -> Result<Vec<u8>, ControlError> {
    let text = match req {
        Request::Ping => PING.to_string(),
        Request::RequestConfig => REQUEST_CONFIG.to_string(),
        Request::SetDutyCycle { label, duty } => {
            validate_label(label)?;
            format!("{}{}{}", label, FIELD_SEPARATOR, duty)
        }
    };
    Ok(text.into_bytes())
}

/// Encode a config report as the device sends it: `l0_d0|l1_d1|l2_d2|l3_d3`.
pub fn encode_config_report(table: &PinTable) -> Vec<u8> {
    let sep = CHANNEL_SEPARATOR.to_string();
    table
        .iter()
        .map(|c| format!("{}{}{}", c.label, FIELD_SEPARATOR, c.duty_cycle))
        .collect::<Vec<_>>()
        .join(&sep)
        .into_bytes()
}

/// Decode a request as the device would see it. Used by loopback test devices.
pub fn decode_request(bytes: &[u8]) -> Result<Request, ControlError> {
    let text = as_text(bytes)?;
    match text {
        PING => Ok(Request::Ping),
        REQUEST_CONFIG => Ok(Request::RequestConfig),
        _ => {
            let channel = decode_pin_config(text)?;
            Ok(Request::SetDutyCycle {
                label: channel.label,
                duty: channel.duty_cycle,
            })
        }
    }
}

/// Accepts only the exact probe acknowledgment literal.
pub fn decode_ack(bytes: &[u8]) -> Result<(), ControlError> {
    let text = as_text(bytes)?;
    if text == ACK {
        Ok(())
    } else {
        Err(ControlError::malformed(format!(
            "expected {:?}, got {:?}",
            ACK, text
        )))
    }
}

/// Decode a config report into exactly four channels. Any defect discards the whole reply.
pub fn decode_config_report(bytes: &[u8]) -> Result<PinTable, ControlError> {
    let text = as_text(bytes)?;
    let segments: Vec<&str> = text.split(CHANNEL_SEPARATOR).collect();
    if segments.len() != NUM_CHANNELS {
        return Err(ControlError::malformed(format!(
            "expected {} channels, got {}",
            NUM_CHANNELS,
            segments.len()
        )));
    }
    let mut channels = Vec::with_capacity(NUM_CHANNELS);
    for seg in segments {
        channels.push(decode_pin_config(seg)?);
    }
    let channels: [PinChannel; NUM_CHANNELS] = channels
        .try_into()
        .map_err(|_| ControlError::malformed("channel count"))?;
    Ok(PinTable(channels))
}

/// Any reply counts as success unless `expected` is given, in which case the text must match.
pub fn decode_update_ack(bytes: &[u8], expected: Option<&str>) -> Result<String, ControlError> {
    let text = as_text(bytes)?;
    match expected {
        Some(want) if text != want => Err(ControlError::malformed(format!(
            "expected update ack {:?}, got {:?}",
            want, text
        ))),
        _ => Ok(text.to_string()),
    }
}

/// Decode the reply to `req`. `update_ack` is the optional expected update confirmation text.
pub fn decode_reply(
    req: &Request,
    bytes: &[u8],
    update_ack: Option<&str>,
) -> Result<Reply, ControlError> {
    match req {
        Request::Ping => decode_ack(bytes).map(|_| Reply::Ack),
        Request::RequestConfig => decode_config_report(bytes).map(Reply::ConfigReport),
        Request::SetDutyCycle { .. } => decode_update_ack(bytes, update_ack).map(Reply::UpdateAck),
    }
}

/// `<label>_<duty>`, split on the first `_`.
fn decode_pin_config(seg: &str) -> Result<PinChannel, ControlError> {
    let (label, duty) = seg
        .split_once(FIELD_SEPARATOR)
        .ok_or_else(|| ControlError::malformed(format!("segment {:?} lacks '_'", seg)))?;
    if label.is_empty() {
        return Err(ControlError::malformed(format!("segment {:?} has no label", seg)));
    }
    let value: i64 = duty
        .parse()
        .map_err(|_| ControlError::malformed(format!("duty cycle {:?} is not an integer", duty)))?;
    let duty = DutyCycle::new(value)
        .map_err(|_| ControlError::malformed(format!("duty cycle {} out of range", value)))?;
    Ok(PinChannel::new(label, duty))
}

fn as_text(bytes: &[u8]) -> Result<&str, ControlError> {
    std::str::from_utf8(bytes).map_err(|_| ControlError::malformed("reply is not UTF-8"))
}
