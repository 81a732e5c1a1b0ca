//! Native binary protocol framing (§4.4 family 1): `cmd(1) | len(2, BE) |
//! flags(1) | payload(len)` over a 115 200 baud serial link. Mirrors
//! `iface::hdlc::Hdlc`'s shape (a stateless `encode`/`decode` pair plus a
//! `find` helper for locating a complete frame in a byte stream) but for
//! length-prefixed rather than delimiter-stuffed framing.

use crate::error::RadioError;
use crate::radio::MAX_FRAME_PAYLOAD;

pub const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Sync = 0x01,
    Config = 0x02,
    Tx = 0x03,
    Rx = 0x04,
    Cad = 0x05,
    Status = 0x06,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ack = 0x10,
    Nack = 0x11,
    Rx = 0x12,
    Cad = 0x13,
    Status = 0x14,
}

impl Response {
    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x10 => Response::Ack,
            0x11 => Response::Nack,
            0x12 => Response::Rx,
            0x13 => Response::Cad,
            0x14 => Response::Status,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

pub fn encode_command(command: Command, flags: u8, payload: &[u8]) -> Result<Vec<u8>, RadioError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(RadioError::FrameTooLarge(payload.len()));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(command as u8);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.push(flags);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Attempts to parse one complete frame from the front of `bytes`.
/// Returns `(frame, consumed_len)` on success. Tolerates partial reads by
/// returning `Ok(None)` rather than an error when the header claims more
/// payload than is currently buffered.
pub fn try_parse_frame(bytes: &[u8]) -> Result<Option<(Frame, usize)>, RadioError> {
    if bytes.len() < HEADER_LEN {
        return Ok(None);
    }
    let cmd = bytes[0];
    let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(RadioError::Malformed(format!("oversize frame length {len}")));
    }
    let flags = bytes[3];
    let total = HEADER_LEN + len;
    if bytes.len() < total {
        return Ok(None);
    }
    Ok(Some((Frame { cmd, flags, payload: bytes[HEADER_LEN..total].to_vec() }, total)))
}

/// Decodes the RSSI/SNR pair carried at the start of an `RX` response
/// payload (§4.4): `rssi(2, BE, biased by 32768)`, `snr(2, BE, ×10)`.
pub fn decode_rx_measurement(payload: &[u8]) -> Result<(i16, f32), RadioError> {
    if payload.len() < 4 {
        return Err(RadioError::Malformed("RX payload shorter than measurement header".into()));
    }
    let rssi_raw = u16::from_be_bytes([payload[0], payload[1]]);
    let rssi_dbm = rssi_raw as i32 - 32768;
    let snr_raw = i16::from_be_bytes([payload[2], payload[3]]);
    Ok((rssi_dbm as i16, snr_raw as f32 / 10.0))
}

pub fn response_kind(cmd: u8) -> Option<Response> {
    Response::from_byte(cmd)
}
