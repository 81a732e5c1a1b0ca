//! KISS TNC framing (§4.4 family 2), used by FMP-capable firmware. Byte
//! stuffing mirrors `iface::hdlc::Hdlc`'s `encode`/`find`/`decode` triad,
//! with KISS's delimiter/escape bytes in place of HDLC's.

use crate::error::RadioError;

const FEND: u8 = 0xC0;
const FESC: u8 = 0xDB;
const TFEND: u8 = 0xDC;
const TFESC: u8 = 0xDD;

pub const KISS_DATA: u8 = 0x00;
pub const KISS_SET_HARDWARE: u8 = 0x06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareSubcommand {
    Frequency = 0x01,
    Bandwidth = 0x02,
    SpreadingFactor = 0x03,
    CodingRate = 0x04,
    TxPower = 0x05,
    Ready = 0x06,
    Rx = 0x07,
    Tx = 0x08,
    Rssi = 0x09,
    Snr = 0x0A,
}

/// `FEND | cmd_byte | escaped_payload | FEND`.
pub fn encode(cmd_byte: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(FEND);
    out.push(cmd_byte);
    for &byte in payload {
        match byte {
            FEND => out.extend_from_slice(&[FESC, TFEND]),
            FESC => out.extend_from_slice(&[FESC, TFESC]),
            _ => out.push(byte),
        }
    }
    out.push(FEND);
    out
}

/// Locates the `(start, end)` byte indices of the first complete frame's
/// delimiters in `data`, if any.
pub fn find(data: &[u8]) -> Option<(usize, usize)> {
    let mut start = None;
    for (i, &byte) in data.iter().enumerate() {
        if byte != FEND {
            continue;
        }
        match start {
            None => start = Some(i),
            Some(s) if i > s => return Some((s, i)),
            _ => {}
        }
    }
    None
}

/// Decodes one frame (without its outer `FEND`s) into `(cmd_byte,
/// payload)`. `data` must already be bounded by `find`'s `(start, end)`.
pub fn decode(data: &[u8]) -> Result<(u8, Vec<u8>), RadioError> {
    if data.len() < 2 || data[0] != FEND {
        return Err(RadioError::Malformed("KISS frame missing leading FEND".into()));
    }
    let cmd_byte = data[1];
    let mut payload = Vec::with_capacity(data.len() - 2);
    let mut escape = false;
    let mut closed = false;

    for &byte in &data[2..] {
        if escape {
            escape = false;
            match byte {
                TFEND => payload.push(FEND),
                TFESC => payload.push(FESC),
                _ => return Err(RadioError::Malformed("invalid KISS escape sequence".into())),
            }
            continue;
        }
        match byte {
            FEND => {
                closed = true;
                break;
            }
            FESC => escape = true,
            _ => payload.push(byte),
        }
    }

    if !closed {
        return Err(RadioError::Malformed("KISS frame missing trailing FEND".into()));
    }
    Ok((cmd_byte, payload))
}

/// RSSI arrives as a single signed byte (dBm); SNR as a signed byte
/// scaled by 4 (§4.4).
pub fn decode_rssi(byte: u8) -> i16 {
    byte as i8 as i16
}

pub fn decode_snr(byte: u8) -> f32 {
    (byte as i8 as f32) / 4.0
}
