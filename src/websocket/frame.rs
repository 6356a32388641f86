//! WebSocket frame codec
//!
//! Outbound frames are always final (no fragmentation) and always masked with
//! a fresh random key. Inbound frames may be masked or not. Lengths use the
//! 7-bit / 16-bit / 64-bit tiers; the 64-bit form only ever carries the low
//! 32 bits, so payloads of 4 GiB or more are not representable.

use rand::RngCore;

use crate::errors::FrameError;

/// Largest payload allowed on a control frame
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Normal closure status code
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the peer sent a close frame with no status
pub const CLOSE_NO_STATUS: u16 = 1005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// One decoded frame with its payload already unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload: Vec<u8>,
}

/// XOR-cycle the 4-byte key over `data` in place (self-inverse)
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Encode a final, masked client frame using a random key
pub fn encode(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut key);
    encode_with_mask(opcode, payload, Some(key))
}

/// Encode a final frame, masked with `key` when given
///
/// `None` produces an unmasked (server-style) frame.
pub fn encode_with_mask(opcode: Opcode, payload: &[u8], key: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(len + 14);
    out.push(0x80 | opcode.as_u8());

    let mask_bit = if key.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        // Upper 32 bits stay zero
        out.push(mask_bit | 127);
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }

    match key {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// Decode one frame from the front of `buf`
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame, otherwise
/// the frame and the number of bytes it consumed. Any error is fatal for the
/// connection.
pub fn decode(buf: &[u8], max_payload: usize) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let b0 = buf[0];
    let b1 = buf[1];

    let reserved = b0 & 0x70;
    if reserved != 0 {
        return Err(FrameError::ReservedBits(reserved));
    }
    let fin = b0 & 0x80 != 0;
    let opcode = Opcode::from_u8(b0 & 0x0F)?;
    let masked = b1 & 0x80 != 0;

    let (len, mut offset) = match b1 & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let len = u64::from_be_bytes([
                buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
            ]);
            if len >> 32 != 0 {
                return Err(FrameError::PayloadTooLarge {
                    size: len,
                    limit: max_payload,
                });
            }
            (len, 10)
        }
        short => (short as u64, 2),
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControlFrame);
        }
        if len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::ControlFrameTooLarge(len as usize));
        }
    }
    if len > max_payload as u64 {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            limit: max_payload,
        });
    }
    let len = len as usize;

    let key = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < offset + len {
        return Ok(None);
    }

    let mut payload = buf[offset..offset + len].to_vec();
    if let Some(key) = key {
        apply_mask(&mut payload, key);
    }

    Ok(Some((
        Frame {
            fin,
            opcode,
            masked,
            payload,
        },
        offset + len,
    )))
}

/// Parse a close payload into (code, reason)
///
/// An empty payload means no status was sent.
pub fn parse_close_payload(payload: &[u8]) -> Result<(u16, String), FrameError> {
    match payload.len() {
        0 => Ok((CLOSE_NO_STATUS, String::new())),
        1 => Err(FrameError::InvalidClosePayload),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            let reason =
                String::from_utf8(payload[2..].to_vec()).map_err(|_| FrameError::InvalidUtf8)?;
            Ok((code, reason))
        }
    }
}

/// Build a close payload, truncating the reason to fit a control frame
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut out = code.to_be_bytes().to_vec();
    let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    out.extend_from_slice(&reason.as_bytes()[..end]);
    out
}
