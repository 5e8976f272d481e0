//! MQTT Packet Codec
//!
//! Wire format for the MQTT 3.1.1 packets in [`crate::protocol`]. The
//! helpers below cover the two primitive encodings every packet is built
//! from: the variable length "remaining length" integer and the
//! two-byte length prefixed string.

mod decode;
mod encode;


pub use decode::Decoder;
pub use encode::Encoder;

use bytes::{BufMut, BytesMut};

use crate::protocol::{DecodeError, EncodeError};

/// Largest value the remaining length field can carry
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Default cap on inbound packets; brokers only send acks and small publishes
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Remaining length uses at most this many bytes
const MAX_VARINT_BYTES: usize = 4;

/// Decode a remaining length field, returning the value and its size
pub fn read_variable_int(buf: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut value: u32 = 0;
    for (i, &byte) in buf.iter().take(MAX_VARINT_BYTES).enumerate() {
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if buf.len() >= MAX_VARINT_BYTES {
        Err(DecodeError::InvalidRemainingLength)
    } else {
        Err(DecodeError::InsufficientData)
    }
}

/// Encode a remaining length field, returning the number of bytes written
pub fn write_variable_int(buf: &mut BytesMut, value: u32) -> Result<usize, EncodeError> {
    if value as usize > MAX_REMAINING_LENGTH {
        return Err(EncodeError::PacketTooLarge);
    }

    let mut rest = value;
    let mut written = 0;
    loop {
        let digit = (rest & 0x7F) as u8;
        rest >>= 7;
        written += 1;
        if rest == 0 {
            buf.put_u8(digit);
            return Ok(written);
        }
        buf.put_u8(digit | 0x80);
    }
}

pub fn read_u16(buf: &[u8]) -> Result<u16, DecodeError> {
    match buf {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(DecodeError::InsufficientData),
    }
}

/// Split a length prefixed field off the front of `buf`
///
/// Returns the field contents and the total bytes consumed.
pub fn read_binary(buf: &[u8]) -> Result<(&[u8], usize), DecodeError> {
    let end = 2 + read_u16(buf)? as usize;
    buf.get(2..end)
        .map(|data| (data, end))
        .ok_or(DecodeError::InsufficientData)
}

/// Length prefixed UTF-8 string without NUL characters
pub fn read_string(buf: &[u8]) -> Result<(&str, usize), DecodeError> {
    let (data, consumed) = read_binary(buf)?;
    let s = std::str::from_utf8(data).map_err(|_| DecodeError::InvalidUtf8)?;
    if s.contains('\0') {
        return Err(DecodeError::MalformedPacket("string contains NUL"));
    }
    Ok((s, consumed))
}

pub fn write_binary(buf: &mut BytesMut, data: &[u8]) -> Result<(), EncodeError> {
    let len = u16::try_from(data.len()).map_err(|_| EncodeError::StringTooLong)?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

pub fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    write_binary(buf, s.as_bytes())
}
