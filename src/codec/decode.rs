//! MQTT Packet Decoder

use std::sync::Arc;

use bytes::Bytes;

use super::{
    read_binary, read_string, read_u16, read_variable_int, DEFAULT_MAX_PACKET_SIZE,
    MAX_REMAINING_LENGTH,
};
use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, DecodeError, Packet, PubAck, PubComp, PubRec, PubRel,
    Publish, QoS, SubAck,
};

/// MQTT v3.1.1 Packet Decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Maximum packet size
    max_packet_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_REMAINING_LENGTH);
        self
    }

    /// Decode a packet from the buffer
    ///
    /// Returns `Ok(None)` until a complete packet is buffered, otherwise
    /// the packet and the number of bytes it occupied.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let total_len = 1 + len_bytes + remaining_length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let payload = &buf[1 + len_bytes..total_len];

        let packet = match packet_type {
            1 => self.decode_connect(flags, payload)?,
            2 => self.decode_connack(flags, payload)?,
            3 => self.decode_publish(flags, payload)?,
            4 => Packet::PubAck(PubAck::new(self.decode_ack(flags, 0x00, payload)?)),
            5 => Packet::PubRec(PubRec::new(self.decode_ack(flags, 0x00, payload)?)),
            6 => Packet::PubRel(PubRel::new(self.decode_ack(flags, 0x02, payload)?)),
            7 => Packet::PubComp(PubComp::new(self.decode_ack(flags, 0x00, payload)?)),
            9 => self.decode_suback(flags, payload)?,
            12 => {
                self.expect_empty(flags, payload)?;
                Packet::PingReq
            }
            13 => {
                self.expect_empty(flags, payload)?;
                Packet::PingResp
            }
            14 => {
                self.expect_empty(flags, payload)?;
                Packet::Disconnect
            }
            _ => return Err(DecodeError::InvalidPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }

    fn decode_connect(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let mut pos = 0;

        let (protocol_name, len) = read_string(payload)?;
        pos += len;

        if protocol_name != "MQTT" && protocol_name != "MQIsdp" {
            return Err(DecodeError::InvalidProtocolName);
        }

        if payload.len() < pos + 4 {
            return Err(DecodeError::InsufficientData);
        }
        let level = payload[pos];
        if level != 3 && level != 4 {
            return Err(DecodeError::InvalidProtocolVersion(level));
        }
        let connect_flags = payload[pos + 1];
        let keep_alive = u16::from_be_bytes([payload[pos + 2], payload[pos + 3]]);
        pos += 4;

        // Reserved bit must be 0
        if (connect_flags & 0x01) != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let clean_session = (connect_flags & 0x02) != 0;
        let will_flag = (connect_flags & 0x04) != 0;
        let password_flag = (connect_flags & 0x40) != 0;
        let username_flag = (connect_flags & 0x80) != 0;

        let (client_id, len) = read_string(&payload[pos..])?;
        pos += len;

        // Will fields are parsed past but not retained
        if will_flag {
            let (_, len) = read_string(&payload[pos..])?;
            pos += len;
            let (_, len) = read_binary(&payload[pos..])?;
            pos += len;
        }

        let username = if username_flag {
            let (s, len) = read_string(&payload[pos..])?;
            pos += len;
            Some(s.to_string())
        } else {
            None
        };

        let password = if password_flag {
            let (data, _) = read_binary(&payload[pos..])?;
            Some(Bytes::copy_from_slice(data))
        } else {
            None
        };

        Ok(Packet::Connect(Box::new(Connect {
            client_id: client_id.to_string(),
            clean_session,
            keep_alive,
            username,
            password,
        })))
    }

    fn decode_connack(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        if payload.len() < 2 {
            return Err(DecodeError::InsufficientData);
        }

        let acknowledge_flags = payload[0];
        // Only bit 0 is valid (session present), rest must be 0
        if (acknowledge_flags & 0xFE) != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let return_code = ConnectReturnCode::from_u8(payload[1])
            .ok_or(DecodeError::InvalidReturnCode(payload[1]))?;

        Ok(Packet::ConnAck(ConnAck {
            session_present: (acknowledge_flags & 0x01) != 0,
            return_code,
        }))
    }

    fn decode_publish(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        let dup = (flags & 0x08) != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let retain = (flags & 0x01) != 0;

        let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;

        if qos == QoS::AtMostOnce && dup {
            return Err(DecodeError::MalformedPacket("DUP must be 0 for QoS 0"));
        }

        let (topic, mut pos) = read_string(payload)?;

        if topic.contains('+') || topic.contains('#') {
            return Err(DecodeError::MalformedPacket("topic contains wildcard"));
        }

        let packet_id = if qos != QoS::AtMostOnce {
            let id = read_u16(&payload[pos..])?;
            if id == 0 {
                return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
            }
            pos += 2;
            Some(id)
        } else {
            None
        };

        Ok(Packet::Publish(Publish {
            dup,
            qos,
            retain,
            topic: Arc::from(topic),
            packet_id,
            payload: Bytes::copy_from_slice(&payload[pos..]),
        }))
    }

    fn decode_ack(&self, flags: u8, expected: u8, payload: &[u8]) -> Result<u16, DecodeError> {
        if flags != expected {
            return Err(DecodeError::InvalidFlags);
        }
        if payload.len() != 2 {
            return Err(DecodeError::MalformedPacket("acknowledgement must be 2 bytes"));
        }
        read_u16(payload)
    }

    fn decode_suback(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let packet_id = read_u16(payload)?;
        if payload.len() < 3 {
            return Err(DecodeError::MalformedPacket("SUBACK without return codes"));
        }

        Ok(Packet::SubAck(SubAck {
            packet_id,
            return_codes: payload[2..].to_vec(),
        }))
    }

    fn expect_empty(&self, flags: u8, payload: &[u8]) -> Result<(), DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        if !payload.is_empty() {
            return Err(DecodeError::MalformedPacket("unexpected payload"));
        }
        Ok(())
    }
}
