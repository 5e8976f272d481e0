//! MQTT Packet Encoder

use bytes::{BufMut, BytesMut};

use super::{write_binary, write_string, write_variable_int};
use crate::protocol::{ConnAck, Connect, EncodeError, Packet, Publish, QoS, SubAck, PROTOCOL_LEVEL};

/// MQTT v3.1.1 Packet Encoder
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a packet to the buffer
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match packet {
            Packet::Connect(p) => self.encode_connect(p, buf),
            Packet::ConnAck(p) => self.encode_connack(p, buf),
            Packet::Publish(p) => self.encode_publish(p, buf),
            Packet::PubAck(p) => {
                self.encode_ack(0x40, p.packet_id, buf);
                Ok(())
            }
            Packet::PubRec(p) => {
                self.encode_ack(0x50, p.packet_id, buf);
                Ok(())
            }
            Packet::PubRel(p) => {
                // PUBREL carries reserved flags 0010
                self.encode_ack(0x62, p.packet_id, buf);
                Ok(())
            }
            Packet::PubComp(p) => {
                self.encode_ack(0x70, p.packet_id, buf);
                Ok(())
            }
            Packet::SubAck(p) => self.encode_suback(p, buf),
            Packet::PingReq => {
                buf.put_u8(0xC0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::PingResp => {
                buf.put_u8(0xD0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::Disconnect => {
                buf.put_u8(0xE0);
                buf.put_u8(0x00);
                Ok(())
            }
        }
    }

    fn encode_connect(&self, packet: &Connect, buf: &mut BytesMut) -> Result<(), EncodeError> {
        // Protocol name, level, flags and keep alive
        let mut remaining_length = 6 + 1 + 1 + 2;

        remaining_length += 2 + packet.client_id.len();

        if let Some(ref username) = packet.username {
            remaining_length += 2 + username.len();
        }

        if let Some(ref password) = packet.password {
            remaining_length += 2 + password.len();
        }

        buf.put_u8(0x10);
        write_variable_int(buf, remaining_length as u32)?;

        write_string(buf, "MQTT")?;
        buf.put_u8(PROTOCOL_LEVEL);

        let mut connect_flags: u8 = 0;
        if packet.clean_session {
            connect_flags |= 0x02;
        }
        if packet.password.is_some() {
            connect_flags |= 0x40;
        }
        if packet.username.is_some() {
            connect_flags |= 0x80;
        }
        buf.put_u8(connect_flags);

        buf.put_u16(packet.keep_alive);

        write_string(buf, &packet.client_id)?;

        if let Some(ref username) = packet.username {
            write_string(buf, username)?;
        }

        if let Some(ref password) = packet.password {
            write_binary(buf, password)?;
        }

        Ok(())
    }

    fn encode_connack(&self, packet: &ConnAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(0x20);
        buf.put_u8(0x02);
        buf.put_u8(if packet.session_present { 0x01 } else { 0x00 });
        buf.put_u8(packet.return_code as u8);
        Ok(())
    }

    fn encode_publish(&self, packet: &Publish, buf: &mut BytesMut) -> Result<(), EncodeError> {
        if packet.topic.is_empty() || packet.topic.contains(['+', '#']) {
            return Err(EncodeError::InvalidTopicName);
        }

        let mut remaining_length = 2 + packet.topic.len();

        if packet.qos != QoS::AtMostOnce {
            if packet.packet_id.is_none() {
                return Err(EncodeError::MissingPacketId);
            }
            remaining_length += 2;
        }

        remaining_length += packet.payload.len();

        let mut first_byte: u8 = 0x30;
        if packet.dup {
            first_byte |= 0x08;
        }
        first_byte |= (packet.qos as u8) << 1;
        if packet.retain {
            first_byte |= 0x01;
        }
        buf.put_u8(first_byte);
        write_variable_int(buf, remaining_length as u32)?;

        write_string(buf, &packet.topic)?;

        // Packet identifier (only for QoS > 0)
        if packet.qos != QoS::AtMostOnce {
            if let Some(packet_id) = packet.packet_id {
                buf.put_u16(packet_id);
            }
        }

        buf.put_slice(&packet.payload);

        Ok(())
    }

    fn encode_ack(&self, first_byte: u8, packet_id: u16, buf: &mut BytesMut) {
        buf.put_u8(first_byte);
        buf.put_u8(0x02);
        buf.put_u16(packet_id);
    }

    fn encode_suback(&self, packet: &SubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(0x90);
        write_variable_int(buf, (2 + packet.return_codes.len()) as u32)?;
        buf.put_u16(packet.packet_id);
        buf.put_slice(&packet.return_codes);
        Ok(())
    }
}
