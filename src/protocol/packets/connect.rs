use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{PacketType, ProtocolLevel};
use crate::protocol::wire::{self, FixedHeader};
use crate::{AppError, AppResult};

/// Clean-session bit inside the connect flags byte.
const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;

/// CONNECT: protocol name and level, connect flags, keep-alive seconds and
/// the client identifier. The connect flags byte is carried as-is; only the
/// clean-session bit is ever inspected here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub level: ProtocolLevel,
    pub flags: u8,
    pub keep_alive: u16,
    pub client_id: String,
}

impl Connect {
    pub fn builder() -> ConnectBuilder {
        ConnectBuilder::default()
    }

    pub fn clean_session(&self) -> bool {
        self.flags & CONNECT_FLAG_CLEAN_SESSION != 0
    }

    pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
        let name = self.level.protocol_name();
        let remaining = 2 + name.len() as u32 + 1 + 1 + 2 + 2 + self.client_id.len() as u32;
        FixedHeader::put(buf, PacketType::Connect, 0, remaining)?;
        wire::put_utf8(buf, name)?;
        buf.put_u8(self.level as u8);
        buf.put_u8(self.flags);
        buf.put_u16(self.keep_alive);
        wire::put_utf8(buf, &self.client_id)
    }

    pub fn decode(header: &FixedHeader, body: &mut Bytes) -> AppResult<Connect> {
        let mut left = header.remaining;
        let name = wire::read_utf8(body, &mut left)?;

        if left < 1 {
            return Err(AppError::MalformedPacket(
                "connect is missing the protocol level".to_string(),
            ));
        }
        let level = ProtocolLevel::from_u8(body.get_u8())?;
        left -= 1;

        if name != level.protocol_name() {
            return Err(AppError::MalformedPacket(format!(
                "protocol name {:?} does not match level {}",
                name, level as u8
            )));
        }

        if left < 1 {
            return Err(AppError::MalformedPacket(
                "connect is missing the connect flags".to_string(),
            ));
        }
        let flags = body.get_u8();
        left -= 1;

        if left < 2 {
            return Err(AppError::MalformedPacket(
                "connect is missing the keep-alive".to_string(),
            ));
        }
        let keep_alive = body.get_u16();
        left -= 2;

        if level == ProtocolLevel::V5 {
            wire::skip_properties(body, &mut left)?;
        }

        let client_id = wire::read_utf8(body, &mut left)?;
        Ok(Connect {
            level,
            flags,
            keep_alive,
            client_id,
        })
    }
}

#[derive(Debug, Default)]
pub struct ConnectBuilder {
    level: ProtocolLevel,
    clean_session: bool,
    keep_alive: u16,
    client_id: String,
}

impl ConnectBuilder {
    pub fn level(mut self, level: ProtocolLevel) -> Self {
        self.level = level;
        self
    }

    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn build(self) -> Connect {
        Connect {
            level: self.level,
            flags: if self.clean_session {
                CONNECT_FLAG_CLEAN_SESSION
            } else {
                0
            },
            keep_alive: self.keep_alive,
            client_id: self.client_id,
        }
    }
}

/// CONNACK: the session-present flag and a reason code. Body is exactly two
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason: u8,
}

impl ConnAck {
    pub fn builder() -> ConnAckBuilder {
        ConnAckBuilder::default()
    }

    pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
        FixedHeader::put(buf, PacketType::ConnAck, 0, 2)?;
        buf.put_u8(u8::from(self.session_present));
        buf.put_u8(self.reason);
        Ok(())
    }

    pub fn decode(header: &FixedHeader, body: &mut Bytes) -> AppResult<ConnAck> {
        if header.remaining != 2 {
            return Err(AppError::MalformedPacket(format!(
                "connack body must be 2 bytes, got {}",
                header.remaining
            )));
        }
        let session_present = body.get_u8() != 0;
        let reason = body.get_u8();
        Ok(ConnAck {
            session_present,
            reason,
        })
    }
}

#[derive(Debug, Default)]
pub struct ConnAckBuilder {
    session_present: bool,
    reason: u8,
}

impl ConnAckBuilder {
    pub fn session_present(mut self, session_present: bool) -> Self {
        self.session_present = session_present;
        self
    }

    pub fn reason(mut self, reason: u8) -> Self {
        self.reason = reason;
        self
    }

    pub fn build(self) -> ConnAck {
        ConnAck {
            session_present: self.session_present,
            reason: self.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(buf: BytesMut) -> (FixedHeader, Bytes) {
        let (header, used) = FixedHeader::check(&buf).unwrap();
        let mut frame = buf.freeze();
        frame.advance(used);
        (header, frame)
    }

    #[test]
    fn connect_roundtrip() {
        let connect = Connect::builder()
            .level(ProtocolLevel::V311)
            .clean_session(true)
            .keep_alive(60)
            .client_id("TestClient")
            .build();
        let mut buf = BytesMut::new();
        connect.encode(&mut buf).unwrap();
        let (header, mut body) = body_of(buf);
        let decoded = Connect::decode(&header, &mut body).unwrap();
        assert_eq!(decoded, connect);
        assert!(decoded.clean_session());
    }

    #[test]
    fn connect_v31_uses_the_legacy_protocol_name() {
        let connect = Connect::builder()
            .level(ProtocolLevel::V31)
            .client_id("c")
            .build();
        let mut buf = BytesMut::new();
        connect.encode(&mut buf).unwrap();
        assert_eq!(&buf[4..10], b"MQIsdp");
        let (header, mut body) = body_of(buf);
        assert_eq!(Connect::decode(&header, &mut body).unwrap(), connect);
    }

    #[test]
    fn connect_rejects_a_mismatched_protocol_name() {
        let connect = Connect::builder()
            .level(ProtocolLevel::V311)
            .client_id("c")
            .build();
        let mut buf = BytesMut::new();
        connect.encode(&mut buf).unwrap();
        // rewrite the level byte so "MQTT" pairs with level 3
        let level_at = 2 + 2 + 4;
        buf[level_at] = 3;
        let (header, mut body) = body_of(buf);
        assert!(matches!(
            Connect::decode(&header, &mut body),
            Err(AppError::MalformedPacket(_))
        ));
    }

    #[test]
    fn connect_v5_skips_its_property_block() {
        // hand-built V5 connect: name, level 5, flags, keep-alive,
        // a 3-byte property block, then the client id
        let mut buf = BytesMut::new();
        let mut body = BytesMut::new();
        wire::put_utf8(&mut body, "MQTT").unwrap();
        body.put_u8(5);
        body.put_u8(0x02);
        body.put_u16(30);
        body.put_u8(3);
        body.put_slice(&[0x11, 0x00, 0x00]);
        wire::put_utf8(&mut body, "five").unwrap();
        FixedHeader::put(&mut buf, PacketType::Connect, 0, body.len() as u32).unwrap();
        buf.extend_from_slice(&body);

        let (header, mut frame) = body_of(buf);
        let decoded = Connect::decode(&header, &mut frame).unwrap();
        assert_eq!(decoded.level, ProtocolLevel::V5);
        assert_eq!(decoded.keep_alive, 30);
        assert_eq!(decoded.client_id, "five");
    }

    #[test]
    fn connack_is_exactly_two_bytes() {
        let ack = ConnAck::builder().session_present(false).reason(0).build();
        let mut buf = BytesMut::new();
        ack.encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x20, 0x02, 0x00, 0x00]);

        let (header, mut body) = body_of(buf);
        assert_eq!(ConnAck::decode(&header, &mut body).unwrap(), ack);
    }

    #[test]
    fn connack_rejects_the_wrong_body_size() {
        let header = FixedHeader {
            control: 0x20,
            remaining: 3,
        };
        let mut body = Bytes::from_static(&[0x00, 0x00, 0x00]);
        assert!(matches!(
            ConnAck::decode(&header, &mut body),
            Err(AppError::MalformedPacket(_))
        ));
    }
}
