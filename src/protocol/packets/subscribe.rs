use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{PacketType, ProtocolLevel};
use crate::protocol::wire::{self, FixedHeader};
use crate::{AppError, AppResult};

/// SUBSCRIBE return code for a rejected topic filter.
pub const RETURN_CODE_FAILURE: u8 = 0x80;

/// One requested subscription: a topic filter and the requested QoS. The
/// core interprets no wildcard semantics; the filter is an opaque string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub filter: String,
    pub qos: u8,
}

/// SUBSCRIBE: a packet id and one or more (filter, QoS) pairs. The flag
/// nibble is fixed at 0x2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub topics: Vec<TopicFilter>,
}

impl Subscribe {
    pub fn builder() -> SubscribeBuilder {
        SubscribeBuilder::default()
    }

    pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
        let mut remaining = 2u32;
        for topic in &self.topics {
            remaining += 2 + topic.filter.len() as u32 + 1;
        }
        FixedHeader::put(buf, PacketType::Subscribe, 2, remaining)?;
        buf.put_u16(self.packet_id);
        for topic in &self.topics {
            wire::put_utf8(buf, &topic.filter)?;
            buf.put_u8(topic.qos & 0x03);
        }
        Ok(())
    }

    pub fn decode(
        header: &FixedHeader,
        body: &mut Bytes,
        level: ProtocolLevel,
    ) -> AppResult<Subscribe> {
        if header.flags() != 2 {
            return Err(AppError::MalformedPacket(format!(
                "subscribe flag nibble must be 0x2, got {:#x}",
                header.flags()
            )));
        }
        if header.remaining < 2 {
            return Err(AppError::MalformedPacket(
                "subscribe body must be at least 2 bytes".to_string(),
            ));
        }
        let mut left = header.remaining;
        let packet_id = body.get_u16();
        left -= 2;

        if level == ProtocolLevel::V5 {
            wire::skip_properties(body, &mut left)?;
        }

        let mut topics = Vec::new();
        while left > 0 {
            let filter = wire::read_utf8(body, &mut left)?;
            if left < 1 {
                return Err(AppError::MalformedPacket(
                    "subscription entry is missing its qos".to_string(),
                ));
            }
            let qos = body.get_u8() & 0x03;
            left -= 1;
            topics.push(TopicFilter { filter, qos });
        }
        Ok(Subscribe { packet_id, topics })
    }
}

#[derive(Debug, Default)]
pub struct SubscribeBuilder {
    packet_id: u16,
    topics: Vec<TopicFilter>,
}

impl SubscribeBuilder {
    pub fn packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = packet_id;
        self
    }

    pub fn topic(mut self, filter: impl Into<String>, qos: u8) -> Self {
        self.topics.push(TopicFilter {
            filter: filter.into(),
            qos: qos & 0x03,
        });
        self
    }

    pub fn build(self) -> Subscribe {
        Subscribe {
            packet_id: self.packet_id,
            topics: self.topics,
        }
    }
}

/// SUBACK: a packet id and one return code per requested filter, 0..2 for
/// the granted QoS or 0x80 for failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub codes: Vec<u8>,
}

impl SubAck {
    pub fn builder() -> SubAckBuilder {
        SubAckBuilder::default()
    }

    pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
        FixedHeader::put(
            buf,
            PacketType::SubAck,
            0,
            2 + self.codes.len() as u32,
        )?;
        buf.put_u16(self.packet_id);
        for code in &self.codes {
            buf.put_u8(*code);
        }
        Ok(())
    }

    pub fn decode(header: &FixedHeader, body: &mut Bytes) -> AppResult<SubAck> {
        if header.flags() != 0 {
            return Err(AppError::MalformedPacket(format!(
                "suback flag nibble must be 0, got {:#x}",
                header.flags()
            )));
        }
        if header.remaining < 2 {
            return Err(AppError::MalformedPacket(
                "suback body must be at least 2 bytes".to_string(),
            ));
        }
        let mut left = header.remaining;
        let packet_id = body.get_u16();
        left -= 2;
        let mut codes = Vec::with_capacity(left as usize);
        while left > 0 {
            codes.push(body.get_u8());
            left -= 1;
        }
        Ok(SubAck { packet_id, codes })
    }
}

#[derive(Debug, Default)]
pub struct SubAckBuilder {
    packet_id: u16,
    codes: Vec<u8>,
}

impl SubAckBuilder {
    pub fn packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = packet_id;
        self
    }

    pub fn code(mut self, code: u8) -> Self {
        self.codes.push(code);
        self
    }

    /// Grants each filter of `subscribe` at its requested QoS, clamped to
    /// the highest level this broker speaks.
    pub fn codes_from(mut self, subscribe: &Subscribe) -> Self {
        self.codes
            .extend(subscribe.topics.iter().map(|topic| topic.qos.min(2)));
        self
    }

    pub fn build(self) -> SubAck {
        SubAck {
            packet_id: self.packet_id,
            codes: self.codes,
        }
    }
}

/// UNSUBSCRIBE: a packet id and one or more topic filters. The flag nibble
/// is fixed at 0x2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

impl Unsubscribe {
    pub fn builder() -> UnsubscribeBuilder {
        UnsubscribeBuilder::default()
    }

    pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
        let mut remaining = 2u32;
        for topic in &self.topics {
            remaining += 2 + topic.len() as u32;
        }
        FixedHeader::put(buf, PacketType::Unsubscribe, 2, remaining)?;
        buf.put_u16(self.packet_id);
        for topic in &self.topics {
            wire::put_utf8(buf, topic)?;
        }
        Ok(())
    }

    pub fn decode(header: &FixedHeader, body: &mut Bytes) -> AppResult<Unsubscribe> {
        if header.flags() != 2 {
            return Err(AppError::MalformedPacket(format!(
                "unsubscribe flag nibble must be 0x2, got {:#x}",
                header.flags()
            )));
        }
        if header.remaining < 2 {
            return Err(AppError::MalformedPacket(
                "unsubscribe body must be at least 2 bytes".to_string(),
            ));
        }
        let mut left = header.remaining;
        let packet_id = body.get_u16();
        left -= 2;
        let mut topics = Vec::new();
        while left > 0 {
            topics.push(wire::read_utf8(body, &mut left)?);
        }
        Ok(Unsubscribe { packet_id, topics })
    }
}

#[derive(Debug, Default)]
pub struct UnsubscribeBuilder {
    packet_id: u16,
    topics: Vec<String>,
}

impl UnsubscribeBuilder {
    pub fn packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = packet_id;
        self
    }

    pub fn topic(mut self, filter: impl Into<String>) -> Self {
        self.topics.push(filter.into());
        self
    }

    pub fn build(self) -> Unsubscribe {
        Unsubscribe {
            packet_id: self.packet_id,
            topics: self.topics,
        }
    }
}

/// UNSUBACK: the packet id of the UNSUBSCRIBE it answers. Body is exactly
/// two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAck {
    pub packet_id: u16,
}

impl UnsubAck {
    pub fn new(packet_id: u16) -> UnsubAck {
        UnsubAck { packet_id }
    }

    pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
        FixedHeader::put(buf, PacketType::UnsubAck, 0, 2)?;
        buf.put_u16(self.packet_id);
        Ok(())
    }

    pub fn decode(header: &FixedHeader, body: &mut Bytes) -> AppResult<UnsubAck> {
        if header.flags() != 0 {
            return Err(AppError::MalformedPacket(format!(
                "unsuback flag nibble must be 0, got {:#x}",
                header.flags()
            )));
        }
        if header.remaining != 2 {
            return Err(AppError::MalformedPacket(format!(
                "unsuback body must be 2 bytes, got {}",
                header.remaining
            )));
        }
        Ok(UnsubAck {
            packet_id: body.get_u16(),
        })
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
    fn subscribe_roundtrip() {
        let subscribe = Subscribe::builder()
            .packet_id(21)
            .topic("test/foo", 0)
            .topic("test/bar", 1)
            .build();
        let mut buf = BytesMut::new();
        subscribe.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x82);
        let (header, mut body) = body_of(buf);
        let decoded = Subscribe::decode(&header, &mut body, ProtocolLevel::V311).unwrap();
        assert_eq!(decoded, subscribe);
    }

    #[test]
    fn subscribe_rejects_the_wrong_flag_nibble() {
        let header = FixedHeader {
            control: 0x80,
            remaining: 2,
        };
        let mut body = Bytes::from_static(&[0x00, 0x15]);
        assert!(matches!(
            Subscribe::decode(&header, &mut body, ProtocolLevel::V311),
            Err(AppError::MalformedPacket(_))
        ));
    }

    #[test]
    fn subscribe_v5_skips_its_property_block() {
        let mut body = BytesMut::new();
        body.put_u16(77);
        body.put_u8(0);
        wire::put_utf8(&mut body, "a/b").unwrap();
        body.put_u8(1);
        let mut buf = BytesMut::new();
        FixedHeader::put(&mut buf, PacketType::Subscribe, 2, body.len() as u32).unwrap();
        buf.extend_from_slice(&body);

        let (header, mut frame) = body_of(buf);
        let decoded = Subscribe::decode(&header, &mut frame, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded.packet_id, 77);
        assert_eq!(decoded.topics.len(), 1);
        assert_eq!(decoded.topics[0].filter, "a/b");
        assert_eq!(decoded.topics[0].qos, 1);
    }

    #[test]
    fn suback_codes_follow_the_requested_qos() {
        let subscribe = Subscribe::builder()
            .packet_id(21)
            .topic("test/foo", 0)
            .topic("test/bar", 1)
            .build();
        let suback = SubAck::builder()
            .packet_id(subscribe.packet_id)
            .codes_from(&subscribe)
            .build();
        let mut buf = BytesMut::new();
        suback.encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x90, 0x04, 0x00, 0x15, 0x00, 0x01]);
        let (header, mut body) = body_of(buf);
        assert_eq!(SubAck::decode(&header, &mut body).unwrap(), suback);
    }

    #[test]
    fn suback_failure_code_survives_a_roundtrip() {
        let suback = SubAck::builder()
            .packet_id(3)
            .code(RETURN_CODE_FAILURE)
            .build();
        let mut buf = BytesMut::new();
        suback.encode(&mut buf).unwrap();
        let (header, mut body) = body_of(buf);
        assert_eq!(
            SubAck::decode(&header, &mut body).unwrap().codes,
            vec![RETURN_CODE_FAILURE]
        );
    }

    #[test]
    fn unsubscribe_roundtrip() {
        let unsubscribe = Unsubscribe::builder()
            .packet_id(33)
            .topic("test/foo")
            .topic("test/bar")
            .build();
        let mut buf = BytesMut::new();
        unsubscribe.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0xA2);
        let (header, mut body) = body_of(buf);
        assert_eq!(
            Unsubscribe::decode(&header, &mut body).unwrap(),
            unsubscribe
        );
    }

    #[test]
    fn unsuback_roundtrip() {
        let mut buf = BytesMut::new();
        UnsubAck::new(33).encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0xB0, 0x02, 0x00, 0x21]);
        let (header, mut body) = body_of(buf);
        assert_eq!(
            UnsubAck::decode(&header, &mut body).unwrap(),
            UnsubAck::new(33)
        );
    }

    #[test]
    fn truncated_subscription_entry_is_malformed() {
        // filter present but its qos byte is missing from the body budget
        let mut body = BytesMut::new();
        body.put_u16(5);
        wire::put_utf8(&mut body, "t").unwrap();
        let remaining = body.len() as u32;
        let header = FixedHeader {
            control: 0x82,
            remaining,
        };
        let mut frame = body.freeze();
        assert!(matches!(
            Subscribe::decode(&header, &mut frame, ProtocolLevel::V311),
            Err(AppError::MalformedPacket(_))
        ));
    }
}
