use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{PacketType, ProtocolLevel, Qos};
use crate::protocol::wire::{self, FixedHeader};
use crate::{AppError, AppResult};

/// PUBLISH: topic, packet id (present iff QoS > 0) and the application
/// payload. DUP, QoS and RETAIN ride in the flag nibble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub qos: Qos,
    pub dup: bool,
    pub retain: bool,
}

impl Publish {
    pub fn builder() -> PublishBuilder {
        PublishBuilder::default()
    }

    fn flag_nibble(&self) -> u8 {
        (u8::from(self.dup) << 3) | ((self.qos as u8) << 1) | u8::from(self.retain)
    }

    pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
        let mut remaining = 2 + self.topic.len() as u32 + self.payload.len() as u32;
        if self.qos != Qos::AtMostOnce {
            remaining += 2;
        }
        FixedHeader::put(buf, PacketType::Publish, self.flag_nibble(), remaining)?;
        wire::put_utf8(buf, &self.topic)?;
        if self.qos != Qos::AtMostOnce {
            let packet_id = self.packet_id.ok_or_else(|| {
                AppError::IllegalStateError("publish above qos 0 requires a packet id".to_string())
            })?;
            buf.put_u16(packet_id);
        }
        buf.put_slice(&self.payload);
        Ok(())
    }

    pub fn decode(
        header: &FixedHeader,
        body: &mut Bytes,
        level: ProtocolLevel,
    ) -> AppResult<Publish> {
        let flags = header.flags();
        let dup = flags & 0x08 != 0;
        let qos = Qos::from_u8((flags >> 1) & 0x03)?;
        let retain = flags & 0x01 != 0;

        let mut left = header.remaining;
        let topic = wire::read_utf8(body, &mut left)?;

        let packet_id = if qos != Qos::AtMostOnce {
            if left < 2 {
                return Err(AppError::MalformedPacket(
                    "publish is missing its packet id".to_string(),
                ));
            }
            left -= 2;
            Some(body.get_u16())
        } else {
            None
        };

        if level == ProtocolLevel::V5 {
            wire::skip_properties(body, &mut left)?;
        }

        // a zero-length payload after the topic is legal
        let payload = if left > 0 {
            body.split_to(left as usize)
        } else {
            Bytes::new()
        };
        Ok(Publish {
            topic,
            packet_id,
            payload,
            qos,
            dup,
            retain,
        })
    }
}

#[derive(Debug, Default)]
pub struct PublishBuilder {
    topic: String,
    packet_id: Option<u16>,
    payload: Bytes,
    qos: Qos,
    dup: bool,
    retain: bool,
}

impl PublishBuilder {
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    pub fn dup(mut self, dup: bool) -> Self {
        self.dup = dup;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn build(self) -> Publish {
        Publish {
            topic: self.topic,
            packet_id: if self.qos == Qos::AtMostOnce {
                None
            } else {
                self.packet_id
            },
            payload: self.payload,
            qos: self.qos,
            dup: self.dup,
            retain: self.retain,
        }
    }
}

macro_rules! packet_id_ack {
    ($(#[$doc:meta])* $name:ident, $kind:expr, $flags:expr, $check_flags:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub packet_id: u16,
        }

        impl $name {
            pub fn new(packet_id: u16) -> $name {
                $name { packet_id }
            }

            pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
                FixedHeader::put(buf, $kind, $flags, 2)?;
                buf.put_u16(self.packet_id);
                Ok(())
            }

            pub fn decode(header: &FixedHeader, body: &mut Bytes) -> AppResult<$name> {
                if $check_flags && header.flags() != $flags {
                    return Err(AppError::MalformedPacket(format!(
                        concat!(stringify!($name), " flag nibble must be {:#x}, got {:#x}"),
                        $flags,
                        header.flags()
                    )));
                }
                if header.remaining != 2 {
                    return Err(AppError::MalformedPacket(format!(
                        concat!(stringify!($name), " body must be 2 bytes, got {}"),
                        header.remaining
                    )));
                }
                Ok($name {
                    packet_id: body.get_u16(),
                })
            }
        }
    };
}

packet_id_ack!(
    /// PUBACK: acknowledges a QoS 1 PUBLISH.
    PubAck,
    PacketType::PubAck,
    0,
    false
);
packet_id_ack!(
    /// PUBREC: first half of the QoS 2 acknowledgement hop.
    PubRec,
    PacketType::PubRec,
    0,
    true
);
packet_id_ack!(
    /// PUBREL: release for a QoS 2 exchange; its flag nibble is fixed at 0x2.
    PubRel,
    PacketType::PubRel,
    2,
    true
);
packet_id_ack!(
    /// PUBCOMP: completes the QoS 2 exchange.
    PubComp,
    PacketType::PubComp,
    0,
    true
);
