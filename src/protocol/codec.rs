use bytes::{Buf, Bytes, BytesMut};

use super::packets::{
    ConnAck, Connect, Disconnect, Packet, PacketType, PingReq, PingResp, ProtocolLevel, PubAck,
    PubComp, PubRec, PubRel, Publish, SubAck, Subscribe, UnsubAck, Unsubscribe,
};
use super::wire::FixedHeader;
use crate::{AppError, AppResult};

/// Frame-oriented codec for one connection.
///
/// `decode` examines the queue without consuming while a frame is
/// incomplete, so appending more bytes and retrying always makes progress.
/// Once a frame is complete, exactly its bytes are split off; a body that
/// then violates a wire invariant is a protocol error and the caller closes
/// the connection.
///
/// The codec remembers the protocol level negotiated by the first CONNECT,
/// which gates the MQTT 5 property-block handling of later packets.
#[derive(Debug, Default)]
pub struct MqttCodec {
    level: ProtocolLevel,
}

impl MqttCodec {
    pub fn new() -> MqttCodec {
        MqttCodec {
            level: ProtocolLevel::V311,
        }
    }

    pub fn level(&self) -> ProtocolLevel {
        self.level
    }

    /// Decodes one packet from the front of `buffer`, or `Ok(None)` with
    /// the buffer untouched when a complete frame has not arrived yet.
    pub fn decode(&mut self, buffer: &mut BytesMut) -> AppResult<Option<Packet>> {
        let (header, header_len) = match FixedHeader::check(buffer) {
            Ok(peeked) => peeked,
            Err(AppError::Incomplete) => return Ok(None),
            Err(e) => return Err(e),
        };
        let total = header_len + header.remaining as usize;
        if buffer.remaining() < total {
            buffer.reserve(total);
            return Ok(None);
        }

        let mut body = buffer.split_to(total).freeze();
        body.advance(header_len);

        let packet = self.decode_body(&header, &mut body)?;
        if let Packet::Connect(connect) = &packet {
            self.level = connect.level;
        }
        Ok(Some(packet))
    }

    fn decode_body(&self, header: &FixedHeader, body: &mut Bytes) -> AppResult<Packet> {
        let packet = match PacketType::from_u8(header.kind())? {
            PacketType::Connect => Packet::Connect(Connect::decode(header, body)?),
            PacketType::ConnAck => Packet::ConnAck(ConnAck::decode(header, body)?),
            PacketType::Publish => Packet::Publish(Publish::decode(header, body, self.level)?),
            PacketType::PubAck => Packet::PubAck(PubAck::decode(header, body)?),
            PacketType::PubRec => Packet::PubRec(PubRec::decode(header, body)?),
            PacketType::PubRel => Packet::PubRel(PubRel::decode(header, body)?),
            PacketType::PubComp => Packet::PubComp(PubComp::decode(header, body)?),
            PacketType::Subscribe => {
                Packet::Subscribe(Subscribe::decode(header, body, self.level)?)
            }
            PacketType::SubAck => Packet::SubAck(SubAck::decode(header, body)?),
            PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::decode(header, body)?),
            PacketType::UnsubAck => Packet::UnsubAck(UnsubAck::decode(header, body)?),
            PacketType::PingReq => Packet::PingReq(PingReq::decode(header)?),
            PacketType::PingResp => Packet::PingResp(PingResp::decode(header)?),
            PacketType::Disconnect => Packet::Disconnect(Disconnect::decode(header)?),
        };
        Ok(packet)
    }

    /// Appends the packet's canonical wire form. `Packet::None` appends
    /// nothing.
    pub fn encode(packet: &Packet, buffer: &mut BytesMut) -> AppResult<()> {
        packet.encode(buffer)
    }
}
