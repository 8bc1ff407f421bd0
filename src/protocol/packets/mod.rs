// Copyright 2025 the embermq authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::BytesMut;

use crate::{AppError, AppResult};

mod connect;
mod ping;
mod publish;
mod subscribe;

pub use connect::{ConnAck, ConnAckBuilder, Connect, ConnectBuilder};
pub use ping::{Disconnect, PingReq, PingResp};
pub use publish::{PubAck, PubComp, PubRec, PubRel, Publish, PublishBuilder};
pub use subscribe::{
    SubAck, SubAckBuilder, Subscribe, SubscribeBuilder, TopicFilter, UnsubAck, Unsubscribe,
    UnsubscribeBuilder,
};

/// The fourteen control packet kinds, as carried in the high nibble of the
/// control byte. Values 0 and 15 are illegal on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn from_u8(value: u8) -> AppResult<PacketType> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::PubAck),
            5 => Ok(PacketType::PubRec),
            6 => Ok(PacketType::PubRel),
            7 => Ok(PacketType::PubComp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::SubAck),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::UnsubAck),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            other => Err(AppError::MalformedPacket(format!(
                "illegal packet type {}",
                other
            ))),
        }
    }
}

/// The protocol revision named in a CONNECT. The revision fixes the protocol
/// name the CONNECT must carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolLevel {
    V31 = 3,
    #[default]
    V311 = 4,
    V5 = 5,
}

impl ProtocolLevel {
    pub fn from_u8(value: u8) -> AppResult<ProtocolLevel> {
        match value {
            3 => Ok(ProtocolLevel::V31),
            4 => Ok(ProtocolLevel::V311),
            5 => Ok(ProtocolLevel::V5),
            other => Err(AppError::MalformedPacket(format!(
                "unsupported protocol level {}",
                other
            ))),
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        match self {
            ProtocolLevel::V31 => "MQIsdp",
            ProtocolLevel::V311 | ProtocolLevel::V5 => "MQTT",
        }
    }
}

/// Delivery assurance level of a PUBLISH.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Qos {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Qos {
    pub fn from_u8(value: u8) -> AppResult<Qos> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(AppError::MalformedPacket(format!("illegal qos {}", other))),
        }
    }
}

/// One control packet, tagged by its wire kind, plus the `None` sentinel the
/// service returns for requests that produce no response. `None` is never
/// serialized; encoding it appends nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq(PingReq),
    PingResp(PingResp),
    Disconnect(Disconnect),
    None,
}

impl Packet {
    /// Appends the packet's canonical wire form: fixed header, then body.
    pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
        match self {
            Packet::Connect(p) => p.encode(buf),
            Packet::ConnAck(p) => p.encode(buf),
            Packet::Publish(p) => p.encode(buf),
            Packet::PubAck(p) => p.encode(buf),
            Packet::PubRec(p) => p.encode(buf),
            Packet::PubRel(p) => p.encode(buf),
            Packet::PubComp(p) => p.encode(buf),
            Packet::Subscribe(p) => p.encode(buf),
            Packet::SubAck(p) => p.encode(buf),
            Packet::Unsubscribe(p) => p.encode(buf),
            Packet::UnsubAck(p) => p.encode(buf),
            Packet::PingReq(p) => p.encode(buf),
            Packet::PingResp(p) => p.encode(buf),
            Packet::Disconnect(p) => p.encode(buf),
            Packet::None => Ok(()),
        }
    }
}
