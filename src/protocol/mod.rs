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

//! MQTT wire protocol: primitives, the packet model and the frame codec.
//!
//! The layering mirrors the wire format itself: [`wire`] holds the
//! fixed-header and field primitives, [`packets`] the per-kind structs and
//! the [`Packet`] tagged variant, and the codec drives frame boundary
//! detection over a byte queue.

mod codec;
pub mod packets;
pub mod wire;

pub use codec::MqttCodec;
pub use packets::{
    ConnAck, Connect, Disconnect, Packet, PacketType, PingReq, PingResp, ProtocolLevel, PubAck,
    PubComp, PubRec, PubRel, Publish, Qos, SubAck, Subscribe, TopicFilter, UnsubAck, Unsubscribe,
};
