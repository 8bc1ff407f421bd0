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

use tracing::trace;

use crate::protocol::{
    ConnAck, Packet, PingResp, PubAck, PubComp, PubRec, Qos, SubAck, UnsubAck,
};
use crate::request::RequestContext;

/// Maps one decoded request packet to its response packet, or to
/// `Packet::None` when the request draws no response. The only side effect
/// is the keep-alive renegotiation a CONNECT performs through the request
/// context; everything else is a pure function of the input.
pub struct RequestProcessor;

impl RequestProcessor {
    pub async fn process_request(request: Packet, context: &RequestContext) -> Packet {
        trace!(
            "processing {:?} for connection {}",
            request,
            context.connection_id
        );
        match request {
            Packet::Connect(connect) => {
                context.session.negotiate_keep_alive(connect.keep_alive);
                Packet::ConnAck(ConnAck::builder().session_present(false).reason(0).build())
            }
            Packet::Publish(publish) => match publish.qos {
                Qos::AtMostOnce => Packet::None,
                Qos::AtLeastOnce => {
                    Packet::PubAck(PubAck::new(publish.packet_id.unwrap_or_default()))
                }
                Qos::ExactlyOnce => {
                    Packet::PubRec(PubRec::new(publish.packet_id.unwrap_or_default()))
                }
            },
            Packet::PubRel(pubrel) => Packet::PubComp(PubComp::new(pubrel.packet_id)),
            Packet::Subscribe(subscribe) => Packet::SubAck(
                SubAck::builder()
                    .packet_id(subscribe.packet_id)
                    .codes_from(&subscribe)
                    .build(),
            ),
            Packet::Unsubscribe(unsubscribe) => {
                Packet::UnsubAck(UnsubAck::new(unsubscribe.packet_id))
            }
            Packet::PingReq(_) => Packet::PingResp(PingResp),
            // DISCONNECT and every server-origin packet draw no response
            _ => Packet::None,
        }
    }
}
