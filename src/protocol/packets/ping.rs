use bytes::BytesMut;

use super::PacketType;
use crate::protocol::wire::FixedHeader;
use crate::{AppError, AppResult};

macro_rules! empty_body_packet {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl $name {
            pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
                FixedHeader::put(buf, $kind, 0, 0)
            }

            pub fn decode(header: &FixedHeader) -> AppResult<$name> {
                if header.flags() != 0 {
                    return Err(AppError::MalformedPacket(format!(
                        concat!(stringify!($name), " flag nibble must be 0, got {:#x}"),
                        header.flags()
                    )));
                }
                if header.remaining != 0 {
                    return Err(AppError::MalformedPacket(format!(
                        concat!(stringify!($name), " body must be empty, got {} bytes"),
                        header.remaining
                    )));
                }
                Ok($name)
            }
        }
    };
}

empty_body_packet!(
    /// PINGREQ: client-side keep-alive probe.
    PingReq,
    PacketType::PingReq
);
empty_body_packet!(
    /// PINGRESP: answers a PINGREQ.
    PingResp,
    PacketType::PingResp
);
empty_body_packet!(
    /// DISCONNECT: the peer is going away; it is never answered.
    Disconnect,
    PacketType::Disconnect
);
