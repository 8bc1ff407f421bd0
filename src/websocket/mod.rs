//! MQTT-over-WebSocket ingress: HTTP upgrade handling plus byte-level frame
//! reassembly in front of the same codec and dispatch pipeline the raw TCP
//! listener uses.

pub use frame::{parse_frames, put_frame, OpCode, WsFrame};
pub use handler::WebSocketServer;

mod frame;
mod handler;
