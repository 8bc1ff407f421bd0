use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::protocol::{MqttCodec, Packet, ProtocolLevel};
use crate::AppResult;

/// Read side of one client connection: the socket's read half, the inbound
/// byte queue and the codec whose state the queue feeds. All of it lives on
/// the connection's task; nothing here is shared.
#[derive(Debug)]
pub struct Connection {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    codec: MqttCodec,
}

impl Connection {
    pub fn new(reader: OwnedReadHalf, buffer_size: usize) -> Connection {
        Connection {
            reader,
            buffer: BytesMut::with_capacity(buffer_size),
            codec: MqttCodec::new(),
        }
    }

    pub fn protocol_level(&self) -> ProtocolLevel {
        self.codec.level()
    }

    /// Reads one control packet from the connection.
    ///
    /// Loops between draining the codec and refilling the queue until a
    /// complete packet is available. If the client closes the connection
    /// between frames, `None` is returned; a close mid-frame is an error.
    /// A malformed frame surfaces as an error and the caller must close
    /// the connection.
    pub async fn read_packet(&mut self) -> AppResult<Option<Packet>> {
        loop {
            if let Some(packet) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(packet));
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    // client has closed the connection gracefully
                    Ok(None)
                } else {
                    // client closed the connection while sending a frame
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
        }
    }
}
