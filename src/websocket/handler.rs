use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use super::frame::{parse_frames, put_frame, OpCode};
use crate::protocol::{MqttCodec, Packet};
use crate::request::{RequestContext, SessionState, DEFAULT_KEEP_ALIVE};
use crate::service::{
    dispatch_request, global_config, idle_sleep, next_connection_id, RequestTask, Shutdown,
};
use crate::{AppError, AppResult};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_PROTOCOL_ERROR: u16 = 1002;
const CLOSE_UNSUPPORTED_DATA: u16 = 1003;

/// A request head larger than this never upgrades to anything.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

const NOT_FOUND_RESPONSE: &str = "HTTP/1.1 404 Not Found\r\n\
Content-Type: application/json\r\n\
Content-Length: 21\r\n\
Connection: close\r\n\r\n\
{\"error\":\"Not Found\"}";

/// RFC 6455 accept token: SHA-1 over the client key and the protocol GUID,
/// base64 encoded.
fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

#[derive(Debug)]
struct RequestHead {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_request_head(raw: &[u8]) -> AppResult<RequestHead> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| AppError::MalformedPacket("request head is not utf-8".to_string()))?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| AppError::MalformedPacket("empty request line".to_string()))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| AppError::MalformedPacket("request line has no target".to_string()))?
        .to_string();
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(RequestHead {
        method,
        path,
        headers,
    })
}

fn split_close_payload(payload: &[u8]) -> (u16, Vec<u8>) {
    if payload.len() >= 2 {
        (
            u16::from_be_bytes([payload[0], payload[1]]),
            payload[2..].to_vec(),
        )
    } else {
        (CLOSE_NORMAL, Vec::new())
    }
}

/// HTTP listener answering the MQTT-over-WebSocket upgrade. Everything past
/// the `101` is byte-for-byte the raw-TCP pipeline: unmasked data frames
/// feed the same codec, responses come back as Binary frames.
#[derive(Debug)]
pub struct WebSocketServer {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    request_tx: async_channel::Sender<RequestTask>,
}

impl WebSocketServer {
    pub fn new(
        listener: TcpListener,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        request_tx: async_channel::Sender<RequestTask>,
    ) -> Self {
        WebSocketServer {
            listener,
            limit_connections: Arc::new(Semaphore::new(global_config().network.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
            request_tx,
        }
    }

    pub async fn run(&self) -> AppResult<()> {
        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .unwrap();

            let socket = self.accept().await?;
            let client_ip = socket
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            let connection_id = next_connection_id();
            debug!(
                "accepted websocket connection {} from {}",
                connection_id, client_ip
            );

            let handler = WebSocketConnectionHandler {
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
                notify_shutdown: self.notify_shutdown.clone(),
                connection_id,
                client_ip,
                stream: socket,
                request_tx: self.request_tx.clone(),
            };

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    error!("websocket connection error: {:?}", err);
                }
                drop(permit);
            });
        }
    }

    async fn accept(&self) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::Accept(format!(
                            "accept websocket server error: {}",
                            err
                        )));
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

struct WebSocketConnectionHandler {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection_id: u64,
    client_ip: String,
    stream: TcpStream,
    request_tx: async_channel::Sender<RequestTask>,
}

impl WebSocketConnectionHandler {
    async fn handle_connection(mut self) -> AppResult<()> {
        let ws_config = &global_config().websocket;
        let idle_timeout = Duration::from_secs(ws_config.idle_timeout_secs);
        let mut read_buffer = BytesMut::with_capacity(4 * 1024);

        // HTTP phase, bounded by the front-end idle timeout
        let head = match time::timeout(
            idle_timeout,
            Self::read_request_head(&mut self.stream, &mut read_buffer),
        )
        .await
        {
            Ok(Ok(Some(head))) => head,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(
                    "connection {} idled out before upgrading",
                    self.connection_id
                );
                return Ok(());
            }
        };

        let wants_upgrade = head.header("upgrade").is_some() && head.header("connection").is_some();
        if !wants_upgrade || head.path != ws_config.path {
            debug!("{} {} answered with 404", head.method, head.path);
            self.stream.write_all(NOT_FOUND_RESPONSE.as_bytes()).await?;
            self.stream.flush().await?;
            return Ok(());
        }

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             Sec-WebSocket-Protocol: mqtt\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
            accept_key(head.header("sec-websocket-key").unwrap_or_default())
        );
        self.stream.write_all(response.as_bytes()).await?;
        self.stream.flush().await?;

        // MQTT-over-WebSocket phase
        let mut shutdown = Shutdown::subscribe(&self.notify_shutdown);
        let session = Arc::new(SessionState::new());
        let mut codec = MqttCodec::new();
        let mut mqtt_buffer = BytesMut::with_capacity(4 * 1024);
        let mut deadline = Instant::now() + DEFAULT_KEEP_ALIVE;

        loop {
            let frames = match parse_frames(&mut read_buffer) {
                Ok(frames) => frames,
                Err(e) => {
                    debug!(
                        "connection {} sent a malformed frame: {}",
                        self.connection_id, e
                    );
                    self.send_close(CLOSE_PROTOCOL_ERROR, &[]).await?;
                    return Ok(());
                }
            };
            for ws_frame in frames {
                match ws_frame.opcode {
                    OpCode::Binary | OpCode::Continuation => {
                        mqtt_buffer.extend_from_slice(&ws_frame.payload);
                    }
                    OpCode::Ping => {
                        self.send_frame(OpCode::Pong, &ws_frame.payload).await?;
                    }
                    OpCode::Close => {
                        let (code, reason) = split_close_payload(&ws_frame.payload);
                        self.send_close(code, &reason).await?;
                        return Ok(());
                    }
                    // inbound text and stray pongs are tolerated and ignored
                    OpCode::Text | OpCode::Pong => {}
                    OpCode::Reserved(op) => {
                        debug!(
                            "connection {} sent unsupported opcode {:#x}",
                            self.connection_id, op
                        );
                        self.send_close(CLOSE_UNSUPPORTED_DATA, &[]).await?;
                        return Ok(());
                    }
                }
            }

            while let Some(packet) = codec.decode(&mut mqtt_buffer)? {
                if let Some(interval) = session.keep_alive() {
                    deadline = Instant::now() + interval;
                }
                let context = RequestContext::new(
                    self.connection_id,
                    self.client_ip.clone(),
                    session.clone(),
                );
                let response = dispatch_request(&self.request_tx, context, packet).await?;
                if response != Packet::None {
                    let mut out = BytesMut::new();
                    MqttCodec::encode(&response, &mut out)?;
                    self.send_frame(OpCode::Binary, &out).await?;
                }
                if let Some(interval) = session.keep_alive() {
                    deadline = Instant::now() + interval;
                }
            }

            tokio::select! {
                read = self.stream.read_buf(&mut read_buffer) => {
                    if 0 == read? {
                        return Ok(());
                    }
                }
                _ = idle_sleep(deadline, session.keep_alive().is_some()) => {
                    info!(
                        "connection {} exceeded its keep-alive, closing",
                        self.connection_id
                    );
                    return Ok(());
                }
                _ = shutdown.recv() => {
                    debug!("websocket handler exit read loop after shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    async fn read_request_head(
        stream: &mut TcpStream,
        buffer: &mut BytesMut,
    ) -> AppResult<Option<RequestHead>> {
        loop {
            if let Some(end) = find_head_end(buffer) {
                let raw = buffer.split_to(end + 4);
                return parse_request_head(&raw).map(Some);
            }
            if buffer.len() > MAX_REQUEST_HEAD {
                return Err(AppError::MalformedPacket(
                    "request head never ended".to_string(),
                ));
            }
            if 0 == stream.read_buf(buffer).await? {
                return Ok(None);
            }
        }
    }

    async fn send_frame(&mut self, opcode: OpCode, payload: &[u8]) -> AppResult<()> {
        let mut out = BytesMut::with_capacity(payload.len() + 10);
        put_frame(&mut out, opcode, payload);
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn send_close(&mut self, code: u16, reason: &[u8]) -> AppResult<()> {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.put_slice(reason);
        self.send_frame(OpCode::Close, &payload).await
    }
}

impl Drop for WebSocketConnectionHandler {
    fn drop(&mut self) {
        debug!("websocket connection handler dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_the_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn request_head_parsing_is_case_insensitive() {
        let raw = b"GET /mqtt HTTP/1.1\r\nHost: example\r\nUPGRADE: websocket\r\nConnection: Upgrade\r\n\r\n";
        let head = parse_request_head(raw).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/mqtt");
        assert_eq!(head.header("upgrade"), Some("websocket"));
        assert_eq!(head.header("connection"), Some("Upgrade"));
        assert_eq!(head.header("missing"), None);
    }

    #[test]
    fn close_payload_defaults_to_normal_closure() {
        assert_eq!(split_close_payload(&[]), (1000, Vec::new()));
        assert_eq!(split_close_payload(&[0x03, 0xE9]), (1001, Vec::new()));
        let (code, reason) = split_close_payload(&[0x03, 0xE8, b'b', b'y', b'e']);
        assert_eq!(code, 1000);
        assert_eq!(reason, b"bye".to_vec());
    }
}
