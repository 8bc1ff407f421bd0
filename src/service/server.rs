use std::any::type_name;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use super::config::RequestHandlerPoolConfig;
use super::{DynamicConfig, Shutdown};
use crate::network::Connection;
use crate::protocol::{MqttCodec, Packet};
use crate::request::{RequestContext, RequestProcessor, SessionState, DEFAULT_KEEP_ALIVE};
use crate::{AppError, AppResult};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection ids are unique across every listener of the process.
pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// One decoded request on its way through the worker pool, carrying the
/// oneshot its response travels back on. The sender is the only reference a
/// worker holds into the connection; when the connection is gone the send
/// simply fails and the worker moves on.
#[derive(Debug)]
pub struct RequestTask {
    context: RequestContext,
    packet: Packet,
    response_tx: oneshot::Sender<Packet>,
}

fn get_type_name<T>(_: &T) -> &'static str {
    type_name::<T>()
}

/// Starts the shared request-handler pool: a bounded channel drained by a
/// fixed set of workers, plus a monitor that respawns any worker a panic
/// takes down. Returns the sender both listeners dispatch into.
pub fn start_request_handler(
    pool_config: &RequestHandlerPoolConfig,
    notify_shutdown: broadcast::Sender<()>,
) -> async_channel::Sender<RequestTask> {
    let (request_tx, request_rx) = async_channel::bounded(pool_config.channel_capacity);
    let num_workers = pool_config.worker_count();
    let monitor_interval = Duration::from_secs(pool_config.monitor_interval_secs);
    let worker_check_timeout = Duration::from_millis(pool_config.worker_check_timeout_ms);

    tokio::spawn(async move {
        let mut workers = HashMap::with_capacity(num_workers);
        for id in 0..num_workers {
            workers.insert(id, spawn_worker(id, request_rx.clone()));
        }

        let mut shutdown = Shutdown::subscribe(&notify_shutdown);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("request handler monitor received shutdown signal");
                    break;
                }
                _ = time::sleep(monitor_interval) => {}
            }
            for id in 0..num_workers {
                if let Some(mut handle) = workers.remove(&id) {
                    match time::timeout(worker_check_timeout, &mut handle).await {
                        Ok(Ok(_)) => {
                            info!("request worker {} exited normally", id);
                        }
                        Ok(Err(join_error)) => {
                            if join_error.is_panic() {
                                let payload = join_error.into_panic();
                                if let Some(message) = payload.downcast_ref::<&'static str>() {
                                    error!("request worker {} panicked: {}", id, message);
                                } else if let Some(message) = payload.downcast_ref::<String>() {
                                    error!("request worker {} panicked: {}", id, message);
                                } else {
                                    error!(
                                        "request worker {} panicked with an unknown payload: {}",
                                        id,
                                        get_type_name(&payload)
                                    );
                                }
                                workers.insert(id, spawn_worker(id, request_rx.clone()));
                            } else {
                                error!("request worker {} failed for unknown reasons", id);
                            }
                        }
                        Err(_) => {
                            // still running
                            workers.insert(id, handle);
                        }
                    }
                }
            }
        }
        debug!("request handler exit monitor loop");
    });

    request_tx
}

fn spawn_worker(id: usize, request_rx: async_channel::Receiver<RequestTask>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("request worker {} started", id);
        while let Ok(task) = request_rx.recv().await {
            process_request(task).await;
        }
        debug!("request worker {} exited", id);
    })
}

async fn process_request(task: RequestTask) {
    let RequestTask {
        context,
        packet,
        response_tx,
    } = task;
    let connection_id = context.connection_id;
    let response = RequestProcessor::process_request(packet, &context).await;
    if response_tx.send(response).is_err() {
        // the connection went away while we were working; nothing to deliver
        debug!(
            "connection {} dropped before its response was sent",
            connection_id
        );
    }
}

/// Schedules one packet onto the pool and waits for its response. A closed
/// pool is a dispatch failure; a dropped response sender means the worker
/// died mid-request and the connection must close.
pub(crate) async fn dispatch_request(
    request_tx: &async_channel::Sender<RequestTask>,
    context: RequestContext,
    packet: Packet,
) -> AppResult<Packet> {
    let (response_tx, response_rx) = oneshot::channel();
    request_tx
        .send(RequestTask {
            context,
            packet,
            response_tx,
        })
        .await
        .map_err(|e| AppError::ChannelSendError(e.to_string()))?;
    response_rx
        .await
        .map_err(|_| AppError::ChannelRecvError("response channel closed".to_string()))
}

/// Sleeps until the idle deadline, or forever when the timer is disabled.
pub(crate) async fn idle_sleep(deadline: Instant, armed: bool) {
    if armed {
        time::sleep_until(deadline).await;
    } else {
        std::future::pending::<()>().await;
    }
}

// handler for each connection
struct ConnectionHandler {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection_id: u64,
    client_ip: String,
    connection: Connection,
    writer: BufWriter<OwnedWriteHalf>,
    session: Arc<SessionState>,
    request_tx: async_channel::Sender<RequestTask>,
    deadline: Instant,
}

impl ConnectionHandler {
    async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::subscribe(&self.notify_shutdown);
        loop {
            let maybe_packet = tokio::select! {
                res = self.connection.read_packet() => res?,
                _ = idle_sleep(self.deadline, self.session.keep_alive().is_some()) => {
                    info!("connection {} exceeded its keep-alive, closing", self.connection_id);
                    return Ok(());
                }
                _ = shutdown.recv() => {
                    debug!("connection handler exit read loop after shutdown signal");
                    return Ok(());
                }
            };

            let packet = match maybe_packet {
                Some(packet) => packet,
                // client closed the connection gracefully
                None => break,
            };

            // every complete frame pushes the idle deadline out
            self.rearm_deadline();

            let context = RequestContext::new(
                self.connection_id,
                self.client_ip.clone(),
                self.session.clone(),
            );
            match dispatch_request(&self.request_tx, context, packet).await {
                Ok(Packet::None) => {}
                Ok(response) => {
                    let mut out = BytesMut::new();
                    MqttCodec::encode(&response, &mut out)?;
                    self.writer.write_all(&out).await.map_err(|e| {
                        AppError::DetailedIoError(format!("write response error: {}", e))
                    })?;
                    self.writer.flush().await.map_err(|e| {
                        AppError::DetailedIoError(format!("flush response error: {}", e))
                    })?;
                }
                Err(e) => {
                    error!("connection {} lost its response: {}", self.connection_id, e);
                    return Err(e);
                }
            }

            // a CONNECT may have renegotiated the interval mid-flight
            self.rearm_deadline();
        }
        debug!("connection handler exit read loop");

        Ok(())
    }

    fn rearm_deadline(&mut self) {
        if let Some(interval) = self.session.keep_alive() {
            self.deadline = Instant::now() + interval;
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!("connection handler dropped");
    }
}

/// TCP listener for the raw MQTT port: accepts connections, hands each one
/// to its own handler task, and shares the request-handler pool across all
/// of them.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    dynamic_config: DynamicConfig,
    request_tx: async_channel::Sender<RequestTask>,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        limit_connections: Arc<Semaphore>,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        dynamic_config: DynamicConfig,
        request_tx: async_channel::Sender<RequestTask>,
    ) -> Self {
        Server {
            listener,
            limit_connections,
            notify_shutdown,
            shutdown_complete_tx,
            dynamic_config,
            request_tx,
        }
    }

    /// Accepts connections until the surrounding task is cancelled. Each
    /// accepted socket takes a connection permit, gets a fresh handler task
    /// and releases the permit when the handler finishes, however it
    /// finished.
    pub async fn run(&self) -> AppResult<()> {
        let buffer_size = self.dynamic_config.conn_read_buffer_size();

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
            debug!("accepted connection {} from {}", connection_id, client_ip);

            let (reader, writer) = socket.into_split();
            let mut handler = ConnectionHandler {
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
                notify_shutdown: self.notify_shutdown.clone(),
                connection_id,
                client_ip,
                connection: Connection::new(reader, buffer_size),
                writer: BufWriter::new(writer),
                session: Arc::new(SessionState::new()),
                request_tx: self.request_tx.clone(),
                deadline: Instant::now() + DEFAULT_KEEP_ALIVE,
            };

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    error!("connection error: {:?}", err);
                }
                // whether gracefully or unexpectedly closed, release the permit
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
                            "accept tcp server error: {}",
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

impl Drop for Server {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}
