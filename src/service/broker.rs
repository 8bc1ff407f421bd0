use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use super::server::start_request_handler;
use super::{global_config, DynamicConfig, Server};
use crate::websocket::WebSocketServer;
use crate::{AppError, AppResult};

pub struct Broker;

impl Broker {
    /// Runs the broker to completion: bind, serve until a configured signal
    /// arrives, then broadcast shutdown and wait for every pipeline to
    /// drain. A bind failure is the caller's non-zero exit path.
    ///
    /// Shutdown sequence: the listener select is the first thing to fall
    /// out; the broadcast then stops every connection handler after its
    /// in-flight response is written; dropping the last handler releases
    /// the worker pool's senders, which ends the workers; the completion
    /// channel closing is the final all-clear.
    pub fn start(rt: &Runtime) -> AppResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

        rt.block_on(Self::run_servers(
            notify_shutdown.clone(),
            shutdown_complete_tx.clone(),
        ))?;

        // listeners are down; repeated sends are harmless no-ops
        if notify_shutdown.send(()).is_err() {
            debug!("no pipelines were left to notify");
        }
        drop(shutdown_complete_tx);
        debug!("waiting for shutdown complete...");
        rt.block_on(async {
            shutdown_complete_rx.recv().await;
        });

        info!("broker shutdown complete");
        Ok(())
    }

    async fn run_servers(
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> AppResult<()> {
        let network = &global_config().network;
        let listen_address = format!("{}:{}", network.ip, network.port);
        let listener = TcpListener::bind(&listen_address).await.map_err(|e| {
            let error_msg = format!("failed to bind {}: {}", listen_address, e);
            error!("{}", error_msg);
            AppError::IllegalStateError(error_msg)
        })?;
        info!("tcp server listening on {}", listen_address);

        let request_tx = start_request_handler(
            &global_config().request_handler_pool,
            notify_shutdown.clone(),
        );

        let server = Server::new(
            listener,
            Arc::new(Semaphore::new(network.max_connection)),
            notify_shutdown.clone(),
            shutdown_complete_tx.clone(),
            DynamicConfig::new(),
            request_tx.clone(),
        );

        let websocket = &global_config().websocket;
        let ws_server = if websocket.enabled {
            let ws_address = format!("{}:{}", websocket.ip, websocket.port);
            let ws_listener = TcpListener::bind(&ws_address).await.map_err(|e| {
                let error_msg = format!("failed to bind {}: {}", ws_address, e);
                error!("{}", error_msg);
                AppError::IllegalStateError(error_msg)
            })?;
            info!(
                "websocket server listening on {} at {}",
                ws_address, websocket.path
            );
            Some(WebSocketServer::new(
                ws_listener,
                notify_shutdown.clone(),
                shutdown_complete_tx,
                request_tx,
            ))
        } else {
            None
        };

        info!("server startup complete");
        tokio::select! {
            res = server.run() => {
                if let Err(err) = res {
                    error!(cause = %err, "failed to accept");
                }
            }
            res = Self::run_websocket(ws_server) => {
                if let Err(err) = res {
                    error!(cause = %err, "websocket listener failed");
                }
            }
            _ = Self::wait_for_signals() => {
                info!("received shutdown signal");
            }
        }

        Ok(())
    }

    async fn run_websocket(server: Option<WebSocketServer>) -> AppResult<()> {
        match server {
            Some(server) => server.run().await,
            None => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    /// Resolves the configured signal names and waits for the first one.
    async fn wait_for_signals() {
        let names = &global_config().shutdown.signals;
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let mut installed = 0;
        for name in names {
            let Some(kind) = Self::signal_kind(name) else {
                warn!("unknown shutdown signal {:?}", name);
                continue;
            };
            match signal(kind) {
                Ok(mut stream) => {
                    installed += 1;
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if stream.recv().await.is_some() {
                            let _ = tx.send(()).await;
                        }
                    });
                }
                Err(e) => warn!("failed to install handler for {}: {}", name, e),
            }
        }
        drop(tx);
        if installed == 0 {
            // still stoppable from the terminal
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
        rx.recv().await;
    }

    fn signal_kind(name: &str) -> Option<SignalKind> {
        match name.trim_start_matches("SIG") {
            "INT" => Some(SignalKind::interrupt()),
            "TERM" => Some(SignalKind::terminate()),
            "HUP" => Some(SignalKind::hangup()),
            "QUIT" => Some(SignalKind::quit()),
            _ => None,
        }
    }
}
