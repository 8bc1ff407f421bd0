use std::cmp::max;
use std::path::Path;
use std::thread;

use getset::{CopyGetters, Getters};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

pub static GLOBAL_CONFIG: OnceCell<BrokerConfig> = OnceCell::new();

/// The process-wide configuration. Falls back to the built-in defaults when
/// nothing was loaded, which is what the test suites rely on.
pub fn global_config() -> &'static BrokerConfig {
    GLOBAL_CONFIG.get_or_init(BrokerConfig::default)
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    pub conn_read_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 1883,
            max_connection: 1024,
            conn_read_buffer_size: 4 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub ip: String,
    pub port: u16,
    /// HTTP mount point answering the MQTT-over-WebSocket upgrade.
    pub path: String,
    /// Idle timeout applied by the HTTP layer before the upgrade.
    pub idle_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            enabled: true,
            ip: "0.0.0.0".to_string(),
            port: 8080,
            path: "/mqtt".to_string(),
            idle_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RequestHandlerPoolConfig {
    /// Worker count; 0 selects max(4, available cores).
    pub num_workers: usize,
    pub channel_capacity: usize,
    pub monitor_interval_secs: u64,
    pub worker_check_timeout_ms: u64,
}

impl Default for RequestHandlerPoolConfig {
    fn default() -> Self {
        RequestHandlerPoolConfig {
            num_workers: 0,
            channel_capacity: 1024,
            monitor_interval_secs: 5,
            worker_check_timeout_ms: 200,
        }
    }
}

impl RequestHandlerPoolConfig {
    pub fn worker_count(&self) -> usize {
        if self.num_workers > 0 {
            self.num_workers
        } else {
            max(
                4,
                thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            )
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ShutdownConfig {
    /// OS signals that initiate a graceful shutdown.
    pub signals: Vec<String>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            signals: vec!["SIGINT".to_string(), "SIGTERM".to_string()],
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    pub network: NetworkConfig,
    pub websocket: WebSocketConfig,
    pub request_handler_pool: RequestHandlerPoolConfig,
    pub shutdown: ShutdownConfig,
}

impl BrokerConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<BrokerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| AppError::InvalidValue("config file path is not utf-8".to_string()))?;
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path_str).required(false))
            .build()?;
        let broker_config: BrokerConfig = settings.try_deserialize()?;
        Ok(broker_config)
    }
}

/// Snapshot of the tunables a connection keeps for its lifetime; cloning it
/// pins the values an admin may change under a running broker.
#[derive(Getters, CopyGetters, Clone, Debug)]
#[get_copy = "pub"]
pub struct DynamicConfig {
    max_connection: usize,
    conn_read_buffer_size: usize,
}

impl DynamicConfig {
    pub fn new() -> Self {
        Self {
            max_connection: global_config().network.max_connection,
            conn_read_buffer_size: global_config().network.conn_read_buffer_size,
        }
    }
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_surface() {
        let config = BrokerConfig::default();
        assert_eq!(config.network.port, 1883);
        assert_eq!(config.websocket.path, "/mqtt");
        assert_eq!(config.websocket.idle_timeout_secs, 60);
        assert_eq!(
            config.shutdown.signals,
            vec!["SIGINT".to_string(), "SIGTERM".to_string()]
        );
    }

    #[test]
    fn worker_count_floor_is_four() {
        let pool = RequestHandlerPoolConfig {
            num_workers: 0,
            ..Default::default()
        };
        assert!(pool.worker_count() >= 4);
        let pinned = RequestHandlerPoolConfig {
            num_workers: 2,
            ..Default::default()
        };
        assert_eq!(pinned.worker_count(), 2);
    }

    #[test]
    fn a_missing_config_file_falls_back_to_defaults() {
        let config = BrokerConfig::set_up_config("does-not-exist").unwrap();
        assert_eq!(config.network.port, 1883);
    }
}
