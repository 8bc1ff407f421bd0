pub mod network;
pub mod protocol;
pub mod request;
pub mod service;
pub mod websocket;

pub use protocol::{MqttCodec, Packet};
pub use service::{
    global_config, setup_local_tracing, setup_tracing, AppError, AppResult, Broker, BrokerConfig,
    DynamicConfig, Server, Shutdown, GLOBAL_CONFIG,
};
