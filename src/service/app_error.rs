pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("channel recv error: {0}")]
    ChannelRecvError(String),

    #[error("Accept error = {0}")]
    Accept(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// marker error: the buffer does not yet hold a complete frame
    #[error("incomplete frame")]
    Incomplete,

    /// wire protocol errors
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("packet too large: {0}")]
    PacketTooLarge(String),
}
