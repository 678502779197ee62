use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("early data decode failed: {0}")]
    EarlyData(String),

    #[error("dial to {dest} failed: {source}")]
    Dial {
        dest: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SOCKS5 error: {0}")]
    Socks5(#[from] Socks5Error),

    #[error("DoH query failed: {0}")]
    Doh(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

/// Failure modes of the SOCKS5 client handshake. Each maps to a distinct
/// wire-level condition so callers can log what the upstream actually said.
#[derive(Debug, Error)]
pub enum Socks5Error {
    #[error("server replied with SOCKS version 0x{0:02x}")]
    VersionMismatch(u8),

    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    #[error("server requires credentials but none are configured")]
    CredentialsRequired,

    #[error("username/password rejected by server")]
    AuthRejected,

    #[error("CONNECT failed: {0}")]
    ConnectFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
