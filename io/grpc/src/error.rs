//! Errors surfaced by the RPC runtime.

/// Failures below the application level. RPC outcomes (including failed
/// calls) are `Status` values, not errors.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Connection(#[from] http2::ConnectionError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("invalid configuration: {0}")]
    Config(String),
}
