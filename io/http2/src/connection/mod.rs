//! HTTP/2 connection state machines.
//!
//! One connection exists per byte pipe. A connection owns the frame codec,
//! one HPACK encoder and one HPACK decoder (never shared across
//! connections), the stream table, and connection-scope flow control in
//! both directions. `ServerConnection` and `ClientConnection` share this
//! machinery and differ in preface handling and stream-id allocation.

mod client;
mod flow_control;
mod server;
mod settings;
mod stream;

pub use client::{ClientConnection, ClientEvent};
pub use flow_control::FlowControl;
pub use server::{ServerConnection, ServerEvent};
pub use settings::ConnectionSettings;
pub use stream::{FrameKind, Stream, StreamError, StreamState};

use bytes::BytesMut;

use crate::frame::{FrameError, StreamId};
use crate::hpack::HpackError;

/// A header block being reassembled across HEADERS + CONTINUATION frames.
/// At most one exists per connection: no other frame may interleave until
/// END_HEADERS.
pub(crate) struct PendingBlock {
    pub(crate) stream_id: StreamId,
    pub(crate) end_stream: bool,
    pub(crate) block: BytesMut,
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Server side: waiting for the 24-byte client preface.
    WaitingPreface,
    /// Preface done (or not required); waiting for the peer's SETTINGS.
    WaitingSettings,
    /// Settings exchanged; streams may be opened.
    Open,
    /// GOAWAY sent or received; existing streams drain, no new ones.
    Draining,
    /// Connection is dead. No frames are accepted or emitted.
    Closed,
}

/// Connection-fatal errors. Any of these tears the connection down; the
/// caller closes the underlying pipe.
#[derive(Debug)]
pub enum ConnectionError {
    /// Frame-layer parse or encode failure.
    Frame(FrameError),
    /// Header-block decode failure; compression state is unrecoverable.
    Hpack(HpackError),
    /// The client preface did not match the expected 24 bytes.
    InvalidPreface,
    /// Peer violated framing rules (interleaved CONTINUATION, even client
    /// stream id, unexpected PUSH_PROMISE, ...).
    Protocol(String),
    /// Peer overdrew a flow control window.
    FlowControlViolation,
    /// A send referenced a stream that is not in the table.
    StreamNotFound(StreamId),
    /// A send violated the stream's state machine.
    Stream {
        stream_id: StreamId,
        error: StreamError,
    },
    /// The connection is closed or draining.
    Closed,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Frame(e) => write!(f, "frame error: {}", e),
            ConnectionError::Hpack(e) => write!(f, "header compression error: {}", e),
            ConnectionError::InvalidPreface => write!(f, "invalid connection preface"),
            ConnectionError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            ConnectionError::FlowControlViolation => write!(f, "flow control violation"),
            ConnectionError::StreamNotFound(id) => write!(f, "stream {} not found", id),
            ConnectionError::Stream { stream_id, error } => {
                write!(f, "stream {}: {}", stream_id, error)
            }
            ConnectionError::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<FrameError> for ConnectionError {
    fn from(e: FrameError) -> Self {
        ConnectionError::Frame(e)
    }
}

impl From<HpackError> for ConnectionError {
    fn from(e: HpackError) -> Self {
        ConnectionError::Hpack(e)
    }
}
