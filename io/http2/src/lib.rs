//! http2 - sans-IO HTTP/2 framing layer for RPC transports.
//!
//! This crate implements the HTTP/2 wire protocol without performing any I/O
//! of its own. Bytes read from a socket are pushed in with `feed()`, outgoing
//! bytes are pulled from `pending_send()`, and protocol activity surfaces as
//! events. The caller decides how the byte pipe is driven (blocking threads,
//! an event loop, a test harness feeding buffers directly).
//!
//! # Architecture
//!
//! - `frame`: the 9-byte frame header plus ten typed payload variants
//! - `hpack`: HPACK header compression (static/dynamic tables, Huffman)
//! - `connection`: per-stream state machines, flow control, and the
//!   server/client connection state machines
//!
//! ```text
//!   socket bytes
//!        |
//!   +----v-----------------+
//!   | ServerConnection /   |  frames + HPACK + streams
//!   | ClientConnection     |  ServerEvent / ClientEvent out
//!   +----------------------+
//! ```

pub mod connection;
pub mod frame;
pub mod hpack;

pub use connection::{
    ClientConnection, ClientEvent, ConnectionError, ConnectionSettings, ConnectionState,
    FlowControl, FrameKind, ServerConnection, ServerEvent, Stream, StreamError, StreamState,
};
pub use frame::{
    CONNECTION_PREFACE, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_FRAME_SIZE, ErrorCode, FRAME_HEADER_SIZE, Frame, FrameDecoder, FrameEncoder,
    FrameError, FrameType, Priority, Settings, StreamId,
};
pub use hpack::{HeaderField, HpackDecoder, HpackEncoder, HpackError, Indexing};
