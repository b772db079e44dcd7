//! grpc - gRPC framing and unary RPC on top of the `http2` crate.
//!
//! The crate has two levels:
//!
//! - A sans-IO core: `Server` and `Channel` wrap the `http2` connection
//!   state machines and speak the gRPC conventions (length-prefixed
//!   messages, `application/grpc` content type, `grpc-status` trailers).
//!   Message payloads are opaque byte strings; serialization belongs to
//!   the caller or a generated layer above this crate.
//! - A blocking TCP runtime in `net`: a thread-per-connection server that
//!   runs a handler chain for each request, and a client whose `unary()`
//!   blocks until the response trailer arrives.
//!
//! # Message framing
//!
//! Every message travels in a 5-byte envelope:
//! - 1 byte: compression flag (always 0 on emit; tolerated on ingest)
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload

mod client;
pub mod config;
mod error;
mod frame;
pub mod logging;
mod metadata;
pub mod net;
mod server;
mod service;
mod status;

pub use client::{CallEvent, CallState, Channel};
pub use config::{ClientConfig, Http2Options, LogFormat, LoggingConfig, ServerConfig};
pub use error::RpcError;
pub use frame::{MessageDecoder, decode_message, encode_message};
pub use metadata::Metadata;
pub use net::{Client, Response};
pub use server::{GrpcServerEvent, Request, Server};
pub use service::{Context, Handler, Router, RpcHandler, Service};
pub use status::{Code, Status};

// Re-export the transport types callers commonly touch.
pub use http2::{ConnectionSettings, HeaderField, StreamId};
