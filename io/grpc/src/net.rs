//! Blocking TCP runtime.
//!
//! One reader thread per accepted connection drives the sans-IO server;
//! each completed request runs its handler chain on a worker thread so a
//! slow handler never stalls the reader. The connection state (codec
//! tables, write buffer) lives behind one mutex and socket writes behind
//! another, so whole frames are atomic but streams are not ordered
//! relative to each other.
//!
//! The client side mirrors this: one reader thread per connection, and
//! `unary()` parks on a condvar until its stream completes.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use http2::StreamId;

use crate::client::{CallEvent, Channel};
use crate::config::{ClientConfig, ServerConfig};
use crate::error::RpcError;
use crate::metadata::Metadata;
use crate::server::{GrpcServerEvent, Server};
use crate::service::{Context, Handler, Router, RpcHandler};
use crate::status::Status;

const READ_BUF_SIZE: usize = 16 * 1024;

/// A chain link that logs each completed call.
pub struct AccessLogHandler {
    next: Arc<dyn Handler>,
}

impl AccessLogHandler {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for AccessLogHandler {
    fn next(&self) -> Option<&Arc<dyn Handler>> {
        Some(&self.next)
    }

    fn call(&self, ctx: &mut Context) {
        self.call_next(ctx);
        debug!(path = %ctx.path, status = %ctx.status.code(), "rpc complete");
    }
}

/// Serve a router on a listener, blocking forever.
///
/// The default chain is access logging in front of RPC dispatch; use
/// `serve_with_handler` to supply a custom chain head.
pub fn serve(
    listener: TcpListener,
    router: Arc<Router>,
    config: &ServerConfig,
) -> std::io::Result<()> {
    let chain: Arc<dyn Handler> =
        Arc::new(AccessLogHandler::new(Arc::new(RpcHandler::new(router))));
    serve_with_handler(listener, chain, config)
}

/// Serve with a caller-built handler chain.
pub fn serve_with_handler(
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    config: &ServerConfig,
) -> std::io::Result<()> {
    debug!(addr = ?listener.local_addr(), "server listening");
    for incoming in listener.incoming() {
        let socket = incoming?;
        let handler = Arc::clone(&handler);
        let config = config.clone();
        thread::spawn(move || {
            let peer = socket.peer_addr().ok();
            debug!(?peer, "connection accepted");
            if let Err(e) = run_connection(socket, handler, &config) {
                debug!(?peer, error = %e, "connection ended");
            } else {
                debug!(?peer, "connection closed");
            }
        });
    }
    Ok(())
}

/// The per-connection read loop. Returns on EOF, socket error, or a
/// connection-fatal protocol error.
fn run_connection(
    socket: TcpStream,
    handler: Arc<dyn Handler>,
    config: &ServerConfig,
) -> std::io::Result<()> {
    let writer = Arc::new(Mutex::new(socket.try_clone()?));
    let server = Arc::new(Mutex::new(Server::new(config.http2.server_settings())));
    let mut reader = socket;
    let mut buf = [0u8; READ_BUF_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(()); // EOF ends the loop normally
        }

        let events = {
            let mut server = server.lock().unwrap();
            server.feed(&buf[..n]);
            server.poll_events()
        };
        flush_server(&server, &writer)?;

        for event in events {
            match event {
                GrpcServerEvent::Ready => {}
                GrpcServerEvent::Request(request) => {
                    let server = Arc::clone(&server);
                    let writer = Arc::clone(&writer);
                    let handler = Arc::clone(&handler);
                    thread::spawn(move || {
                        let stream_id = request.stream_id;
                        let mut ctx =
                            Context::new(request.path, request.metadata, request.body);
                        handler.call(&mut ctx);

                        // The connection may be gone by the time the
                        // handler returns; the response is then dropped.
                        let result = {
                            let mut server = server.lock().unwrap();
                            server.send_response(stream_id, ctx.status, &ctx.response_body)
                        };
                        if let Err(e) = result {
                            debug!(stream = %stream_id, error = %e, "response dropped");
                            return;
                        }
                        if let Err(e) = flush_server(&server, &writer) {
                            debug!(stream = %stream_id, error = %e, "write failed");
                        }
                    });
                }
                GrpcServerEvent::StreamReset { stream_id } => {
                    debug!(stream = %stream_id, "stream reset by client");
                }
                GrpcServerEvent::GoAway => {
                    debug!("client going away");
                }
                GrpcServerEvent::Error(e) => {
                    warn!(error = %e, "connection error");
                    return Ok(());
                }
            }
        }

        if server.lock().unwrap().is_closed() {
            return Ok(());
        }
    }
}

/// Move queued bytes from the connection to the socket. Lock order is
/// always connection before socket.
fn flush_server(server: &Mutex<Server>, writer: &Mutex<TcpStream>) -> std::io::Result<()> {
    let data = server.lock().unwrap().take_pending_send();
    write_all(writer, &data)
}

fn write_all(writer: &Mutex<TcpStream>, data: &[u8]) -> std::io::Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let mut socket = writer.lock().unwrap();
    socket.write_all(data)?;
    socket.flush()
}

/// A completed unary call.
#[derive(Debug)]
pub struct Response {
    /// Initial response metadata.
    pub metadata: Metadata,
    /// Response message, envelope already stripped.
    pub message: Bytes,
    /// Final status from the trailers.
    pub status: Status,
}

/// One in-flight call slot on the blocking client.
#[derive(Debug, Default)]
struct CallSlot {
    metadata: Metadata,
    message: BytesMut,
    status: Option<Status>,
}

struct ClientInner {
    slots: HashMap<u32, CallSlot>,
    closed: bool,
}

/// Shared state between caller threads and the connection's reader thread.
struct ClientShared {
    channel: Mutex<Channel>,
    writer: Mutex<TcpStream>,
    inner: Mutex<ClientInner>,
    completion: Condvar,
}

/// Blocking gRPC client. Connects lazily on the first call; `unary()`
/// blocks until the response trailer arrives.
pub struct Client {
    addr: String,
    config: ClientConfig,
    shared: Mutex<Option<Arc<ClientShared>>>,
}

impl Client {
    /// Create a client for `addr` (host:port). No connection is made yet.
    pub fn new(addr: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
            shared: Mutex::new(None),
        }
    }

    /// Issue a unary call and block until it completes.
    pub fn unary(
        &self,
        service: &str,
        method: &str,
        message: &[u8],
        metadata: &Metadata,
    ) -> Result<Response, RpcError> {
        self.call(service, method, message, metadata, None)
    }

    /// Issue a unary call carrying trailing metadata after the body.
    pub fn call(
        &self,
        service: &str,
        method: &str,
        message: &[u8],
        metadata: &Metadata,
        trailing: Option<&Metadata>,
    ) -> Result<Response, RpcError> {
        let shared = self.connect()?;

        let stream_id = {
            let mut channel = shared.channel.lock().unwrap();
            let stream_id = channel.call(service, method, message, metadata, trailing)?;
            let pending = channel.take_pending_send();
            drop(channel);
            write_all(&shared.writer, &pending)?;
            stream_id
        };

        // Park until the reader thread resolves the call.
        let mut inner = shared.inner.lock().unwrap();
        loop {
            if let Some(slot) = inner.slots.get(&stream_id.value())
                && slot.status.is_some()
            {
                let slot = inner.slots.remove(&stream_id.value()).unwrap();
                return Ok(Response {
                    metadata: slot.metadata,
                    message: slot.message.freeze(),
                    status: slot.status.unwrap(),
                });
            }
            if inner.closed {
                return Err(RpcError::ConnectionClosed);
            }
            inner = shared.completion.wait(inner).unwrap();
        }
    }

    /// Connect if not already connected (double-checked under the lock).
    fn connect(&self) -> Result<Arc<ClientShared>, RpcError> {
        {
            let shared = self.shared.lock().unwrap();
            if let Some(shared) = shared.as_ref()
                && !shared.inner.lock().unwrap().closed
            {
                return Ok(Arc::clone(shared));
            }
        }

        let mut guard = self.shared.lock().unwrap();
        // Another caller may have connected while we waited on the lock.
        if let Some(shared) = guard.as_ref()
            && !shared.inner.lock().unwrap().closed
        {
            return Ok(Arc::clone(shared));
        }

        let socket = TcpStream::connect(&self.addr)?;
        socket.set_nodelay(true)?;
        let authority = self
            .config
            .authority
            .clone()
            .unwrap_or_else(|| self.addr.clone());

        let mut channel = Channel::new(self.config.http2.client_settings(), authority);
        let preface = channel.take_pending_send();

        let shared = Arc::new(ClientShared {
            channel: Mutex::new(channel),
            writer: Mutex::new(socket.try_clone()?),
            inner: Mutex::new(ClientInner {
                slots: HashMap::new(),
                closed: false,
            }),
            completion: Condvar::new(),
        });

        write_all(&shared.writer, &preface)?;

        let reader_shared = Arc::clone(&shared);
        thread::spawn(move || reader_loop(socket, reader_shared));

        *guard = Some(Arc::clone(&shared));
        Ok(shared)
    }
}

/// The client connection's read loop: feed the channel, apply call events
/// to slots, flush whatever the channel queued (acks, window updates,
/// bodies unblocked by new credit), and wake waiting callers.
fn reader_loop(mut socket: TcpStream, shared: Arc<ClientShared>) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        let n = match socket.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        let (events, pending) = {
            let mut channel = shared.channel.lock().unwrap();
            channel.feed(&buf[..n]);
            (channel.poll(), channel.take_pending_send())
        };
        if write_all(&shared.writer, &pending).is_err() {
            break;
        }

        if !events.is_empty() {
            let mut inner = shared.inner.lock().unwrap();
            for (stream_id, event) in events {
                apply_call_event(&mut inner, stream_id, event);
            }
            drop(inner);
            shared.completion.notify_all();
        }
    }

    let mut inner = shared.inner.lock().unwrap();
    inner.closed = true;
    drop(inner);
    shared.completion.notify_all();
}

fn apply_call_event(inner: &mut ClientInner, stream_id: StreamId, event: CallEvent) {
    let slot = inner.slots.entry(stream_id.value()).or_default();
    match event {
        CallEvent::Headers(metadata) => {
            for (key, value) in metadata.iter() {
                slot.metadata.insert(key, value);
            }
        }
        CallEvent::Message(message) => slot.message.extend_from_slice(&message),
        CallEvent::Complete(status) => slot.status = Some(status),
    }
}
