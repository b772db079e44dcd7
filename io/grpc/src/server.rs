//! Sans-IO gRPC server.
//!
//! Wraps `http2::ServerConnection` and assembles complete unary requests:
//! request headers arrive first, body bytes accumulate until the client
//! half-closes, then a `Request` event fires. Responses are queued and
//! pumped out as flow control credit allows, always in the order HEADERS,
//! DATA, trailer HEADERS.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use http2::{
    ConnectionError, ConnectionSettings, ConnectionState, HeaderField, Indexing, ServerConnection,
    ServerEvent, StreamId,
};

use crate::metadata::{Metadata, percent_encode};
use crate::status::Status;

/// A complete unary request.
#[derive(Debug)]
pub struct Request {
    pub stream_id: StreamId,
    /// Request path (`/service/method`).
    pub path: String,
    /// Request metadata, including pseudo-headers other than `:path`.
    pub metadata: Metadata,
    /// Raw body, still envelope-framed.
    pub body: Bytes,
}

/// Events produced by the server.
#[derive(Debug)]
pub enum GrpcServerEvent {
    /// Connection is ready to accept requests.
    Ready,
    /// A complete unary request arrived.
    Request(Request),
    /// The client abandoned a stream.
    StreamReset { stream_id: StreamId },
    /// The client is going away.
    GoAway,
    /// Connection-fatal error; drop the socket.
    Error(ConnectionError),
}

/// In-progress inbound request.
struct RequestState {
    path: String,
    metadata: Metadata,
    body: BytesMut,
}

/// A queued response making its way out through flow control.
struct PendingResponse {
    stream_id: StreamId,
    status: Status,
    body: Bytes,
    offset: usize,
    headers_sent: bool,
}

/// Sans-IO gRPC server connection.
pub struct Server {
    conn: ServerConnection,
    requests: HashMap<u32, RequestState>,
    outbound: Vec<PendingResponse>,
    /// Errors raised while pumping queued responses, surfaced on the next
    /// `poll_events`.
    pump_errors: Vec<ConnectionError>,
}

impl Server {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            conn: ServerConnection::new(settings),
            requests: HashMap::new(),
            outbound: Vec::new(),
            pump_errors: Vec::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.conn.is_ready()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.state() == ConnectionState::Closed
    }

    /// Feed bytes from the client. Queued responses are pumped afterwards
    /// in case WINDOW_UPDATE credit arrived.
    pub fn feed(&mut self, data: &[u8]) {
        self.conn.feed(data);
        if let Err(e) = self.pump() {
            self.pump_errors.push(e);
        }
    }

    /// Translate transport events into completed requests.
    pub fn poll_events(&mut self) -> Vec<GrpcServerEvent> {
        let mut out: Vec<GrpcServerEvent> = self
            .pump_errors
            .drain(..)
            .map(GrpcServerEvent::Error)
            .collect();
        for event in self.conn.poll_events() {
            match event {
                ServerEvent::Ready => out.push(GrpcServerEvent::Ready),
                ServerEvent::Request {
                    stream_id,
                    headers,
                    end_stream,
                } => {
                    let (path, metadata) = split_request_headers(&headers);
                    let Some(path) = path else {
                        // No :path, nothing to dispatch to.
                        let _ = self.send_error(stream_id, Status::invalid_argument("missing :path"));
                        continue;
                    };
                    self.requests.insert(
                        stream_id.value(),
                        RequestState {
                            path,
                            metadata,
                            body: BytesMut::new(),
                        },
                    );
                    if end_stream {
                        self.complete_request(stream_id, &mut out);
                    }
                }
                ServerEvent::Data {
                    stream_id,
                    data,
                    end_stream,
                } => {
                    if let Some(state) = self.requests.get_mut(&stream_id.value()) {
                        state.body.extend_from_slice(&data);
                        if end_stream {
                            self.complete_request(stream_id, &mut out);
                        }
                    }
                }
                ServerEvent::Trailers {
                    stream_id,
                    headers,
                    end_stream,
                } => {
                    if let Some(state) = self.requests.get_mut(&stream_id.value()) {
                        for field in &headers {
                            state.metadata.insert(
                                String::from_utf8_lossy(&field.name).into_owned(),
                                String::from_utf8_lossy(&field.value).into_owned(),
                            );
                        }
                        if end_stream {
                            self.complete_request(stream_id, &mut out);
                        }
                    }
                }
                ServerEvent::StreamReset { stream_id, .. } => {
                    self.requests.remove(&stream_id.value());
                    self.outbound.retain(|r| r.stream_id != stream_id);
                    out.push(GrpcServerEvent::StreamReset { stream_id });
                }
                ServerEvent::GoAway { .. } => {
                    out.push(GrpcServerEvent::GoAway);
                }
                ServerEvent::Error(e) => {
                    self.requests.clear();
                    self.outbound.clear();
                    out.push(GrpcServerEvent::Error(e));
                }
            }
        }
        out
    }

    fn complete_request(&mut self, stream_id: StreamId, out: &mut Vec<GrpcServerEvent>) {
        if let Some(state) = self.requests.remove(&stream_id.value()) {
            out.push(GrpcServerEvent::Request(Request {
                stream_id,
                path: state.path,
                metadata: state.metadata,
                body: state.body.freeze(),
            }));
        }
    }

    /// Queue a unary response: HEADERS, the enveloped body as DATA, then
    /// the status trailers. `body` must already be envelope-framed.
    pub fn send_response(
        &mut self,
        stream_id: StreamId,
        status: Status,
        body: &[u8],
    ) -> Result<(), ConnectionError> {
        self.outbound.push(PendingResponse {
            stream_id,
            status,
            body: Bytes::copy_from_slice(body),
            offset: 0,
            headers_sent: false,
        });
        self.pump()
    }

    /// A trailers-only response: status in the initial header block, no
    /// body. Used when a request cannot be dispatched at all.
    pub fn send_error(
        &mut self,
        stream_id: StreamId,
        status: Status,
    ) -> Result<(), ConnectionError> {
        let mut headers = vec![
            (
                HeaderField::new(b":status".to_vec(), b"200".to_vec()),
                Indexing::Always,
            ),
            (
                HeaderField::new(b"content-type".to_vec(), b"application/grpc".to_vec()),
                Indexing::Always,
            ),
        ];
        append_status_trailers(&mut headers, &status);
        self.conn.send_headers_with(stream_id, &headers, true)
    }

    /// Advance queued responses as far as flow control allows.
    pub fn pump(&mut self) -> Result<(), ConnectionError> {
        let mut pending = std::mem::take(&mut self.outbound);
        let mut result = Ok(());

        pending.retain_mut(|response| {
            match Self::pump_one(&mut self.conn, response) {
                Ok(done) => !done,
                Err(ConnectionError::StreamNotFound(_)) => false, // reset underneath us
                Err(e) => {
                    result = Err(e);
                    false
                }
            }
        });

        self.outbound = pending;
        result
    }

    /// Returns Ok(true) once the response is fully sent.
    fn pump_one(
        conn: &mut ServerConnection,
        response: &mut PendingResponse,
    ) -> Result<bool, ConnectionError> {
        if !response.headers_sent {
            let headers = [
                HeaderField::new(b":status".to_vec(), b"200".to_vec()),
                HeaderField::new(b"content-type".to_vec(), b"application/grpc".to_vec()),
            ];
            conn.send_headers(response.stream_id, &headers, false)?;
            response.headers_sent = true;
        }

        while response.offset < response.body.len() {
            let sent = conn.send_data(
                response.stream_id,
                &response.body[response.offset..],
                false,
            )?;
            if sent == 0 {
                return Ok(false); // window exhausted, retry on next feed
            }
            response.offset += sent;
        }

        let mut trailers = Vec::with_capacity(2);
        append_status_trailers(&mut trailers, &response.status);
        conn.send_headers_with(response.stream_id, &trailers, true)?;
        Ok(true)
    }

    pub fn pending_send(&self) -> &[u8] {
        self.conn.pending_send()
    }

    pub fn advance_send(&mut self, n: usize) {
        self.conn.advance_send(n);
    }

    pub fn take_pending_send(&mut self) -> Bytes {
        self.conn.take_pending_send()
    }

    pub fn has_pending_send(&self) -> bool {
        self.conn.has_pending_send()
    }

    /// The underlying transport connection.
    pub fn connection(&self) -> &ServerConnection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut ServerConnection {
        &mut self.conn
    }
}

/// Pull `:path` out; everything else becomes metadata.
fn split_request_headers(headers: &[HeaderField]) -> (Option<String>, Metadata) {
    let mut path = None;
    let mut metadata = Metadata::new();
    for field in headers {
        let name = String::from_utf8_lossy(&field.name);
        let value = String::from_utf8_lossy(&field.value);
        if name == ":path" {
            path = Some(value.into_owned());
        } else {
            metadata.insert(name.into_owned(), value.into_owned());
        }
    }
    (path, metadata)
}

/// `grpc-status` and, for failures with a message, `grpc-message`.
///
/// Status codes repeat constantly and earn their dynamic-table slot; the
/// message is one-shot failure text and stays out of compression state.
fn append_status_trailers(headers: &mut Vec<(HeaderField, Indexing)>, status: &Status) {
    headers.push((
        HeaderField::new(
            b"grpc-status".to_vec(),
            status.code().as_u32().to_string().into_bytes(),
        ),
        Indexing::Always,
    ));
    if !status.is_ok()
        && let Some(message) = status.message()
    {
        headers.push((
            HeaderField::new(
                b"grpc-message".to_vec(),
                percent_encode(message).into_bytes(),
            ),
            Indexing::Never,
        ));
    }
}
