//! Sans-IO gRPC client channel.
//!
//! Wraps `http2::ClientConnection`. A unary call emits the request header
//! list, queues the enveloped body (drained as flow control credit
//! allows), and tracks per-call state until the status trailer arrives.

use std::collections::HashMap;

use bytes::Bytes;

use http2::{
    ClientConnection, ClientEvent, ConnectionError, ConnectionSettings, ConnectionState,
    HeaderField, StreamId,
};

use crate::frame::{self, MessageDecoder};
use crate::metadata::{Metadata, percent_decode};
use crate::status::{Code, Status};

/// Per-call activity, yielded by `poll()`.
#[derive(Debug)]
pub enum CallEvent {
    /// Initial response metadata.
    Headers(Metadata),
    /// A complete response message (envelope stripped).
    Message(Bytes),
    /// The call finished. Terminal: the stream is gone after this.
    Complete(Status),
}

/// In-flight call state.
#[derive(Debug, Default)]
pub struct CallState {
    /// Initial response metadata, once seen.
    headers_seen: bool,
    /// Reassembles enveloped response messages.
    decoder: MessageDecoder,
    /// Outbound body not yet cleared through flow control.
    pending_body: Bytes,
    offset: usize,
    /// Whether END_STREAM should ride the final DATA frame (no trailing
    /// metadata follows).
    end_after_body: bool,
    /// Trailing metadata to emit after the body, if any.
    trailing: Option<Vec<HeaderField>>,
}

/// Sans-IO client channel.
pub struct Channel {
    conn: ClientConnection,
    authority: String,
    calls: HashMap<u32, CallState>,
    events: Vec<(StreamId, CallEvent)>,
}

impl Channel {
    /// Create a channel. The connection preface and SETTINGS are queued
    /// immediately; flush `pending_send()` to the transport.
    pub fn new(settings: ConnectionSettings, authority: impl Into<String>) -> Self {
        Self {
            conn: ClientConnection::new(settings),
            authority: authority.into(),
            calls: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.conn.is_ready()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.state() == ConnectionState::Closed
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Feed bytes from the transport, then advance queued request bodies
    /// (WINDOW_UPDATE credit may have arrived).
    pub fn feed(&mut self, data: &[u8]) {
        self.conn.feed(data);
        self.translate_events();
        self.pump();
    }

    /// Start a unary call: headers, enveloped body, optional trailing
    /// metadata. Returns the stream id.
    pub fn unary(
        &mut self,
        service: &str,
        method: &str,
        message: &[u8],
        metadata: &Metadata,
    ) -> Result<StreamId, ConnectionError> {
        self.call(service, method, message, metadata, None)
    }

    /// Start a unary call that also carries trailing metadata after the
    /// body. END_STREAM then rides the trailer block, not the DATA frame.
    pub fn call(
        &mut self,
        service: &str,
        method: &str,
        message: &[u8],
        metadata: &Metadata,
        trailing: Option<&Metadata>,
    ) -> Result<StreamId, ConnectionError> {
        let path = format!("/{}/{}", service, method);
        let mut headers = vec![
            HeaderField::new(b":method".to_vec(), b"POST".to_vec()),
            HeaderField::new(b":scheme".to_vec(), b"http".to_vec()),
            HeaderField::new(b":path".to_vec(), path.into_bytes()),
            HeaderField::new(b":authority".to_vec(), self.authority.clone().into_bytes()),
            HeaderField::new(b"content-type".to_vec(), b"application/grpc".to_vec()),
            HeaderField::new(b"te".to_vec(), b"trailers".to_vec()),
        ];
        for (key, value) in metadata.iter() {
            // Pseudo-headers and the fixed fields above are ours.
            if !key.starts_with(':') && key != "content-type" && key != "te" {
                headers.push(HeaderField::new(
                    key.as_bytes().to_vec(),
                    value.as_bytes().to_vec(),
                ));
            }
        }

        let stream_id = self.conn.start_request(&headers, false)?;

        let trailing = trailing.map(|t| {
            t.iter()
                .map(|(k, v)| HeaderField::new(k.as_bytes().to_vec(), v.as_bytes().to_vec()))
                .collect::<Vec<_>>()
        });

        self.calls.insert(
            stream_id.value(),
            CallState {
                pending_body: frame::encode_message(message),
                end_after_body: trailing.is_none(),
                trailing,
                ..CallState::default()
            },
        );
        self.pump();

        Ok(stream_id)
    }

    /// Abandon a call.
    pub fn cancel(&mut self, stream_id: StreamId) {
        self.conn.reset_stream(stream_id, http2::ErrorCode::Cancel);
        self.calls.remove(&stream_id.value());
    }

    /// Drain per-call events.
    pub fn poll(&mut self) -> Vec<(StreamId, CallEvent)> {
        self.translate_events();
        std::mem::take(&mut self.events)
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

    /// Push queued request bodies as far as flow control allows.
    fn pump(&mut self) {
        let stream_ids: Vec<u32> = self
            .calls
            .iter()
            .filter(|(_, call)| call.offset < call.pending_body.len() || call.trailing.is_some())
            .map(|(id, _)| *id)
            .collect();

        for id in stream_ids {
            let stream_id = StreamId::new(id);
            let Some(call) = self.calls.get_mut(&id) else {
                continue;
            };

            while call.offset < call.pending_body.len() {
                let end_stream = call.end_after_body;
                match self
                    .conn
                    .send_data(stream_id, &call.pending_body[call.offset..], end_stream)
                {
                    Ok(0) => break, // window exhausted
                    Ok(sent) => call.offset += sent,
                    Err(_) => break, // stream gone; trailers/reset will resolve the call
                }
            }

            if call.offset == call.pending_body.len()
                && let Some(trailing) = call.trailing.take()
            {
                // A failed send means the stream is gone; the reset event
                // resolves the call.
                let _ = self.conn.send_trailers(stream_id, &trailing);
            }
        }
    }

    fn translate_events(&mut self) {
        for event in self.conn.poll_events() {
            match event {
                ClientEvent::Ready => {}
                ClientEvent::Headers {
                    stream_id,
                    headers,
                    end_stream,
                } => {
                    let Some(call) = self.calls.get_mut(&stream_id.value()) else {
                        continue;
                    };
                    let metadata = fields_to_metadata(&headers);
                    let is_trailers = call.headers_seen || !metadata.contains_key(":status");

                    if is_trailers || end_stream {
                        // Trailers, or a trailers-only response carrying
                        // the status in its first (and only) block.
                        if !call.headers_seen {
                            call.headers_seen = true;
                            self.events
                                .push((stream_id, CallEvent::Headers(metadata.clone())));
                        }
                        let status = extract_status(&metadata);
                        self.events.push((stream_id, CallEvent::Complete(status)));
                        self.calls.remove(&stream_id.value());
                    } else {
                        call.headers_seen = true;
                        self.events.push((stream_id, CallEvent::Headers(metadata)));
                    }
                }
                ClientEvent::Data {
                    stream_id,
                    data,
                    end_stream,
                } => {
                    let Some(call) = self.calls.get_mut(&stream_id.value()) else {
                        continue;
                    };
                    call.decoder.feed(&data);
                    while let Ok(Some((message, _compressed))) = call.decoder.decode() {
                        self.events.push((stream_id, CallEvent::Message(message)));
                    }
                    if end_stream {
                        // Stream ended without trailers; treat as success.
                        self.events
                            .push((stream_id, CallEvent::Complete(Status::ok())));
                        self.calls.remove(&stream_id.value());
                    }
                }
                ClientEvent::StreamReset {
                    stream_id,
                    error_code,
                } => {
                    if self.calls.remove(&stream_id.value()).is_some() {
                        self.events.push((
                            stream_id,
                            CallEvent::Complete(Status::unavailable(format!(
                                "stream reset: {}",
                                error_code
                            ))),
                        ));
                    }
                }
                ClientEvent::GoAway { .. } => {
                    // Existing streams may still complete; new requests are
                    // refused by the connection state.
                }
                ClientEvent::Error(e) => {
                    // Connection is dead; fail every outstanding call.
                    let message = format!("connection error: {}", e);
                    for (id, _) in self.calls.drain() {
                        self.events.push((
                            StreamId::new(id),
                            CallEvent::Complete(Status::unavailable(message.clone())),
                        ));
                    }
                }
            }
        }
    }
}

fn fields_to_metadata(fields: &[HeaderField]) -> Metadata {
    let mut metadata = Metadata::new();
    for field in fields {
        metadata.insert(
            String::from_utf8_lossy(&field.name).into_owned(),
            String::from_utf8_lossy(&field.value).into_owned(),
        );
    }
    metadata
}

/// Pull `grpc-status` / `grpc-message` out of trailer metadata. A missing
/// status is treated as OK.
fn extract_status(metadata: &Metadata) -> Status {
    let code = metadata
        .get("grpc-status")
        .and_then(|value| value.parse::<u32>().ok())
        .map(Code::from_u32)
        .unwrap_or(Code::Ok);
    match metadata.get("grpc-message") {
        Some(message) if !message.is_empty() => Status::new(code, percent_decode(message)),
        _ => Status::from_code(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_status_defaults_to_ok() {
        assert!(extract_status(&Metadata::new()).is_ok());
    }

    #[test]
    fn extract_status_with_message() {
        let mut metadata = Metadata::new();
        metadata.insert("grpc-status", "7");
        metadata.insert("grpc-message", "no%20access");
        let status = extract_status(&metadata);
        assert_eq!(status.code(), Code::PermissionDenied);
        assert_eq!(status.message(), Some("no access"));
    }

    #[test]
    fn extract_status_bare_code() {
        let mut metadata = Metadata::new();
        metadata.insert("grpc-status", "5");
        let status = extract_status(&metadata);
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().is_none());
    }

    #[test]
    fn channel_queues_preface() {
        let mut channel = Channel::new(ConnectionSettings::client_default(), "localhost:50051");
        assert!(
            channel
                .pending_send()
                .starts_with(http2::CONNECTION_PREFACE)
        );
        let _ = channel.take_pending_send();
        assert!(!channel.has_pending_send());
    }

    #[test]
    fn unary_before_settings_is_queued_but_legal() {
        // The transport allows optimistic requests right after the preface.
        let mut channel = Channel::new(ConnectionSettings::client_default(), "localhost:50051");
        let _ = channel.take_pending_send();
        let stream_id = channel
            .unary("test.Echo", "Echo", b"hi", &Metadata::new())
            .unwrap();
        assert_eq!(stream_id.value(), 1);
        assert!(channel.has_pending_send());
    }
}
