//! Server-side HTTP/2 connection.
//!
//! Verifies the client preface, exchanges SETTINGS, and runs the frame
//! loop: each frame is dispatched to its stream's state machine, control
//! frames are answered automatically (PING ack, SETTINGS ack, WINDOW_UPDATE
//! replenishment), and completed activity surfaces as `ServerEvent`s.
//! Streams that reach `Closed` are removed from the table.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use super::stream::FrameKind;
use super::{
    ConnectionError, ConnectionSettings, ConnectionState, FlowControl, PendingBlock, Stream,
};
use crate::frame::{
    self, ErrorCode, Frame, FrameDecoder, FrameEncoder, Priority, Settings, StreamId,
};
use crate::hpack::{HeaderField, HpackDecoder, HpackEncoder, Indexing};

/// Events produced by the server connection.
#[derive(Debug)]
pub enum ServerEvent {
    /// Settings exchange complete; requests may now arrive.
    Ready,
    /// A client opened a new request stream (initial header block done).
    Request {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// Body bytes arrived on a request stream.
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    /// A trailer header block arrived on an existing stream.
    Trailers {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// The stream is gone, either by client RST_STREAM or because we reset
    /// it after a state violation.
    StreamReset {
        stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// Client announced shutdown.
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// Connection-fatal error. The connection is `Closed`; drop the socket.
    Error(ConnectionError),
}

/// Sans-IO server connection: `feed()` bytes in, `pending_send()` bytes
/// out, `poll_events()` for activity.
pub struct ServerConnection {
    state: ConnectionState,
    local_settings: ConnectionSettings,
    remote_settings: Settings,
    got_preface: bool,
    got_settings: bool,
    frame_encoder: FrameEncoder,
    frame_decoder: FrameDecoder,
    hpack_encoder: HpackEncoder,
    hpack_decoder: HpackDecoder,
    streams: HashMap<u32, Stream>,
    /// Connection-scope inbound window.
    recv_flow: FlowControl,
    /// Connection-scope outbound credit.
    send_window: i64,
    read_buf: BytesMut,
    write_buf: BytesMut,
    events: Vec<ServerEvent>,
    /// Highest client stream id seen; new streams must exceed it.
    last_client_stream_id: u32,
    /// Header block being reassembled. While set, only CONTINUATION frames
    /// for its stream are legal.
    continuation: Option<PendingBlock>,
}

impl ServerConnection {
    /// Create a server connection awaiting the client preface.
    pub fn new(settings: ConnectionSettings) -> Self {
        let mut frame_decoder = FrameDecoder::new();
        frame_decoder.set_max_frame_size(settings.max_frame_size);
        Self {
            state: ConnectionState::WaitingPreface,
            local_settings: settings,
            remote_settings: Settings::default(),
            got_preface: false,
            got_settings: false,
            frame_encoder: FrameEncoder::new(),
            frame_decoder,
            hpack_encoder: HpackEncoder::new(),
            hpack_decoder: HpackDecoder::with_table_size(settings.header_table_size as usize),
            streams: HashMap::new(),
            recv_flow: FlowControl::default(),
            send_window: i64::from(frame::DEFAULT_INITIAL_WINDOW_SIZE),
            read_buf: BytesMut::with_capacity(16_384),
            write_buf: BytesMut::with_capacity(16_384),
            events: Vec::new(),
            last_client_stream_id: 0,
            continuation: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Feed bytes read from the client and process whatever completes.
    pub fn feed(&mut self, data: &[u8]) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.read_buf.extend_from_slice(data);
        self.process();
    }

    /// Drain pending events.
    pub fn poll_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Bytes queued for the client.
    pub fn pending_send(&self) -> &[u8] {
        &self.write_buf
    }

    /// Mark `n` bytes of `pending_send()` as written.
    pub fn advance_send(&mut self, n: usize) {
        let _ = self.write_buf.split_to(n);
    }

    /// Take all queued bytes.
    pub fn take_pending_send(&mut self) -> Bytes {
        self.write_buf.split().freeze()
    }

    pub fn has_pending_send(&self) -> bool {
        !self.write_buf.is_empty()
    }

    // -- Frame loop --

    fn process(&mut self) {
        if !self.got_preface {
            if self.read_buf.len() < frame::CONNECTION_PREFACE.len() {
                return;
            }
            if &self.read_buf[..frame::CONNECTION_PREFACE.len()] != frame::CONNECTION_PREFACE {
                self.fatal(ConnectionError::InvalidPreface);
                return;
            }
            let _ = self.read_buf.split_to(frame::CONNECTION_PREFACE.len());
            self.got_preface = true;
            self.state = ConnectionState::WaitingSettings;

            // Our SETTINGS must be the first frame we send.
            let frame = Frame::Settings {
                ack: false,
                settings: self.local_settings.to_settings(),
            };
            let _ = self.frame_encoder.encode(&frame, &mut self.write_buf);

            // Grow the connection-scope receive window up front if our
            // stream windows are larger than the protocol default.
            let initial = self.local_settings.initial_window_size;
            if initial > frame::DEFAULT_INITIAL_WINDOW_SIZE {
                self.frame_encoder.encode_window_update(
                    StreamId::CONNECTION,
                    initial - frame::DEFAULT_INITIAL_WINDOW_SIZE,
                    &mut self.write_buf,
                );
                self.recv_flow = FlowControl::new(initial);
            }
        }

        while self.state != ConnectionState::Closed {
            match self.frame_decoder.decode(&mut self.read_buf) {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => break,
                Err(e) => {
                    self.fatal(e.into());
                    break;
                }
            }
        }
    }

    fn fatal(&mut self, error: ConnectionError) {
        self.events.push(ServerEvent::Error(error));
        self.state = ConnectionState::Closed;
    }

    fn handle_frame(&mut self, frame: Frame) {
        // While a header block is being reassembled no other frame may
        // interleave on the connection.
        if let Some(pending) = &self.continuation {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == pending.stream_id => {}
                _ => {
                    self.fatal(ConnectionError::Protocol(
                        "expected CONTINUATION frame".into(),
                    ));
                    return;
                }
            }
        }

        match frame {
            Frame::Settings { ack, settings } => self.handle_settings(ack, settings),
            Frame::Ping { ack, data } => {
                if !ack {
                    self.frame_encoder.encode_ping_ack(data, &mut self.write_buf);
                }
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                ..
            } => {
                self.state = ConnectionState::Draining;
                self.events.push(ServerEvent::GoAway {
                    last_stream_id,
                    error_code: ErrorCode::from_u32(error_code),
                });
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                if stream_id.is_connection_level() {
                    self.send_window += i64::from(increment);
                } else if let Some(stream) = self.streams.get_mut(&stream_id.value()) {
                    stream.credit_send(increment);
                }
                // Updates for unknown streams are stale; ignore.
            }
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                header_block,
                priority: _,
            } => self.handle_headers(stream_id, end_stream, end_headers, &header_block),
            Frame::Continuation {
                stream_id,
                end_headers,
                header_block,
            } => self.handle_continuation(stream_id, end_headers, &header_block),
            Frame::Data {
                stream_id,
                end_stream,
                data,
            } => self.handle_data(stream_id, end_stream, data),
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                self.streams.remove(&stream_id.value());
                self.events.push(ServerEvent::StreamReset {
                    stream_id,
                    error_code: ErrorCode::from_u32(error_code),
                });
            }
            // Priority scheduling is out of scope; the frame is tolerated.
            Frame::Priority { .. } => {}
            Frame::PushPromise { .. } => {
                self.fatal(ConnectionError::Protocol(
                    "PUSH_PROMISE from client".into(),
                ));
            }
            // Unknown frame types are ignored.
            Frame::Unknown { .. } => {}
        }
    }

    fn handle_settings(&mut self, ack: bool, settings: Settings) {
        if ack {
            return;
        }

        let delta = i64::from(settings.initial_window_size)
            - i64::from(self.remote_settings.initial_window_size);
        if delta != 0 {
            for stream in self.streams.values_mut() {
                stream.adjust_send(delta);
            }
        }

        self.hpack_encoder
            .set_max_table_size(settings.header_table_size as usize);
        self.frame_encoder.set_max_frame_size(settings.max_frame_size);
        self.remote_settings = settings;

        self.frame_encoder.encode_settings_ack(&mut self.write_buf);

        if !self.got_settings {
            self.got_settings = true;
            self.state = ConnectionState::Open;
            self.events.push(ServerEvent::Ready);
        }
    }

    fn handle_headers(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        end_headers: bool,
        header_block: &[u8],
    ) {
        if !stream_id.is_client_initiated() {
            self.fatal(ConnectionError::Protocol(format!(
                "client opened even stream {}",
                stream_id
            )));
            return;
        }

        let is_new = !self.streams.contains_key(&stream_id.value());
        if is_new {
            if stream_id.value() <= self.last_client_stream_id {
                self.fatal(ConnectionError::Protocol(format!(
                    "stream id {} not greater than {}",
                    stream_id, self.last_client_stream_id
                )));
                return;
            }
            self.last_client_stream_id = stream_id.value();
            self.streams.insert(
                stream_id.value(),
                Stream::new(
                    stream_id,
                    self.remote_settings.initial_window_size,
                    self.local_settings.initial_window_size,
                ),
            );
        }

        if end_headers {
            self.finish_header_block(stream_id, header_block, end_stream);
        } else {
            self.continuation = Some(PendingBlock {
                stream_id,
                end_stream,
                block: BytesMut::from(header_block),
            });
        }
    }

    fn handle_continuation(&mut self, _stream_id: StreamId, end_headers: bool, fragment: &[u8]) {
        // The interleave check in handle_frame guarantees a matching
        // pending block exists.
        let Some(pending) = self.continuation.as_mut() else {
            self.fatal(ConnectionError::Protocol(
                "CONTINUATION without preceding HEADERS".into(),
            ));
            return;
        };
        pending.block.extend_from_slice(fragment);

        if end_headers {
            let pending = self.continuation.take().unwrap();
            self.finish_header_block(pending.stream_id, &pending.block, pending.end_stream);
        }
    }

    /// Decode a completed header block and surface it as a Request (first
    /// block on the stream) or Trailers (later blocks). Decoding happens
    /// unconditionally so the compression state stays in sync with the
    /// peer even when the stream itself is gone.
    fn finish_header_block(&mut self, stream_id: StreamId, block: &[u8], end_stream: bool) {
        let fields = match self.hpack_decoder.decode(block) {
            Ok(fields) => fields,
            Err(e) => {
                self.fatal(e.into());
                return;
            }
        };

        let Some(stream) = self.streams.get_mut(&stream_id.value()) else {
            return;
        };
        if stream.apply_recv(FrameKind::Headers, end_stream).is_err() {
            self.reset_after_violation(stream_id);
            return;
        }
        let first = !stream.got_headers();
        stream.push_headers(&fields);

        if first {
            self.events.push(ServerEvent::Request {
                stream_id,
                headers: fields,
                end_stream,
            });
        } else {
            self.events.push(ServerEvent::Trailers {
                stream_id,
                headers: fields,
                end_stream,
            });
        }
        self.drop_if_closed(stream_id);
    }

    fn handle_data(&mut self, stream_id: StreamId, end_stream: bool, data: Bytes) {
        let len = data.len() as u32;

        // Connection-scope accounting happens whether or not the stream is
        // known; the bytes crossed the pipe either way.
        self.recv_flow.consume(len);
        if self.recv_flow.available() < 0 {
            self.fatal(ConnectionError::FlowControlViolation);
            return;
        }

        let Some(stream) = self.streams.get_mut(&stream_id.value()) else {
            self.frame_encoder.encode_rst_stream(
                stream_id,
                ErrorCode::StreamClosed.to_u32(),
                &mut self.write_buf,
            );
            self.replenish_connection();
            return;
        };

        if stream.apply_recv(FrameKind::Data, end_stream).is_err() {
            self.reset_after_violation(stream_id);
            self.replenish_connection();
            return;
        }

        stream.recv_window().consume(len);
        if stream.recv_window().available() < 0 {
            self.streams.remove(&stream_id.value());
            self.frame_encoder.encode_rst_stream(
                stream_id,
                ErrorCode::FlowControlError.to_u32(),
                &mut self.write_buf,
            );
            self.events.push(ServerEvent::StreamReset {
                stream_id,
                error_code: ErrorCode::FlowControlError,
            });
            self.replenish_connection();
            return;
        }

        stream.push_data(&data);

        // Stream-scope replenishment, while the peer can still send.
        if !end_stream && stream.recv_window().needs_update() {
            let increment = stream.recv_window().take_update();
            if increment > 0 {
                self.frame_encoder
                    .encode_window_update(stream_id, increment, &mut self.write_buf);
            }
        }
        self.replenish_connection();

        self.events.push(ServerEvent::Data {
            stream_id,
            data,
            end_stream,
        });
        self.drop_if_closed(stream_id);
    }

    fn replenish_connection(&mut self) {
        if self.recv_flow.needs_update() {
            let increment = self.recv_flow.take_update();
            if increment > 0 {
                self.frame_encoder.encode_window_update(
                    StreamId::CONNECTION,
                    increment,
                    &mut self.write_buf,
                );
            }
        }
    }

    /// A stream state violation: answer RST_STREAM, drop the stream, and
    /// let the rest of the connection live.
    fn reset_after_violation(&mut self, stream_id: StreamId) {
        self.streams.remove(&stream_id.value());
        self.frame_encoder.encode_rst_stream(
            stream_id,
            ErrorCode::ProtocolError.to_u32(),
            &mut self.write_buf,
        );
        self.events.push(ServerEvent::StreamReset {
            stream_id,
            error_code: ErrorCode::ProtocolError,
        });
    }

    // -- Sending --

    /// Send a header block on a stream.
    pub fn send_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[HeaderField],
        end_stream: bool,
    ) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        let stream = self
            .streams
            .get_mut(&stream_id.value())
            .ok_or(ConnectionError::StreamNotFound(stream_id))?;
        stream
            .apply_send(FrameKind::Headers, end_stream)
            .map_err(|error| ConnectionError::Stream { stream_id, error })?;

        let mut header_block = Vec::new();
        self.hpack_encoder.encode(headers, &mut header_block);

        let frame = Frame::Headers {
            stream_id,
            end_stream,
            end_headers: true,
            priority: None::<Priority>,
            header_block: Bytes::from(header_block),
        };
        self.frame_encoder.encode(&frame, &mut self.write_buf)?;

        self.drop_if_closed(stream_id);
        Ok(())
    }

    /// Send body bytes on a stream, clipped to the available flow control
    /// credit and chunked to the peer's maximum frame size.
    ///
    /// Returns the number of bytes queued; 0 means the windows are
    /// exhausted and the caller should retry after WINDOW_UPDATE credit
    /// arrives. END_STREAM is set only when the final byte went out.
    pub fn send_data(
        &mut self,
        stream_id: StreamId,
        data: &[u8],
        end_stream: bool,
    ) -> Result<usize, ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        let stream = self
            .streams
            .get_mut(&stream_id.value())
            .ok_or(ConnectionError::StreamNotFound(stream_id))?;

        let available = self.send_window.min(stream.send_window()).max(0) as usize;
        let to_send = available.min(data.len());
        let is_end = end_stream && to_send == data.len();

        stream
            .apply_send(FrameKind::Data, is_end)
            .map_err(|error| ConnectionError::Stream { stream_id, error })?;

        if to_send == 0 && !data.is_empty() {
            return Ok(0);
        }

        stream.consume_send(to_send as u32);
        self.send_window -= to_send as i64;

        let max_frame = self.frame_encoder.max_frame_size() as usize;
        let mut offset = 0;
        loop {
            let end = (offset + max_frame).min(to_send);
            let last = end == to_send;
            let frame = Frame::Data {
                stream_id,
                end_stream: is_end && last,
                data: Bytes::copy_from_slice(&data[offset..end]),
            };
            self.frame_encoder.encode(&frame, &mut self.write_buf)?;
            if last {
                break;
            }
            offset = end;
        }

        self.drop_if_closed(stream_id);
        Ok(to_send)
    }

    /// Send a header block with per-field indexing control. Fields are
    /// emitted in the order given; the caller is responsible for placing
    /// pseudo-headers first.
    pub fn send_headers_with(
        &mut self,
        stream_id: StreamId,
        headers: &[(HeaderField, Indexing)],
        end_stream: bool,
    ) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        let stream = self
            .streams
            .get_mut(&stream_id.value())
            .ok_or(ConnectionError::StreamNotFound(stream_id))?;
        stream
            .apply_send(FrameKind::Headers, end_stream)
            .map_err(|error| ConnectionError::Stream { stream_id, error })?;

        let mut header_block = Vec::new();
        for (field, indexing) in headers {
            self.hpack_encoder
                .encode_field(field, *indexing, &mut header_block);
        }

        let frame = Frame::Headers {
            stream_id,
            end_stream,
            end_headers: true,
            priority: None::<Priority>,
            header_block: Bytes::from(header_block),
        };
        self.frame_encoder.encode(&frame, &mut self.write_buf)?;

        self.drop_if_closed(stream_id);
        Ok(())
    }

    /// Send the trailer header block, half-closing our side.
    pub fn send_trailers(
        &mut self,
        stream_id: StreamId,
        trailers: &[HeaderField],
    ) -> Result<(), ConnectionError> {
        self.send_headers(stream_id, trailers, true)
    }

    /// Send GOAWAY and stop accepting new streams.
    pub fn send_goaway(&mut self, error_code: ErrorCode, debug_data: &[u8]) {
        let frame = Frame::GoAway {
            last_stream_id: StreamId::new(self.last_client_stream_id),
            error_code: error_code.to_u32(),
            debug_data: Bytes::copy_from_slice(debug_data),
        };
        let _ = self.frame_encoder.encode(&frame, &mut self.write_buf);
        self.state = ConnectionState::Draining;
    }

    /// Reset a stream and drop it from the table.
    pub fn reset_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        self.frame_encoder.encode_rst_stream(
            stream_id,
            error_code.to_u32(),
            &mut self.write_buf,
        );
        self.streams.remove(&stream_id.value());
    }

    /// Access a stream (mainly for inspection in tests and dispatchers).
    pub fn stream(&self, stream_id: StreamId) -> Option<&Stream> {
        self.streams.get(&stream_id.value())
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn drop_if_closed(&mut self, stream_id: StreamId) {
        if self
            .streams
            .get(&stream_id.value())
            .is_some_and(|s| s.is_closed())
        {
            self.streams.remove(&stream_id.value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::StreamState;

    fn encode_frame(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode(frame, &mut buf).unwrap();
        buf
    }

    fn headers_frame(stream_id: u32, block: &[u8], end_stream: bool) -> BytesMut {
        encode_frame(&Frame::Headers {
            stream_id: StreamId::new(stream_id),
            end_stream,
            end_headers: true,
            priority: None,
            header_block: Bytes::copy_from_slice(block),
        })
    }

    fn data_frame(stream_id: u32, data: &[u8], end_stream: bool) -> BytesMut {
        encode_frame(&Frame::Data {
            stream_id: StreamId::new(stream_id),
            end_stream,
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Drive a fresh connection through preface + settings exchange.
    fn ready_server() -> ServerConnection {
        let mut conn = ServerConnection::new(ConnectionSettings::default());
        conn.feed(frame::CONNECTION_PREFACE);
        conn.feed(&encode_frame(&Frame::Settings {
            ack: false,
            settings: Settings::default(),
        }));
        assert!(conn.is_ready());
        let _ = conn.take_pending_send();
        let _ = conn.poll_events();
        conn
    }

    #[test]
    fn preface_then_settings_opens_connection() {
        let mut conn = ServerConnection::new(ConnectionSettings::default());
        assert_eq!(conn.state(), ConnectionState::WaitingPreface);

        conn.feed(frame::CONNECTION_PREFACE);
        assert_eq!(conn.state(), ConnectionState::WaitingSettings);
        assert!(conn.has_pending_send()); // our SETTINGS

        conn.feed(&encode_frame(&Frame::Settings {
            ack: false,
            settings: Settings::default(),
        }));
        assert!(conn.is_ready());
        assert!(
            conn.poll_events()
                .iter()
                .any(|e| matches!(e, ServerEvent::Ready))
        );
    }

    #[test]
    fn partial_preface_waits() {
        let mut conn = ServerConnection::new(ConnectionSettings::default());
        conn.feed(&frame::CONNECTION_PREFACE[..10]);
        assert_eq!(conn.state(), ConnectionState::WaitingPreface);
        assert!(!conn.has_pending_send());
    }

    #[test]
    fn bad_preface_closes_silently() {
        let mut conn = ServerConnection::new(ConnectionSettings::default());
        conn.feed(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(conn.is_closed());
        assert!(!conn.has_pending_send());
        assert!(
            conn.poll_events()
                .iter()
                .any(|e| matches!(e, ServerEvent::Error(ConnectionError::InvalidPreface)))
        );
    }

    #[test]
    fn ping_answered_with_ack() {
        let mut conn = ready_server();
        conn.feed(&encode_frame(&Frame::Ping {
            ack: false,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
        }));

        let mut out = BytesMut::from(&conn.take_pending_send()[..]);
        match FrameDecoder::new().decode(&mut out).unwrap().unwrap() {
            Frame::Ping { ack, data } => {
                assert!(ack);
                assert_eq!(data, [1, 2, 3, 4, 5, 6, 7, 8]);
            }
            other => panic!("expected Ping ACK, got {:?}", other),
        }
    }

    #[test]
    fn ping_ack_not_reanswered() {
        let mut conn = ready_server();
        conn.feed(&encode_frame(&Frame::Ping {
            ack: true,
            data: [0; 8],
        }));
        assert!(!conn.has_pending_send());
    }

    #[test]
    fn settings_acked_and_applied() {
        let mut conn = ready_server();
        let peer = Settings {
            initial_window_size: 32_768,
            header_table_size: 2_048,
            ..Settings::default()
        };
        conn.feed(&encode_frame(&Frame::Settings {
            ack: false,
            settings: peer,
        }));

        let mut out = BytesMut::from(&conn.take_pending_send()[..]);
        match FrameDecoder::new().decode(&mut out).unwrap().unwrap() {
            Frame::Settings { ack, .. } => assert!(ack),
            other => panic!("expected SETTINGS ACK, got {:?}", other),
        }
        assert_eq!(conn.remote_settings.initial_window_size, 32_768);
    }

    #[test]
    fn settings_window_delta_adjusts_open_streams() {
        let mut conn = ready_server();
        conn.feed(&headers_frame(1, &[0x83], false)); // :method POST
        let _ = conn.poll_events();

        conn.feed(&encode_frame(&Frame::Settings {
            ack: false,
            settings: Settings {
                initial_window_size: 70_000,
                ..Settings::default()
            },
        }));
        let stream = conn.stream(StreamId::new(1)).unwrap();
        assert_eq!(stream.send_window(), 70_000);
    }

    #[test]
    fn request_and_data_events() {
        let mut conn = ready_server();
        conn.feed(&headers_frame(1, &[0x83, 0x86, 0x84], false));
        conn.feed(&data_frame(1, b"hello", true));

        let events = conn.poll_events();
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Request { stream_id, end_stream: false, .. } if stream_id.value() == 1
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Data { data, end_stream: true, .. } if &data[..] == b"hello"
        )));

        // END_STREAM received: stream is half-closed remote.
        assert_eq!(
            conn.stream(StreamId::new(1)).unwrap().state(),
            StreamState::HalfClosedRemote
        );
    }

    #[test]
    fn trailer_block_on_existing_stream() {
        let mut conn = ready_server();
        conn.feed(&headers_frame(1, &[0x83], false));
        conn.feed(&data_frame(1, b"body", false));
        let _ = conn.poll_events();

        conn.feed(&headers_frame(1, &[0x89], true)); // :status 204 stands in for a trailer
        let events = conn.poll_events();
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Trailers { end_stream: true, .. }
        )));
    }

    #[test]
    fn continuation_reassembles_header_block() {
        let mut conn = ready_server();
        conn.feed(&encode_frame(&Frame::Headers {
            stream_id: StreamId::new(1),
            end_stream: true,
            end_headers: false,
            priority: None,
            header_block: Bytes::from_static(&[0x83]),
        }));
        assert!(conn.poll_events().is_empty());

        conn.feed(&encode_frame(&Frame::Continuation {
            stream_id: StreamId::new(1),
            end_headers: true,
            header_block: Bytes::from_static(&[0x84]),
        }));
        let events = conn.poll_events();
        match events.as_slice() {
            [ServerEvent::Request {
                headers,
                end_stream: true,
                ..
            }] => {
                assert_eq!(headers.len(), 2);
                assert_eq!(headers[0].name, b":method");
                assert_eq!(headers[1].name, b":path");
            }
            other => panic!("expected one Request, got {:?}", other),
        }
    }

    #[test]
    fn interleaved_frame_during_continuation_is_fatal() {
        let mut conn = ready_server();
        conn.feed(&encode_frame(&Frame::Headers {
            stream_id: StreamId::new(1),
            end_stream: false,
            end_headers: false,
            priority: None,
            header_block: Bytes::from_static(&[0x83]),
        }));
        conn.feed(&encode_frame(&Frame::Ping {
            ack: false,
            data: [0; 8],
        }));
        assert!(conn.is_closed());
    }

    #[test]
    fn even_stream_id_is_fatal() {
        let mut conn = ready_server();
        conn.feed(&headers_frame(2, &[0x83], false));
        assert!(conn.is_closed());
    }

    #[test]
    fn non_increasing_stream_id_is_fatal() {
        let mut conn = ready_server();
        conn.feed(&headers_frame(5, &[0x83], false));
        let _ = conn.poll_events();
        conn.feed(&headers_frame(3, &[0x83], false));
        assert!(conn.is_closed());
    }

    #[test]
    fn data_after_end_stream_tolerated() {
        // The transition table treats DATA in half-closed (remote) as a
        // no-op rather than a violation; only Idle and Closed are errors.
        let mut conn = ready_server();
        conn.feed(&headers_frame(1, &[0x83], true));
        let _ = conn.poll_events();
        let _ = conn.take_pending_send();

        conn.feed(&data_frame(1, b"late", false));
        assert!(!conn.is_closed(), "connection must survive");
        assert_eq!(
            conn.stream(StreamId::new(1)).unwrap().state(),
            StreamState::HalfClosedRemote
        );
    }

    #[test]
    fn data_for_unknown_stream_answered_with_rst() {
        let mut conn = ready_server();
        conn.feed(&data_frame(7, b"stray", false));
        assert!(!conn.is_closed());

        let mut out = BytesMut::from(&conn.take_pending_send()[..]);
        match FrameDecoder::new().decode(&mut out).unwrap().unwrap() {
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                assert_eq!(stream_id.value(), 7);
                assert_eq!(error_code, ErrorCode::StreamClosed.to_u32());
            }
            other => panic!("expected RST_STREAM, got {:?}", other),
        }
    }

    #[test]
    fn flow_control_replenished_after_40000_bytes() {
        let mut conn = ready_server();
        conn.feed(&headers_frame(1, &[0x83], false));
        let _ = conn.poll_events();
        let _ = conn.take_pending_send();

        // 40000 bytes in chunks no larger than the frame limit.
        for _ in 0..4 {
            conn.feed(&data_frame(1, &vec![0u8; 10_000], false));
        }

        let mut stream_credit = 0u64;
        let mut conn_credit = 0u64;
        let mut out = BytesMut::from(&conn.take_pending_send()[..]);
        let decoder = FrameDecoder::new();
        while let Some(frame) = decoder.decode(&mut out).unwrap() {
            if let Frame::WindowUpdate {
                stream_id,
                increment,
            } = frame
            {
                if stream_id.is_connection_level() {
                    conn_credit += u64::from(increment);
                } else {
                    stream_credit += u64::from(increment);
                }
            }
        }
        // 65535 - 40000 = 25535 < 32767, so both scopes replenish with at
        // least the consumed amount.
        assert!(stream_credit >= 40_000, "stream credit {}", stream_credit);
        assert!(conn_credit >= 40_000, "connection credit {}", conn_credit);
    }

    #[test]
    fn rst_stream_removes_stream() {
        let mut conn = ready_server();
        conn.feed(&headers_frame(1, &[0x83], false));
        assert_eq!(conn.stream_count(), 1);

        conn.feed(&encode_frame(&Frame::RstStream {
            stream_id: StreamId::new(1),
            error_code: ErrorCode::Cancel.to_u32(),
        }));
        assert_eq!(conn.stream_count(), 0);
        assert!(conn.poll_events().iter().any(|e| matches!(
            e,
            ServerEvent::StreamReset { error_code: ErrorCode::Cancel, .. }
        )));
    }

    #[test]
    fn push_promise_from_client_is_fatal() {
        let mut conn = ready_server();
        conn.feed(&encode_frame(&Frame::PushPromise {
            stream_id: StreamId::new(1),
            end_headers: true,
            promised_stream_id: StreamId::new(2),
            header_block: Bytes::new(),
        }));
        assert!(conn.is_closed());
    }

    #[test]
    fn unknown_frame_type_ignored() {
        let mut conn = ready_server();
        conn.feed(&encode_frame(&Frame::Unknown {
            frame_type: 0xfe,
            flags: 0,
            stream_id: StreamId::new(0),
            payload: Bytes::from_static(b"xyz"),
        }));
        assert!(!conn.is_closed());
        assert!(conn.poll_events().is_empty());
    }

    #[test]
    fn goaway_moves_to_draining() {
        let mut conn = ready_server();
        conn.feed(&encode_frame(&Frame::GoAway {
            last_stream_id: StreamId::new(0),
            error_code: 0,
            debug_data: Bytes::new(),
        }));
        assert_eq!(conn.state(), ConnectionState::Draining);
        assert!(
            conn.poll_events()
                .iter()
                .any(|e| matches!(e, ServerEvent::GoAway { .. }))
        );
    }

    #[test]
    fn response_flow_full_cycle() {
        let mut conn = ready_server();
        conn.feed(&headers_frame(1, &[0x83], true));
        let _ = conn.poll_events();
        let _ = conn.take_pending_send();

        let stream_id = StreamId::new(1);
        conn.send_headers(
            stream_id,
            &[HeaderField::new(b":status".to_vec(), b"200".to_vec())],
            false,
        )
        .unwrap();
        let sent = conn.send_data(stream_id, b"response body", false).unwrap();
        assert_eq!(sent, 13);
        conn.send_trailers(
            stream_id,
            &[HeaderField::new(b"grpc-status".to_vec(), b"0".to_vec())],
        )
        .unwrap();

        // Trailer END_STREAM closed the stream; it is gone from the table.
        assert_eq!(conn.stream_count(), 0);

        // Emitted order: HEADERS, DATA, HEADERS(trailers).
        let mut out = BytesMut::from(&conn.take_pending_send()[..]);
        let decoder = FrameDecoder::new();
        let mut kinds = Vec::new();
        while let Some(frame) = decoder.decode(&mut out).unwrap() {
            kinds.push(match frame {
                Frame::Headers { end_stream, .. } => ("HEADERS", end_stream),
                Frame::Data { end_stream, .. } => ("DATA", end_stream),
                other => panic!("unexpected frame {:?}", other),
            });
        }
        assert_eq!(
            kinds,
            [("HEADERS", false), ("DATA", false), ("HEADERS", true)]
        );
    }

    #[test]
    fn send_on_unknown_stream_fails() {
        let mut conn = ready_server();
        let result = conn.send_headers(
            StreamId::new(99),
            &[HeaderField::new(b":status".to_vec(), b"200".to_vec())],
            false,
        );
        assert!(matches!(result, Err(ConnectionError::StreamNotFound(_))));
    }

    #[test]
    fn send_data_clipped_by_flow_control() {
        let mut conn = ready_server();
        conn.feed(&headers_frame(1, &[0x83], true));
        let _ = conn.take_pending_send();

        let stream_id = StreamId::new(1);
        conn.send_headers(
            stream_id,
            &[HeaderField::new(b":status".to_vec(), b"200".to_vec())],
            false,
        )
        .unwrap();

        // Default send window is 65535; a 100k body is clipped.
        let body = vec![0u8; 100_000];
        let sent = conn.send_data(stream_id, &body, true).unwrap();
        assert_eq!(sent, 65_535);

        // Stream is not closed: END_STREAM has not gone out yet.
        assert!(conn.stream(stream_id).is_some());

        // Credit arrives; the remainder drains and closes the stream.
        conn.feed(&encode_frame(&Frame::WindowUpdate {
            stream_id: StreamId::CONNECTION,
            increment: 100_000,
        }));
        conn.feed(&encode_frame(&Frame::WindowUpdate {
            stream_id,
            increment: 100_000,
        }));
        let sent2 = conn.send_data(stream_id, &body[sent..], true).unwrap();
        assert_eq!(sent + sent2, 100_000);
        assert_eq!(conn.stream_count(), 0);
    }

    #[test]
    fn send_data_chunks_to_max_frame_size() {
        let mut conn = ready_server();
        conn.feed(&headers_frame(1, &[0x83], true));
        let _ = conn.take_pending_send();

        let stream_id = StreamId::new(1);
        conn.send_headers(
            stream_id,
            &[HeaderField::new(b":status".to_vec(), b"200".to_vec())],
            false,
        )
        .unwrap();
        let _ = conn.take_pending_send();

        let body = vec![0u8; 40_000];
        let sent = conn.send_data(stream_id, &body, false).unwrap();
        assert_eq!(sent, 40_000);

        let mut out = BytesMut::from(&conn.take_pending_send()[..]);
        let decoder = FrameDecoder::new();
        let mut sizes = Vec::new();
        while let Some(frame) = decoder.decode(&mut out).unwrap() {
            match frame {
                Frame::Data { data, .. } => sizes.push(data.len()),
                other => panic!("unexpected frame {:?}", other),
            }
        }
        assert_eq!(sizes, [16_384, 16_384, 7_232]);
    }
}
