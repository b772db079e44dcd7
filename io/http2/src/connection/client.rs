//! Client-side HTTP/2 connection.
//!
//! The constructor queues the 24-byte preface and our SETTINGS; the peer's
//! first frame must be its SETTINGS. Stream ids are allocated odd,
//! starting at 1 with stride 2. Response activity surfaces as
//! `ClientEvent`s; header blocks are not split into response/trailer here
//! — the RPC layer decides based on what it has already seen.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use super::stream::FrameKind;
use super::{
    ConnectionError, ConnectionSettings, ConnectionState, FlowControl, PendingBlock, Stream,
};
use crate::frame::{
    self, ErrorCode, Frame, FrameDecoder, FrameEncoder, Priority, Settings, StreamId,
};
use crate::hpack::{HeaderField, HpackDecoder, HpackEncoder};

/// Events produced by the client connection.
#[derive(Debug)]
pub enum ClientEvent {
    /// Server SETTINGS received; requests may be sent.
    Ready,
    /// A complete header block arrived on a stream (response headers or
    /// trailers).
    Headers {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// Response body bytes arrived.
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    /// The server reset a stream.
    StreamReset {
        stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// Server announced shutdown.
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// Connection-fatal error. The connection is `Closed`; drop the socket.
    Error(ConnectionError),
}

/// Sans-IO client connection.
pub struct ClientConnection {
    state: ConnectionState,
    local_settings: ConnectionSettings,
    remote_settings: Settings,
    frame_encoder: FrameEncoder,
    frame_decoder: FrameDecoder,
    hpack_encoder: HpackEncoder,
    hpack_decoder: HpackDecoder,
    streams: HashMap<u32, Stream>,
    /// Next stream id to allocate. Odd, stride 2.
    next_stream_id: u32,
    recv_flow: FlowControl,
    send_window: i64,
    read_buf: BytesMut,
    write_buf: BytesMut,
    events: Vec<ClientEvent>,
    /// Header block being reassembled. While set, only CONTINUATION frames
    /// for its stream are legal.
    continuation: Option<PendingBlock>,
}

impl ClientConnection {
    /// Create a client connection. The preface and our SETTINGS are queued
    /// immediately; flush `pending_send()` before expecting any response.
    pub fn new(settings: ConnectionSettings) -> Self {
        let mut frame_decoder = FrameDecoder::new();
        frame_decoder.set_max_frame_size(settings.max_frame_size);

        let mut write_buf = BytesMut::with_capacity(16_384);
        write_buf.extend_from_slice(frame::CONNECTION_PREFACE);

        let frame_encoder = FrameEncoder::new();
        let _ = frame_encoder.encode(
            &Frame::Settings {
                ack: false,
                settings: settings.to_settings(),
            },
            &mut write_buf,
        );

        // Grow the connection-scope receive window up front if our stream
        // windows are larger than the protocol default.
        let mut recv_flow = FlowControl::default();
        let initial = settings.initial_window_size;
        if initial > frame::DEFAULT_INITIAL_WINDOW_SIZE {
            frame_encoder.encode_window_update(
                StreamId::CONNECTION,
                initial - frame::DEFAULT_INITIAL_WINDOW_SIZE,
                &mut write_buf,
            );
            recv_flow = FlowControl::new(initial);
        }

        Self {
            state: ConnectionState::WaitingSettings,
            local_settings: settings,
            remote_settings: Settings::default(),
            frame_encoder,
            frame_decoder,
            hpack_encoder: HpackEncoder::new(),
            hpack_decoder: HpackDecoder::with_table_size(settings.header_table_size as usize),
            streams: HashMap::new(),
            next_stream_id: 1,
            recv_flow,
            send_window: i64::from(frame::DEFAULT_INITIAL_WINDOW_SIZE),
            read_buf: BytesMut::with_capacity(16_384),
            write_buf,
            events: Vec::new(),
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

    /// Feed bytes read from the server and process whatever completes.
    pub fn feed(&mut self, data: &[u8]) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.read_buf.extend_from_slice(data);
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

    /// Drain pending events.
    pub fn poll_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn pending_send(&self) -> &[u8] {
        &self.write_buf
    }

    pub fn advance_send(&mut self, n: usize) {
        let _ = self.write_buf.split_to(n);
    }

    pub fn take_pending_send(&mut self) -> Bytes {
        self.write_buf.split().freeze()
    }

    pub fn has_pending_send(&self) -> bool {
        !self.write_buf.is_empty()
    }

    // -- Sending --

    /// Open a new stream carrying the request header list. Returns the
    /// allocated stream id.
    pub fn start_request(
        &mut self,
        headers: &[HeaderField],
        end_stream: bool,
    ) -> Result<StreamId, ConnectionError> {
        match self.state {
            ConnectionState::Closed | ConnectionState::Draining => {
                return Err(ConnectionError::Closed);
            }
            _ => {}
        }

        let stream_id = StreamId::new(self.next_stream_id);
        self.next_stream_id += 2;

        let mut stream = Stream::new(
            stream_id,
            self.remote_settings.initial_window_size,
            self.local_settings.initial_window_size,
        );
        stream
            .apply_send(FrameKind::Headers, end_stream)
            .map_err(|error| ConnectionError::Stream { stream_id, error })?;
        self.streams.insert(stream_id.value(), stream);

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

        Ok(stream_id)
    }

    /// Send body bytes, clipped to flow control credit and chunked to the
    /// peer's maximum frame size. Same contract as the server side:
    /// returns bytes queued, 0 when the windows are exhausted.
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

    /// Send a trailer header block, half-closing our side.
    pub fn send_trailers(
        &mut self,
        stream_id: StreamId,
        trailers: &[HeaderField],
    ) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        let stream = self
            .streams
            .get_mut(&stream_id.value())
            .ok_or(ConnectionError::StreamNotFound(stream_id))?;
        stream
            .apply_send(FrameKind::Headers, true)
            .map_err(|error| ConnectionError::Stream { stream_id, error })?;

        let mut header_block = Vec::new();
        self.hpack_encoder.encode(trailers, &mut header_block);
        let frame = Frame::Headers {
            stream_id,
            end_stream: true,
            end_headers: true,
            priority: None::<Priority>,
            header_block: Bytes::from(header_block),
        };
        self.frame_encoder.encode(&frame, &mut self.write_buf)?;

        self.drop_if_closed(stream_id);
        Ok(())
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

    /// Send GOAWAY; no further requests will be started.
    pub fn send_goaway(&mut self, error_code: ErrorCode) {
        let frame = Frame::GoAway {
            // Clients never accept server-initiated streams.
            last_stream_id: StreamId::CONNECTION,
            error_code: error_code.to_u32(),
            debug_data: Bytes::new(),
        };
        let _ = self.frame_encoder.encode(&frame, &mut self.write_buf);
        self.state = ConnectionState::Draining;
    }

    /// Send a PING probe.
    pub fn send_ping(&mut self, data: [u8; 8]) {
        let _ = self
            .frame_encoder
            .encode(&Frame::Ping { ack: false, data }, &mut self.write_buf);
    }

    pub fn stream(&self, stream_id: StreamId) -> Option<&Stream> {
        self.streams.get(&stream_id.value())
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    // -- Frame loop --

    fn fatal(&mut self, error: ConnectionError) {
        self.events.push(ClientEvent::Error(error));
        self.state = ConnectionState::Closed;
    }

    fn handle_frame(&mut self, frame: Frame) {
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
                self.events.push(ClientEvent::GoAway {
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
                self.events.push(ClientEvent::StreamReset {
                    stream_id,
                    error_code: ErrorCode::from_u32(error_code),
                });
            }
            Frame::Priority { .. } => {}
            Frame::PushPromise { .. } => {
                // We advertise ENABLE_PUSH=0; a push is a protocol error.
                self.fatal(ConnectionError::Protocol(
                    "PUSH_PROMISE with push disabled".into(),
                ));
            }
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

        if self.state == ConnectionState::WaitingSettings {
            self.state = ConnectionState::Open;
            self.events.push(ClientEvent::Ready);
        }
    }

    fn handle_headers(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        end_headers: bool,
        header_block: &[u8],
    ) {
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

    /// Decode a completed header block. Decoding happens unconditionally so
    /// the compression state stays in sync with the peer even when the
    /// stream itself is already gone.
    fn finish_header_block(&mut self, stream_id: StreamId, block: &[u8], end_stream: bool) {
        let fields = match self.hpack_decoder.decode(block) {
            Ok(fields) => fields,
            Err(e) => {
                self.fatal(e.into());
                return;
            }
        };

        let Some(stream) = self.streams.get_mut(&stream_id.value()) else {
            // Response for a stream we already dropped; stale, ignore.
            return;
        };
        if stream.apply_recv(FrameKind::Headers, end_stream).is_err() {
            self.reset_after_violation(stream_id);
            return;
        }
        stream.push_headers(&fields);

        self.events.push(ClientEvent::Headers {
            stream_id,
            headers: fields,
            end_stream,
        });
        self.drop_if_closed(stream_id);
    }

    fn handle_data(&mut self, stream_id: StreamId, end_stream: bool, data: Bytes) {
        let len = data.len() as u32;

        self.recv_flow.consume(len);
        if self.recv_flow.available() < 0 {
            self.fatal(ConnectionError::FlowControlViolation);
            return;
        }

        let Some(stream) = self.streams.get_mut(&stream_id.value()) else {
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
            self.events.push(ClientEvent::StreamReset {
                stream_id,
                error_code: ErrorCode::FlowControlError,
            });
            self.replenish_connection();
            return;
        }

        stream.push_data(&data);

        if !end_stream && stream.recv_window().needs_update() {
            let increment = stream.recv_window().take_update();
            if increment > 0 {
                self.frame_encoder
                    .encode_window_update(stream_id, increment, &mut self.write_buf);
            }
        }
        self.replenish_connection();

        self.events.push(ClientEvent::Data {
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

    fn reset_after_violation(&mut self, stream_id: StreamId) {
        self.streams.remove(&stream_id.value());
        self.frame_encoder.encode_rst_stream(
            stream_id,
            ErrorCode::ProtocolError.to_u32(),
            &mut self.write_buf,
        );
        self.events.push(ClientEvent::StreamReset {
            stream_id,
            error_code: ErrorCode::ProtocolError,
        });
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

    fn server_settings() -> BytesMut {
        encode_frame(&Frame::Settings {
            ack: false,
            settings: Settings::default(),
        })
    }

    fn ready_client() -> ClientConnection {
        let mut conn = ClientConnection::new(ConnectionSettings::client_default());
        let _ = conn.take_pending_send();
        conn.feed(&server_settings());
        assert!(conn.is_ready());
        let _ = conn.take_pending_send();
        let _ = conn.poll_events();
        conn
    }

    fn response_headers(stream_id: u32, end_stream: bool) -> BytesMut {
        let mut encoder = HpackEncoder::new();
        let mut block = Vec::new();
        encoder.encode(
            &[HeaderField::new(b":status".to_vec(), b"200".to_vec())],
            &mut block,
        );
        encode_frame(&Frame::Headers {
            stream_id: StreamId::new(stream_id),
            end_stream,
            end_headers: true,
            priority: None,
            header_block: Bytes::from(block),
        })
    }

    #[test]
    fn preface_and_settings_queued_on_construction() {
        let mut conn = ClientConnection::new(ConnectionSettings::client_default());
        let sent = conn.take_pending_send();
        assert!(sent.starts_with(frame::CONNECTION_PREFACE));

        let mut rest = BytesMut::from(&sent[frame::CONNECTION_PREFACE.len()..]);
        match FrameDecoder::new().decode(&mut rest).unwrap().unwrap() {
            Frame::Settings { ack, settings } => {
                assert!(!ack);
                assert!(!settings.enable_push);
                assert_eq!(settings.max_frame_size, 4 * 1024 * 1024);
                assert_eq!(settings.max_header_list_size, Some(4 * 1024 * 1024));
            }
            other => panic!("expected SETTINGS, got {:?}", other),
        }
    }

    #[test]
    fn server_settings_acked_and_ready() {
        let mut conn = ClientConnection::new(ConnectionSettings::client_default());
        let _ = conn.take_pending_send();
        assert_eq!(conn.state(), ConnectionState::WaitingSettings);

        conn.feed(&server_settings());
        assert!(conn.is_ready());
        assert!(
            conn.poll_events()
                .iter()
                .any(|e| matches!(e, ClientEvent::Ready))
        );

        let mut out = BytesMut::from(&conn.take_pending_send()[..]);
        match FrameDecoder::new().decode(&mut out).unwrap().unwrap() {
            Frame::Settings { ack, .. } => assert!(ack),
            other => panic!("expected SETTINGS ACK, got {:?}", other),
        }
    }

    #[test]
    fn stream_ids_are_odd_and_increasing() {
        let mut conn = ready_client();
        let headers = [HeaderField::new(b":method".to_vec(), b"POST".to_vec())];
        assert_eq!(conn.start_request(&headers, true).unwrap().value(), 1);
        assert_eq!(conn.start_request(&headers, true).unwrap().value(), 3);
        assert_eq!(conn.start_request(&headers, true).unwrap().value(), 5);
    }

    #[test]
    fn request_without_body_half_closes_local() {
        let mut conn = ready_client();
        let stream_id = conn
            .start_request(&[HeaderField::new(b":method".to_vec(), b"GET".to_vec())], true)
            .unwrap();
        assert_eq!(
            conn.stream(stream_id).unwrap().state(),
            StreamState::HalfClosedLocal
        );
    }

    #[test]
    fn response_events_close_the_stream() {
        let mut conn = ready_client();
        let stream_id = conn
            .start_request(&[HeaderField::new(b":method".to_vec(), b"POST".to_vec())], false)
            .unwrap();
        conn.send_data(stream_id, b"request body", true).unwrap();
        let _ = conn.take_pending_send();

        conn.feed(&response_headers(stream_id.value(), false));
        conn.feed(&encode_frame(&Frame::Data {
            stream_id,
            end_stream: false,
            data: Bytes::from_static(b"response"),
        }));

        // A trailer block carrying END_STREAM completes the exchange.
        let mut encoder = HpackEncoder::new();
        let mut block = Vec::new();
        encoder.encode(
            &[HeaderField::new(b"grpc-status".to_vec(), b"0".to_vec())],
            &mut block,
        );
        conn.feed(&encode_frame(&Frame::Headers {
            stream_id,
            end_stream: true,
            end_headers: true,
            priority: None,
            header_block: Bytes::from(block),
        }));

        let events = conn.poll_events();
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Headers { end_stream: false, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Data { data, .. } if &data[..] == b"response"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Headers { end_stream: true, headers, .. }
                if headers.iter().any(|h| h.name == b"grpc-status")
        )));

        // Both halves closed: the stream is out of the table.
        assert_eq!(conn.stream_count(), 0);
    }

    #[test]
    fn ping_answered() {
        let mut conn = ready_client();
        conn.feed(&encode_frame(&Frame::Ping {
            ack: false,
            data: [9; 8],
        }));
        let mut out = BytesMut::from(&conn.take_pending_send()[..]);
        match FrameDecoder::new().decode(&mut out).unwrap().unwrap() {
            Frame::Ping { ack, data } => {
                assert!(ack);
                assert_eq!(data, [9; 8]);
            }
            other => panic!("expected Ping ACK, got {:?}", other),
        }
    }

    #[test]
    fn window_update_credits_send_window() {
        let mut conn = ready_client();
        let stream_id = conn
            .start_request(&[HeaderField::new(b":method".to_vec(), b"POST".to_vec())], false)
            .unwrap();

        conn.feed(&encode_frame(&Frame::WindowUpdate {
            stream_id,
            increment: 10_000,
        }));
        assert_eq!(conn.stream(stream_id).unwrap().send_window(), 75_535);
    }

    #[test]
    fn send_blocked_at_zero_window_resumes_after_credit() {
        let mut conn = ready_client();
        let stream_id = conn
            .start_request(&[HeaderField::new(b":method".to_vec(), b"POST".to_vec())], false)
            .unwrap();
        let _ = conn.take_pending_send();

        let body = vec![1u8; 70_000];
        let sent = conn.send_data(stream_id, &body, true).unwrap();
        assert_eq!(sent, 65_535);

        // Window exhausted: nothing more goes out.
        assert_eq!(conn.send_data(stream_id, &body[sent..], true).unwrap(), 0);

        conn.feed(&encode_frame(&Frame::WindowUpdate {
            stream_id: StreamId::CONNECTION,
            increment: 10_000,
        }));
        conn.feed(&encode_frame(&Frame::WindowUpdate {
            stream_id,
            increment: 10_000,
        }));
        let sent2 = conn.send_data(stream_id, &body[sent..], true).unwrap();
        assert_eq!(sent + sent2, 70_000);
    }

    #[test]
    fn trailing_metadata_emitted_as_trailer_block() {
        let mut conn = ready_client();
        let stream_id = conn
            .start_request(&[HeaderField::new(b":method".to_vec(), b"POST".to_vec())], false)
            .unwrap();
        conn.send_data(stream_id, b"body", false).unwrap();
        conn.send_trailers(
            stream_id,
            &[HeaderField::new(b"x-checksum".to_vec(), b"abc".to_vec())],
        )
        .unwrap();
        assert_eq!(
            conn.stream(stream_id).unwrap().state(),
            StreamState::HalfClosedLocal
        );
    }

    #[test]
    fn goaway_prevents_new_requests() {
        let mut conn = ready_client();
        conn.feed(&encode_frame(&Frame::GoAway {
            last_stream_id: StreamId::new(0),
            error_code: 0,
            debug_data: Bytes::new(),
        }));
        assert_eq!(conn.state(), ConnectionState::Draining);
        assert!(matches!(
            conn.start_request(&[HeaderField::new(b":method".to_vec(), b"GET".to_vec())], true),
            Err(ConnectionError::Closed)
        ));
    }

    #[test]
    fn push_promise_is_fatal_with_push_disabled() {
        let mut conn = ready_client();
        let stream_id = conn
            .start_request(&[HeaderField::new(b":method".to_vec(), b"GET".to_vec())], true)
            .unwrap();
        conn.feed(&encode_frame(&Frame::PushPromise {
            stream_id,
            end_headers: true,
            promised_stream_id: StreamId::new(2),
            header_block: Bytes::new(),
        }));
        assert!(conn.is_closed());
    }

    #[test]
    fn stale_response_ignored() {
        let mut conn = ready_client();
        conn.feed(&response_headers(99, false));
        assert!(!conn.is_closed());
        assert!(conn.poll_events().is_empty());
    }
}
