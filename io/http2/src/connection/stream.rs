//! Per-stream state.
//!
//! A stream is one logical request/response exchange multiplexed over the
//! connection. Its lifecycle is a seven-state machine driven by sending and
//! receiving HEADERS and DATA frames with the END_STREAM flag; RST_STREAM
//! short-circuits to `Closed` from anywhere.

use bytes::{Bytes, BytesMut};

use super::flow_control::FlowControl;
use crate::frame::StreamId;
use crate::hpack::HeaderField;

/// Stream lifecycle states (RFC 7540 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No frames exchanged yet.
    Idle,
    /// Reserved by a PUSH_PROMISE we sent. Push is disabled, so this is
    /// bookkeeping only; the state is never entered.
    ReservedLocal,
    /// Reserved by a PUSH_PROMISE the peer sent. Never entered either.
    ReservedRemote,
    /// Both directions open.
    Open,
    /// We sent END_STREAM; only receiving remains.
    HalfClosedLocal,
    /// Peer sent END_STREAM; only sending remains.
    HalfClosedRemote,
    /// Fully closed. The connection removes the stream from its table.
    Closed,
}

/// Which half of the frame pair drives a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Headers,
    Data,
}

/// A frame that is illegal in the stream's current state. Fatal to the
/// stream, not the connection: the receiver answers with RST_STREAM and
/// drops the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    SendViolation { state: StreamState, kind: FrameKind },
    RecvViolation { state: StreamState, kind: FrameKind },
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::SendViolation { state, kind } => {
                write!(f, "cannot send {:?} in state {:?}", kind, state)
            }
            StreamError::RecvViolation { state, kind } => {
                write!(f, "cannot receive {:?} in state {:?}", kind, state)
            }
        }
    }
}

impl std::error::Error for StreamError {}

/// A single HTTP/2 stream: lifecycle state, the merged received header
/// list, the received-data buffer, and both flow control windows.
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    state: StreamState,
    /// Received headers, merged across initial and trailer blocks.
    headers: Vec<HeaderField>,
    /// Received body bytes. Allocated on the first DATA frame.
    data: Option<BytesMut>,
    /// Whether an initial header block has completed on this stream.
    got_headers: bool,
    /// Credit for data we send.
    send_window: i64,
    /// Credit for data the peer sends.
    recv_window: FlowControl,
}

impl Stream {
    /// Create a stream in `Idle`. `send_initial` is the peer's advertised
    /// initial window; `recv_initial` is ours.
    pub fn new(id: StreamId, send_initial: u32, recv_initial: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            headers: Vec::new(),
            data: None,
            got_headers: false,
            send_window: i64::from(send_initial),
            recv_window: FlowControl::new(recv_initial),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Apply a frame we are about to send.
    pub fn apply_send(&mut self, kind: FrameKind, end_stream: bool) -> Result<(), StreamError> {
        use StreamState::*;
        let violation = StreamError::SendViolation {
            state: self.state,
            kind,
        };
        self.state = match (self.state, kind) {
            (Closed, _) => return Err(violation),
            (Idle, FrameKind::Data) => return Err(violation),
            (Idle, FrameKind::Headers) => {
                if end_stream {
                    HalfClosedLocal
                } else {
                    Open
                }
            }
            // Push bookkeeping: headers on a stream we reserved open it
            // half-closed toward us.
            (ReservedLocal, FrameKind::Headers) => HalfClosedRemote,
            (ReservedLocal, FrameKind::Data) | (ReservedRemote, _) => return Err(violation),
            (Open, _) => {
                if end_stream {
                    HalfClosedLocal
                } else {
                    Open
                }
            }
            (HalfClosedLocal, _) => {
                if end_stream {
                    Closed
                } else {
                    HalfClosedLocal
                }
            }
            (HalfClosedRemote, _) => {
                if end_stream {
                    Closed
                } else {
                    HalfClosedRemote
                }
            }
        };
        Ok(())
    }

    /// Apply a frame received from the peer.
    pub fn apply_recv(&mut self, kind: FrameKind, end_stream: bool) -> Result<(), StreamError> {
        use StreamState::*;
        let violation = StreamError::RecvViolation {
            state: self.state,
            kind,
        };
        self.state = match (self.state, kind) {
            (Closed, _) => return Err(violation),
            (Idle, FrameKind::Data) => return Err(violation),
            (Idle, FrameKind::Headers) => {
                if end_stream {
                    HalfClosedRemote
                } else {
                    Open
                }
            }
            (ReservedRemote, FrameKind::Headers) => HalfClosedLocal,
            (ReservedRemote, FrameKind::Data) | (ReservedLocal, _) => return Err(violation),
            (Open, _) => {
                if end_stream {
                    HalfClosedRemote
                } else {
                    Open
                }
            }
            (HalfClosedLocal, _) => {
                if end_stream {
                    Closed
                } else {
                    HalfClosedLocal
                }
            }
            (HalfClosedRemote, _) => {
                if end_stream {
                    Closed
                } else {
                    HalfClosedRemote
                }
            }
        };
        Ok(())
    }

    /// Force the stream closed (RST_STREAM sent or received).
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
    }

    // -- Received headers --

    /// Merge a decoded header block into the stream's header list.
    pub fn push_headers(&mut self, fields: &[HeaderField]) {
        self.headers.extend_from_slice(fields);
        self.got_headers = true;
    }

    /// Whether an initial header block has completed.
    pub fn got_headers(&self) -> bool {
        self.got_headers
    }

    /// The merged received header list.
    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    // -- Received data --

    /// Append received body bytes, allocating the buffer on first use.
    pub fn push_data(&mut self, chunk: &[u8]) {
        self.data
            .get_or_insert_with(BytesMut::new)
            .extend_from_slice(chunk);
    }

    /// Take the accumulated body. Empty if no DATA arrived.
    pub fn take_data(&mut self) -> Bytes {
        self.data.take().map(BytesMut::freeze).unwrap_or_default()
    }

    // -- Flow control --

    pub fn send_window(&self) -> i64 {
        self.send_window
    }

    pub fn consume_send(&mut self, amount: u32) {
        self.send_window -= i64::from(amount);
    }

    pub fn credit_send(&mut self, amount: u32) {
        self.send_window += i64::from(amount);
    }

    pub fn adjust_send(&mut self, delta: i64) {
        self.send_window += delta;
    }

    pub fn recv_window(&mut self) -> &mut FlowControl {
        &mut self.recv_window
    }
}
