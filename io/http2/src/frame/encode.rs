//! HTTP/2 frame encoding.

use bytes::{BufMut, BytesMut};

use super::error::FrameError;
use super::types::{Frame, FrameType, StreamId, flags};
use super::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE};

/// Frame encoder that writes HTTP/2 frames to a byte buffer.
///
/// The encoder tracks the peer's advertised maximum frame size so callers
/// can chunk DATA payloads; the encoder itself only enforces the protocol
/// ceiling of 2^24 - 1 bytes.
pub struct FrameEncoder {
    max_frame_size: u32,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    /// Create a new frame encoder with default settings.
    pub fn new() -> Self {
        Self {
            max_frame_size: super::DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the peer's advertised maximum frame size.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Get the peer's advertised maximum frame size.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Encode a frame into `buf`.
    ///
    /// Fails with `FrameTooLarge` if the payload cannot be expressed in the
    /// 24-bit length field.
    pub fn encode(&self, frame: &Frame, buf: &mut BytesMut) -> Result<(), FrameError> {
        match frame {
            Frame::Data {
                stream_id,
                end_stream,
                data,
            } => {
                let frame_flags = if *end_stream { flags::END_STREAM } else { 0 };
                let length = self.payload_len(data.len())?;
                buf.reserve(FRAME_HEADER_SIZE + data.len());
                self.write_header(buf, length, FrameType::Data, frame_flags, *stream_id);
                buf.extend_from_slice(data);
            }
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                priority,
                header_block,
            } => {
                let mut frame_flags = 0u8;
                if *end_stream {
                    frame_flags |= flags::END_STREAM;
                }
                if *end_headers {
                    frame_flags |= flags::END_HEADERS;
                }
                if priority.is_some() {
                    frame_flags |= flags::PRIORITY;
                }

                let priority_len = if priority.is_some() { 5 } else { 0 };
                let length = self.payload_len(priority_len + header_block.len())?;
                buf.reserve(FRAME_HEADER_SIZE + length as usize);
                self.write_header(buf, length, FrameType::Headers, frame_flags, *stream_id);

                if let Some(priority) = priority {
                    let mut dep = priority.dependency.value();
                    if priority.exclusive {
                        dep |= 0x8000_0000;
                    }
                    buf.put_u32(dep);
                    buf.put_u8(priority.weight);
                }
                buf.extend_from_slice(header_block);
            }
            Frame::Priority {
                stream_id,
                priority,
            } => {
                buf.reserve(FRAME_HEADER_SIZE + 5);
                self.write_header(buf, 5, FrameType::Priority, 0, *stream_id);
                let mut dep = priority.dependency.value();
                if priority.exclusive {
                    dep |= 0x8000_0000;
                }
                buf.put_u32(dep);
                buf.put_u8(priority.weight);
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                buf.reserve(FRAME_HEADER_SIZE + 4);
                self.write_header(buf, 4, FrameType::RstStream, 0, *stream_id);
                buf.put_u32(*error_code);
            }
            Frame::Settings { ack, settings } => {
                let payload = if *ack {
                    Vec::new()
                } else {
                    settings.encode_to_vec()
                };
                let frame_flags = if *ack { flags::ACK } else { 0 };
                let length = self.payload_len(payload.len())?;
                buf.reserve(FRAME_HEADER_SIZE + payload.len());
                self.write_header(
                    buf,
                    length,
                    FrameType::Settings,
                    frame_flags,
                    StreamId::CONNECTION,
                );
                buf.extend_from_slice(&payload);
            }
            Frame::PushPromise {
                stream_id,
                end_headers,
                promised_stream_id,
                header_block,
            } => {
                let frame_flags = if *end_headers { flags::END_HEADERS } else { 0 };
                let length = self.payload_len(4 + header_block.len())?;
                buf.reserve(FRAME_HEADER_SIZE + length as usize);
                self.write_header(
                    buf,
                    length,
                    FrameType::PushPromise,
                    frame_flags,
                    *stream_id,
                );
                buf.put_u32(promised_stream_id.value() & 0x7FFF_FFFF);
                buf.extend_from_slice(header_block);
            }
            Frame::Ping { ack, data } => {
                let frame_flags = if *ack { flags::ACK } else { 0 };
                buf.reserve(FRAME_HEADER_SIZE + 8);
                self.write_header(
                    buf,
                    8,
                    FrameType::Ping,
                    frame_flags,
                    StreamId::CONNECTION,
                );
                buf.extend_from_slice(data);
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                let length = self.payload_len(8 + debug_data.len())?;
                buf.reserve(FRAME_HEADER_SIZE + length as usize);
                self.write_header(buf, length, FrameType::GoAway, 0, StreamId::CONNECTION);
                buf.put_u32(last_stream_id.value() & 0x7FFF_FFFF);
                buf.put_u32(*error_code);
                buf.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                buf.reserve(FRAME_HEADER_SIZE + 4);
                self.write_header(buf, 4, FrameType::WindowUpdate, 0, *stream_id);
                buf.put_u32(increment & 0x7FFF_FFFF);
            }
            Frame::Continuation {
                stream_id,
                end_headers,
                header_block,
            } => {
                let frame_flags = if *end_headers { flags::END_HEADERS } else { 0 };
                let length = self.payload_len(header_block.len())?;
                buf.reserve(FRAME_HEADER_SIZE + length as usize);
                self.write_header(
                    buf,
                    length,
                    FrameType::Continuation,
                    frame_flags,
                    *stream_id,
                );
                buf.extend_from_slice(header_block);
            }
            Frame::Unknown {
                frame_type,
                flags: frame_flags,
                stream_id,
                payload,
            } => {
                let length = self.payload_len(payload.len())?;
                buf.reserve(FRAME_HEADER_SIZE + payload.len());
                self.write_raw_header(buf, length, *frame_type, *frame_flags, *stream_id);
                buf.extend_from_slice(payload);
            }
        }
        Ok(())
    }

    /// Validate that a payload fits in the 24-bit length field.
    fn payload_len(&self, len: usize) -> Result<u32, FrameError> {
        if len > MAX_FRAME_SIZE as usize {
            return Err(FrameError::FrameTooLarge {
                size: len as u32,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(len as u32)
    }

    /// Write a frame header for a known frame type.
    #[inline]
    fn write_header(
        &self,
        buf: &mut BytesMut,
        length: u32,
        frame_type: FrameType,
        frame_flags: u8,
        stream_id: StreamId,
    ) {
        self.write_raw_header(buf, length, frame_type as u8, frame_flags, stream_id);
    }

    /// Write the 9-byte header: 24-bit length, type, flags, 31-bit stream id.
    #[inline]
    fn write_raw_header(
        &self,
        buf: &mut BytesMut,
        length: u32,
        frame_type: u8,
        frame_flags: u8,
        stream_id: StreamId,
    ) {
        buf.put_u8((length >> 16) as u8);
        buf.put_u8((length >> 8) as u8);
        buf.put_u8(length as u8);
        buf.put_u8(frame_type);
        buf.put_u8(frame_flags);
        buf.put_u32(stream_id.value() & 0x7FFF_FFFF);
    }
}

/// Helpers for frames the connection machinery emits on its own.
impl FrameEncoder {
    /// Queue a SETTINGS ACK.
    pub fn encode_settings_ack(&self, buf: &mut BytesMut) {
        // A zero-length frame cannot exceed the size ceiling.
        let frame = Frame::Settings {
            ack: true,
            settings: Default::default(),
        };
        let _ = self.encode(&frame, buf);
    }

    /// Queue a PING response echoing the probe's opaque data.
    pub fn encode_ping_ack(&self, data: [u8; 8], buf: &mut BytesMut) {
        let _ = self.encode(&Frame::Ping { ack: true, data }, buf);
    }

    /// Queue a WINDOW_UPDATE.
    pub fn encode_window_update(&self, stream_id: StreamId, increment: u32, buf: &mut BytesMut) {
        let _ = self.encode(
            &Frame::WindowUpdate {
                stream_id,
                increment,
            },
            buf,
        );
    }

    /// Queue a RST_STREAM.
    pub fn encode_rst_stream(&self, stream_id: StreamId, error_code: u32, buf: &mut BytesMut) {
        let _ = self.encode(
            &Frame::RstStream {
                stream_id,
                error_code,
            },
            buf,
        );
    }
}
