//! HTTP/2 frame decoding.

use bytes::{Buf, Bytes, BytesMut};

use super::error::FrameError;
use super::types::{Frame, FrameHeader, FrameType, Priority, Settings, StreamId, flags};
use super::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};

/// Frame decoder that parses HTTP/2 frames from a byte buffer.
pub struct FrameDecoder {
    max_frame_size: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new frame decoder with default settings.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the maximum frame size we accept (our advertised SETTINGS value).
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Try to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` when a complete frame was consumed,
    /// `Ok(None)` when more bytes are needed, or `Err` on a protocol
    /// violation (fatal to the connection).
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let header = peek_header(buf);

        if header.length > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: header.length,
                max: self.max_frame_size,
            });
        }

        let total_len = FRAME_HEADER_SIZE + header.length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.length as usize).freeze();

        self.parse(header, payload).map(Some)
    }

    /// Interpret a frame payload according to its type.
    fn parse(&self, header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
        match FrameType::from_u8(header.frame_type) {
            Some(FrameType::Data) => self.parse_data(header, payload),
            Some(FrameType::Headers) => self.parse_headers(header, payload),
            Some(FrameType::Priority) => self.parse_priority(header, payload),
            Some(FrameType::RstStream) => self.parse_rst_stream(header, payload),
            Some(FrameType::Settings) => self.parse_settings(header, payload),
            Some(FrameType::PushPromise) => self.parse_push_promise(header, payload),
            Some(FrameType::Ping) => self.parse_ping(header, payload),
            Some(FrameType::GoAway) => self.parse_goaway(header, payload),
            Some(FrameType::WindowUpdate) => self.parse_window_update(header, payload),
            Some(FrameType::Continuation) => Ok(Frame::Continuation {
                stream_id: require_stream(&header)?,
                end_headers: header.has_flag(flags::END_HEADERS),
                header_block: payload,
            }),
            None => Ok(Frame::Unknown {
                frame_type: header.frame_type,
                flags: header.flags,
                stream_id: header.stream_id,
                payload,
            }),
        }
    }

    fn parse_data(&self, header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
        let stream_id = require_stream(&header)?;
        let data = strip_padding(&header, payload)?;
        Ok(Frame::Data {
            stream_id,
            end_stream: header.has_flag(flags::END_STREAM),
            data,
        })
    }

    fn parse_headers(&self, header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
        let stream_id = require_stream(&header)?;
        let mut payload = strip_padding(&header, payload)?;

        let priority = if header.has_flag(flags::PRIORITY) {
            if payload.len() < 5 {
                return Err(FrameError::InvalidPayloadLength {
                    frame_type: header.frame_type,
                    expected: 5,
                    actual: payload.len(),
                });
            }
            let first = payload.get_u32();
            Some(Priority {
                exclusive: first & 0x8000_0000 != 0,
                dependency: StreamId::new(first & 0x7FFF_FFFF),
                weight: payload.get_u8(),
            })
        } else {
            None
        };

        Ok(Frame::Headers {
            stream_id,
            end_stream: header.has_flag(flags::END_STREAM),
            end_headers: header.has_flag(flags::END_HEADERS),
            priority,
            header_block: payload,
        })
    }

    fn parse_priority(&self, header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
        let stream_id = require_stream(&header)?;
        if payload.len() != 5 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: header.frame_type,
                expected: 5,
                actual: payload.len(),
            });
        }
        let first = payload.get_u32();
        Ok(Frame::Priority {
            stream_id,
            priority: Priority {
                exclusive: first & 0x8000_0000 != 0,
                dependency: StreamId::new(first & 0x7FFF_FFFF),
                weight: payload.get_u8(),
            },
        })
    }

    fn parse_rst_stream(
        &self,
        header: FrameHeader,
        mut payload: Bytes,
    ) -> Result<Frame, FrameError> {
        let stream_id = require_stream(&header)?;
        if payload.len() != 4 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: header.frame_type,
                expected: 4,
                actual: payload.len(),
            });
        }
        Ok(Frame::RstStream {
            stream_id,
            error_code: payload.get_u32(),
        })
    }

    fn parse_settings(&self, header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
        require_connection(&header)?;
        let ack = header.has_flag(flags::ACK);
        if ack {
            if !payload.is_empty() {
                return Err(FrameError::InvalidPayloadLength {
                    frame_type: header.frame_type,
                    expected: 0,
                    actual: payload.len(),
                });
            }
            return Ok(Frame::Settings {
                ack: true,
                settings: Settings::default(),
            });
        }
        Ok(Frame::Settings {
            ack: false,
            settings: Settings::decode(&payload)?,
        })
    }

    fn parse_push_promise(
        &self,
        header: FrameHeader,
        payload: Bytes,
    ) -> Result<Frame, FrameError> {
        let stream_id = require_stream(&header)?;
        let mut payload = strip_padding(&header, payload)?;
        if payload.len() < 4 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: header.frame_type,
                expected: 4,
                actual: payload.len(),
            });
        }
        let promised_stream_id = StreamId::new(payload.get_u32() & 0x7FFF_FFFF);
        Ok(Frame::PushPromise {
            stream_id,
            end_headers: header.has_flag(flags::END_HEADERS),
            promised_stream_id,
            header_block: payload,
        })
    }

    fn parse_ping(&self, header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
        require_connection(&header)?;
        if payload.len() != 8 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: header.frame_type,
                expected: 8,
                actual: payload.len(),
            });
        }
        let mut data = [0u8; 8];
        data.copy_from_slice(&payload);
        Ok(Frame::Ping {
            ack: header.has_flag(flags::ACK),
            data,
        })
    }

    fn parse_goaway(&self, header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
        require_connection(&header)?;
        if payload.len() < 8 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: header.frame_type,
                expected: 8,
                actual: payload.len(),
            });
        }
        let last_stream_id = StreamId::new(payload.get_u32() & 0x7FFF_FFFF);
        let error_code = payload.get_u32();
        Ok(Frame::GoAway {
            last_stream_id,
            error_code,
            debug_data: payload,
        })
    }

    fn parse_window_update(
        &self,
        header: FrameHeader,
        mut payload: Bytes,
    ) -> Result<Frame, FrameError> {
        if payload.len() != 4 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: header.frame_type,
                expected: 4,
                actual: payload.len(),
            });
        }
        let increment = payload.get_u32() & 0x7FFF_FFFF;
        if increment == 0 {
            return Err(FrameError::InvalidWindowIncrement);
        }
        Ok(Frame::WindowUpdate {
            stream_id: header.stream_id,
            increment,
        })
    }
}

/// Read the 9-byte header from the front of `buf` without consuming it.
fn peek_header(buf: &[u8]) -> FrameHeader {
    debug_assert!(buf.len() >= FRAME_HEADER_SIZE);
    let length = (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]);
    let stream_id = StreamId::new(
        (u32::from(buf[5]) << 24)
            | (u32::from(buf[6]) << 16)
            | (u32::from(buf[7]) << 8)
            | u32::from(buf[8]),
    );
    FrameHeader {
        length,
        frame_type: buf[3],
        flags: buf[4],
        stream_id,
    }
}

fn require_stream(header: &FrameHeader) -> Result<StreamId, FrameError> {
    if header.stream_id.is_connection_level() {
        return Err(FrameError::StreamIdRequired {
            frame_type: header.frame_type,
        });
    }
    Ok(header.stream_id)
}

fn require_connection(header: &FrameHeader) -> Result<(), FrameError> {
    if !header.stream_id.is_connection_level() {
        return Err(FrameError::NonZeroStreamId {
            frame_type: header.frame_type,
        });
    }
    Ok(())
}

/// Strip the pad-length byte and trailing padding when PADDED is set.
fn strip_padding(header: &FrameHeader, mut payload: Bytes) -> Result<Bytes, FrameError> {
    if !header.has_flag(flags::PADDED) {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(FrameError::InvalidPadding {
            pad_length: 0,
            payload_length: 0,
        });
    }
    let pad_length = payload.get_u8();
    if pad_length as usize >= payload.len() + 1 {
        return Err(FrameError::InvalidPadding {
            pad_length,
            payload_length: payload.len(),
        });
    }
    payload.truncate(payload.len() - pad_length as usize);
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::super::encode::FrameEncoder;
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        let encoder = FrameEncoder::new();
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        encoder.encode(&frame, &mut buf).unwrap();
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decoder must consume the whole frame");
        decoded
    }

    #[test]
    fn data_round_trip() {
        match round_trip(Frame::Data {
            stream_id: StreamId::new(1),
            end_stream: true,
            data: Bytes::from_static(b"hello"),
        }) {
            Frame::Data {
                stream_id,
                end_stream,
                data,
            } => {
                assert_eq!(stream_id.value(), 1);
                assert!(end_stream);
                assert_eq!(&data[..], b"hello");
            }
            other => panic!("expected Data, got {:?}", other),
        }
    }

    #[test]
    fn headers_round_trip() {
        match round_trip(Frame::Headers {
            stream_id: StreamId::new(3),
            end_stream: false,
            end_headers: true,
            priority: None,
            header_block: Bytes::from_static(&[0x82, 0x86, 0x84]),
        }) {
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                priority,
                header_block,
            } => {
                assert_eq!(stream_id.value(), 3);
                assert!(!end_stream);
                assert!(end_headers);
                assert!(priority.is_none());
                assert_eq!(&header_block[..], &[0x82, 0x86, 0x84]);
            }
            other => panic!("expected Headers, got {:?}", other),
        }
    }

    #[test]
    fn headers_with_priority_round_trip() {
        match round_trip(Frame::Headers {
            stream_id: StreamId::new(1),
            end_stream: true,
            end_headers: true,
            priority: Some(Priority {
                exclusive: true,
                dependency: StreamId::new(0),
                weight: 255,
            }),
            header_block: Bytes::from_static(&[0x82]),
        }) {
            Frame::Headers {
                priority: Some(priority),
                header_block,
                ..
            } => {
                assert!(priority.exclusive);
                assert_eq!(priority.dependency.value(), 0);
                assert_eq!(priority.weight, 255);
                assert_eq!(&header_block[..], &[0x82]);
            }
            other => panic!("expected Headers with priority, got {:?}", other),
        }
    }

    #[test]
    fn settings_round_trip() {
        match round_trip(Frame::Settings {
            ack: false,
            settings: Settings::default(),
        }) {
            Frame::Settings { ack, settings } => {
                assert!(!ack);
                assert_eq!(settings, Settings::default());
            }
            other => panic!("expected Settings, got {:?}", other),
        }
    }

    #[test]
    fn settings_ack_round_trip() {
        match round_trip(Frame::Settings {
            ack: true,
            settings: Settings::default(),
        }) {
            Frame::Settings { ack, .. } => assert!(ack),
            other => panic!("expected Settings ACK, got {:?}", other),
        }
    }

    #[test]
    fn ping_round_trip() {
        match round_trip(Frame::Ping {
            ack: false,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
        }) {
            Frame::Ping { ack, data } => {
                assert!(!ack);
                assert_eq!(data, [1, 2, 3, 4, 5, 6, 7, 8]);
            }
            other => panic!("expected Ping, got {:?}", other),
        }
    }

    #[test]
    fn goaway_round_trip() {
        match round_trip(Frame::GoAway {
            last_stream_id: StreamId::new(5),
            error_code: 0,
            debug_data: Bytes::from_static(b"bye"),
        }) {
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                assert_eq!(last_stream_id.value(), 5);
                assert_eq!(error_code, 0);
                assert_eq!(&debug_data[..], b"bye");
            }
            other => panic!("expected GoAway, got {:?}", other),
        }
    }

    #[test]
    fn window_update_round_trip() {
        match round_trip(Frame::WindowUpdate {
            stream_id: StreamId::new(1),
            increment: 1000,
        }) {
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                assert_eq!(stream_id.value(), 1);
                assert_eq!(increment, 1000);
            }
            other => panic!("expected WindowUpdate, got {:?}", other),
        }
    }

    #[test]
    fn rst_stream_round_trip() {
        match round_trip(Frame::RstStream {
            stream_id: StreamId::new(1),
            error_code: 0x8,
        }) {
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                assert_eq!(stream_id.value(), 1);
                assert_eq!(error_code, 0x8);
            }
            other => panic!("expected RstStream, got {:?}", other),
        }
    }

    #[test]
    fn unknown_frame_type_carried() {
        let mut buf = BytesMut::new();
        let encoder = FrameEncoder::new();
        encoder
            .encode(
                &Frame::Unknown {
                    frame_type: 0xfe,
                    flags: 0x42,
                    stream_id: StreamId::new(7),
                    payload: Bytes::from_static(b"abc"),
                },
                &mut buf,
            )
            .unwrap();
        match FrameDecoder::new().decode(&mut buf).unwrap().unwrap() {
            Frame::Unknown {
                frame_type,
                flags,
                stream_id,
                payload,
            } => {
                assert_eq!(frame_type, 0xfe);
                assert_eq!(flags, 0x42);
                assert_eq!(stream_id.value(), 7);
                assert_eq!(&payload[..], b"abc");
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let mut buf = BytesMut::new();
        let encoder = FrameEncoder::new();
        encoder
            .encode(
                &Frame::Data {
                    stream_id: StreamId::new(1),
                    end_stream: false,
                    data: Bytes::from_static(b"hello"),
                },
                &mut buf,
            )
            .unwrap();
        buf.truncate(11); // header + 2 bytes of payload
        assert!(FrameDecoder::new().decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 11); // nothing consumed
    }

    #[test]
    fn data_on_stream_zero_rejected() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 0x0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(FrameError::StreamIdRequired { frame_type: 0x0 })
        ));
    }

    #[test]
    fn settings_on_nonzero_stream_rejected() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 0x4, 0, 0, 0, 0, 1]);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(FrameError::NonZeroStreamId { frame_type: 0x4 })
        ));
    }

    #[test]
    fn window_update_zero_increment_rejected() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 4, 0x8, 0, 0, 0, 0, 1, 0, 0, 0, 0]);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(FrameError::InvalidWindowIncrement)
        ));
    }

    #[test]
    fn stream_id_reserved_bit_masked_on_parse() {
        let mut buf = BytesMut::new();
        // DATA, 0 bytes, stream id with high bit set
        buf.extend_from_slice(&[0, 0, 0, 0x0, 0, 0x80, 0, 0, 1]);
        match FrameDecoder::new().decode(&mut buf).unwrap().unwrap() {
            Frame::Data { stream_id, .. } => assert_eq!(stream_id.value(), 1),
            other => panic!("expected Data, got {:?}", other),
        }
    }

    #[test]
    fn padded_data_stripped() {
        let mut buf = BytesMut::new();
        // DATA with PADDED flag: pad length 3, payload "hi", 3 bytes padding
        buf.extend_from_slice(&[0, 0, 6, 0x0, flags::PADDED, 0, 0, 0, 1]);
        buf.extend_from_slice(&[3, b'h', b'i', 0, 0, 0]);
        match FrameDecoder::new().decode(&mut buf).unwrap().unwrap() {
            Frame::Data { data, .. } => assert_eq!(&data[..], b"hi"),
            other => panic!("expected Data, got {:?}", other),
        }
    }

    #[test]
    fn padding_exceeding_payload_rejected() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 2, 0x0, flags::PADDED, 0, 0, 0, 1]);
        buf.extend_from_slice(&[5, b'x']);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(FrameError::InvalidPadding { .. })
        ));
    }

    #[test]
    fn max_payload_length_accepted() {
        // A frame claiming length 0xFFFFFE parses once the payload arrives.
        let mut decoder = FrameDecoder::new();
        decoder.set_max_frame_size(super::super::MAX_FRAME_SIZE);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0xff, 0xff, 0xfe, 0x0, 0, 0, 0, 0, 1]);
        assert!(decoder.decode(&mut buf).unwrap().is_none()); // needs payload
        buf.extend_from_slice(&vec![0u8; 0xFF_FFFE]);
        match decoder.decode(&mut buf).unwrap().unwrap() {
            Frame::Data { data, .. } => assert_eq!(data.len(), 0xFF_FFFE),
            other => panic!("expected Data, got {:?}", other),
        }
    }

    #[test]
    fn frame_over_advertised_limit_rejected() {
        let decoder = FrameDecoder::new(); // 16384 limit
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x01, 0x00, 0x00, 0x0, 0, 0, 0, 0, 1]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }
}
