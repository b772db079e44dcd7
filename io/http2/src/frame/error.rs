//! HTTP/2 frame errors and protocol error codes.

use std::fmt;

/// HTTP/2 error codes (RFC 7540 Section 7), carried in RST_STREAM and GOAWAY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown.
    NoError = 0x0,
    /// Protocol error detected.
    ProtocolError = 0x1,
    /// Implementation fault.
    InternalError = 0x2,
    /// Flow control limits exceeded.
    FlowControlError = 0x3,
    /// Settings not acknowledged in time.
    SettingsTimeout = 0x4,
    /// Frame received for closed stream.
    StreamClosed = 0x5,
    /// Frame size incorrect.
    FrameSizeError = 0x6,
    /// Stream not processed.
    RefusedStream = 0x7,
    /// Stream cancelled.
    Cancel = 0x8,
    /// Compression state not updated.
    CompressionError = 0x9,
    /// TCP connection error.
    ConnectError = 0xa,
    /// Processing capacity exceeded.
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS requirements not met.
    InadequateSecurity = 0xc,
    /// HTTP/1.1 required.
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            // Unknown codes are treated as INTERNAL_ERROR.
            _ => Self::InternalError,
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
        };
        write!(f, "{}", name)
    }
}

/// Frame parsing and encoding errors. All of these are fatal to the
/// connection that produced them.
#[derive(Debug)]
pub enum FrameError {
    /// Frame exceeds the maximum allowed size.
    FrameTooLarge { size: u32, max: u32 },
    /// Frame requires a non-zero stream ID but arrived on stream 0.
    StreamIdRequired { frame_type: u8 },
    /// Frame is connection-scoped but arrived on a non-zero stream.
    NonZeroStreamId { frame_type: u8 },
    /// Payload length does not match what the frame type requires.
    InvalidPayloadLength {
        frame_type: u8,
        expected: usize,
        actual: usize,
    },
    /// Pad length field exceeds the payload.
    InvalidPadding {
        pad_length: u8,
        payload_length: usize,
    },
    /// A SETTINGS parameter carried a value outside its legal range.
    InvalidSettingValue { id: u16, value: u32 },
    /// WINDOW_UPDATE carried a zero increment.
    InvalidWindowIncrement,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::FrameTooLarge { size, max } => {
                write!(f, "frame size {} exceeds maximum {}", size, max)
            }
            FrameError::StreamIdRequired { frame_type } => {
                write!(
                    f,
                    "frame type 0x{:02x} requires non-zero stream ID",
                    frame_type
                )
            }
            FrameError::NonZeroStreamId { frame_type } => {
                write!(
                    f,
                    "frame type 0x{:02x} must be sent on stream 0",
                    frame_type
                )
            }
            FrameError::InvalidPayloadLength {
                frame_type,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "frame type 0x{:02x} expected {} bytes, got {}",
                    frame_type, expected, actual
                )
            }
            FrameError::InvalidPadding {
                pad_length,
                payload_length,
            } => {
                write!(
                    f,
                    "padding length {} exceeds payload length {}",
                    pad_length, payload_length
                )
            }
            FrameError::InvalidSettingValue { id, value } => {
                write!(f, "invalid value {} for setting 0x{:04x}", value, id)
            }
            FrameError::InvalidWindowIncrement => {
                write!(f, "WINDOW_UPDATE with zero increment")
            }
        }
    }
}

impl std::error::Error for FrameError {}
