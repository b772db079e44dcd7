//! Local connection configuration.

use crate::frame::{self, Settings};

/// The settings a connection advertises to its peer, with builder-style
/// setters for the knobs callers commonly change.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Maximum number of concurrent streams.
    pub max_concurrent_streams: u32,
    /// Initial stream window size.
    pub initial_window_size: u32,
    /// Maximum frame size we accept.
    pub max_frame_size: u32,
    /// Maximum header list size we accept.
    pub max_header_list_size: u32,
    /// HPACK header table size.
    pub header_table_size: u32,
    /// Whether server push is enabled. Always false here.
    pub enable_push: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: 16_384,
            header_table_size: frame::DEFAULT_HEADER_TABLE_SIZE,
            enable_push: false,
        }
    }
}

impl ConnectionSettings {
    /// Create settings with server defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client defaults: push disabled, large frame and header-list
    /// allowances so responses rarely need chunking on the wire.
    pub fn client_default() -> Self {
        Self {
            max_frame_size: 4 * 1024 * 1024,
            max_header_list_size: 4 * 1024 * 1024,
            enable_push: false,
            ..Self::default()
        }
    }

    /// Set maximum concurrent streams.
    pub fn max_concurrent_streams(mut self, value: u32) -> Self {
        self.max_concurrent_streams = value;
        self
    }

    /// Set the initial stream window size.
    pub fn initial_window_size(mut self, value: u32) -> Self {
        self.initial_window_size = value;
        self
    }

    /// Set the maximum frame size, clamped to the protocol's legal range.
    pub fn max_frame_size(mut self, value: u32) -> Self {
        self.max_frame_size = value.clamp(frame::DEFAULT_MAX_FRAME_SIZE, frame::MAX_FRAME_SIZE);
        self
    }

    /// Set the maximum header list size.
    pub fn max_header_list_size(mut self, value: u32) -> Self {
        self.max_header_list_size = value;
        self
    }

    /// Set the HPACK header table size.
    pub fn header_table_size(mut self, value: u32) -> Self {
        self.header_table_size = value;
        self
    }

    /// The SETTINGS frame payload advertising these values.
    pub(crate) fn to_settings(self) -> Settings {
        Settings {
            header_table_size: self.header_table_size,
            enable_push: self.enable_push,
            max_concurrent_streams: Some(self.max_concurrent_streams),
            initial_window_size: self.initial_window_size,
            max_frame_size: self.max_frame_size,
            max_header_list_size: Some(self.max_header_list_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.max_concurrent_streams, 100);
        assert_eq!(settings.initial_window_size, 65535);
        assert_eq!(settings.max_frame_size, 16384);
        assert!(!settings.enable_push);
    }

    #[test]
    fn client_defaults_advertise_large_frames() {
        let settings = ConnectionSettings::client_default();
        assert_eq!(settings.max_frame_size, 4 * 1024 * 1024);
        assert_eq!(settings.max_header_list_size, 4 * 1024 * 1024);
        assert!(!settings.enable_push);
    }

    #[test]
    fn builder_chain() {
        let settings = ConnectionSettings::new()
            .max_concurrent_streams(50)
            .initial_window_size(32_768)
            .max_frame_size(65_535)
            .max_header_list_size(32_768)
            .header_table_size(2_048);
        assert_eq!(settings.max_concurrent_streams, 50);
        assert_eq!(settings.initial_window_size, 32_768);
        assert_eq!(settings.max_frame_size, 65_535);
        assert_eq!(settings.max_header_list_size, 32_768);
        assert_eq!(settings.header_table_size, 2_048);
    }

    #[test]
    fn max_frame_size_clamped() {
        assert_eq!(
            ConnectionSettings::new().max_frame_size(1).max_frame_size,
            16_384
        );
        assert_eq!(
            ConnectionSettings::new()
                .max_frame_size(u32::MAX)
                .max_frame_size,
            frame::MAX_FRAME_SIZE
        );
    }

    #[test]
    fn to_settings_carries_values() {
        let settings = ConnectionSettings::client_default().to_settings();
        assert!(!settings.enable_push);
        assert_eq!(settings.max_frame_size, 4 * 1024 * 1024);
        assert_eq!(settings.max_header_list_size, Some(4 * 1024 * 1024));
    }
}
