//! HPACK header encoding.

use super::huffman;
use super::table::{DynamicTable, HeaderField, StaticTable};

/// How a literal header should interact with the dynamic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Indexing {
    /// Literal with incremental indexing (01xxxxxx): add to the dynamic
    /// table so later blocks can reference it.
    #[default]
    Always,
    /// Literal never indexed (0001xxxx): for sensitive values that must not
    /// enter compression state anywhere on the path.
    Never,
    /// Literal without indexing (0000xxxx): emitted once, not stored.
    None,
}

/// HPACK encoder. One per connection; the dynamic table it carries is the
/// mirror of the peer decoder's table.
pub struct HpackEncoder {
    dynamic_table: DynamicTable,
    use_huffman: bool,
    /// Table size change to announce at the start of the next header block.
    pending_size_update: Option<usize>,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    /// Create a new HPACK encoder with default settings.
    pub fn new() -> Self {
        Self::with_table_size(super::DEFAULT_TABLE_SIZE)
    }

    /// Create a new HPACK encoder with a specific table size.
    pub fn with_table_size(size: usize) -> Self {
        Self {
            dynamic_table: DynamicTable::new(size),
            use_huffman: true,
            pending_size_update: None,
        }
    }

    /// Set whether string literals are Huffman-coded when that is shorter.
    pub fn set_huffman(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    /// Apply a SETTINGS_HEADER_TABLE_SIZE from the peer.
    ///
    /// The table shrinks immediately; the size-update directive announcing
    /// the change is emitted at the front of the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.dynamic_table.set_max_size(size);
        self.pending_size_update = Some(size);
    }

    /// Encode a header list into an HPACK header block.
    ///
    /// Names are lowercased and pseudo-headers are moved ahead of ordinary
    /// headers before encoding. Every literal uses incremental indexing;
    /// use `encode_field` for per-header control.
    pub fn encode(&mut self, headers: &[HeaderField], buf: &mut Vec<u8>) {
        self.flush_size_update(buf);
        for header in normalize(headers) {
            self.encode_one(&header, Indexing::Always, buf);
        }
    }

    /// Encode a single header with an explicit indexing mode.
    pub fn encode_field(&mut self, header: &HeaderField, indexing: Indexing, buf: &mut Vec<u8>) {
        self.flush_size_update(buf);
        let mut header = header.clone();
        header.name.make_ascii_lowercase();
        self.encode_one(&header, indexing, buf);
    }

    fn flush_size_update(&mut self, buf: &mut Vec<u8>) {
        if let Some(size) = self.pending_size_update.take() {
            // Dynamic table size update (RFC 7541 Section 6.3): 001xxxxx.
            encode_integer(size, 5, 0x20, buf);
        }
    }

    fn encode_one(&mut self, header: &HeaderField, indexing: Indexing, buf: &mut Vec<u8>) {
        let static_match = StaticTable::find(&header.name, &header.value);
        let dynamic_match = self.dynamic_table.find(&header.name, &header.value);

        // Exact matches always use the indexed form (1xxxxxxx); the
        // indexing mode only governs literals.
        match (static_match, dynamic_match) {
            (Some((index, true)), _) => {
                encode_integer(index, 7, 0x80, buf);
                return;
            }
            (_, Some((position, true))) => {
                encode_integer(StaticTable::len() + 1 + position, 7, 0x80, buf);
                return;
            }
            _ => {}
        }

        let name_index = match (static_match, dynamic_match) {
            (Some((index, false)), _) => Some(index),
            (_, Some((position, false))) => Some(StaticTable::len() + 1 + position),
            _ => None,
        };

        let (prefix_bits, pattern) = match indexing {
            // Literal with incremental indexing (Section 6.2.1): 01xxxxxx.
            Indexing::Always => (6, 0x40),
            // Literal never indexed (Section 6.2.3): 0001xxxx.
            Indexing::Never => (4, 0x10),
            // Literal without indexing (Section 6.2.2): 0000xxxx.
            Indexing::None => (4, 0x00),
        };

        match name_index {
            Some(index) => encode_integer(index, prefix_bits, pattern, buf),
            None => {
                buf.push(pattern);
                self.encode_string(&header.name, buf);
            }
        }
        self.encode_string(&header.value, buf);

        if indexing == Indexing::Always {
            self.dynamic_table.insert(header.clone());
        }
    }

    /// Encode a string literal, Huffman-coded when that wins.
    fn encode_string(&self, data: &[u8], buf: &mut Vec<u8>) {
        if self.use_huffman {
            let huffman_len = huffman::encoded_len(data);
            if huffman_len < data.len() {
                encode_integer(huffman_len, 7, 0x80, buf);
                huffman::encode(data, buf);
                return;
            }
        }
        encode_integer(data.len(), 7, 0x00, buf);
        buf.extend_from_slice(data);
    }

    #[cfg(test)]
    pub(super) fn table_len(&self) -> usize {
        self.dynamic_table.len()
    }
}

/// Lowercase names and move pseudo-headers ahead of ordinary headers,
/// preserving relative order within each group.
fn normalize(headers: &[HeaderField]) -> Vec<HeaderField> {
    let mut out: Vec<HeaderField> = Vec::with_capacity(headers.len());
    for header in headers {
        let mut header = header.clone();
        header.name.make_ascii_lowercase();
        if header.is_pseudo() {
            let insert_at = out.iter().position(|h| !h.is_pseudo()).unwrap_or(out.len());
            out.insert(insert_at, header);
        } else {
            out.push(header);
        }
    }
    out
}

/// Encode an integer with an N-bit prefix (RFC 7541 Section 5.1).
pub(super) fn encode_integer(mut value: usize, prefix_bits: u8, pattern: u8, buf: &mut Vec<u8>) {
    let max_prefix: usize = (1 << prefix_bits) - 1;

    if value < max_prefix {
        buf.push(pattern | value as u8);
    } else {
        buf.push(pattern | max_prefix as u8);
        value -= max_prefix;
        while value >= 128 {
            buf.push((value % 128) as u8 | 0x80);
            value /= 128;
        }
        buf.push(value as u8);
    }
}
