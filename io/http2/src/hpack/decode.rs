//! HPACK header decoding.

use super::huffman;
use super::table::{DynamicTable, HeaderField, StaticTable};

/// HPACK decoding error. Fatal to the connection: compression state can no
/// longer be trusted once a block fails to decode.
#[derive(Debug)]
pub enum HpackError {
    /// Block ended in the middle of a directive.
    Incomplete,
    /// Integer continuation ran past the supported range.
    InvalidInteger,
    /// Invalid Huffman coding in a string literal.
    Huffman(huffman::HuffmanError),
    /// Index 0 or an index past both tables.
    InvalidIndex(usize),
    /// Table size update above the advertised maximum.
    TableSizeExceedsMax { requested: usize, max: usize },
    /// Table size update after a header, or a second update in one block.
    MisplacedTableSizeUpdate,
}

impl std::fmt::Display for HpackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HpackError::Incomplete => write!(f, "incomplete header block"),
            HpackError::InvalidInteger => write!(f, "invalid prefix integer"),
            HpackError::Huffman(e) => write!(f, "invalid string coding: {}", e),
            HpackError::InvalidIndex(index) => write!(f, "invalid table index {}", index),
            HpackError::TableSizeExceedsMax { requested, max } => {
                write!(f, "table size update {} exceeds maximum {}", requested, max)
            }
            HpackError::MisplacedTableSizeUpdate => {
                write!(f, "table size update not at start of header block")
            }
        }
    }
}

impl std::error::Error for HpackError {}

impl From<huffman::HuffmanError> for HpackError {
    fn from(e: huffman::HuffmanError) -> Self {
        HpackError::Huffman(e)
    }
}

/// HPACK decoder. One per connection, mirror of the peer encoder's table.
pub struct HpackDecoder {
    dynamic_table: DynamicTable,
    /// Ceiling for table size updates, set by our SETTINGS.
    max_table_size: usize,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    /// Create a new HPACK decoder with default settings.
    pub fn new() -> Self {
        Self::with_table_size(super::DEFAULT_TABLE_SIZE)
    }

    /// Create a new HPACK decoder with a specific table size.
    pub fn with_table_size(size: usize) -> Self {
        Self {
            dynamic_table: DynamicTable::new(size),
            max_table_size: size,
        }
    }

    /// Set the maximum table size the peer may resize to.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.max_table_size = size;
    }

    /// Decode a complete header block into a header list.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        let mut headers = Vec::new();
        let mut pos = 0;
        let mut size_update_allowed = true;

        while pos < data.len() {
            let first = data[pos];

            if first & 0x80 != 0 {
                // Indexed header field (Section 6.1): 1xxxxxxx.
                let (index, consumed) = decode_integer(&data[pos..], 7)?;
                pos += consumed;
                headers.push(self.lookup(index)?);
                size_update_allowed = false;
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing (Section 6.2.1): 01xxxxxx.
                let (header, consumed) = self.decode_literal(&data[pos..], 6)?;
                pos += consumed;
                self.dynamic_table.insert(header.clone());
                headers.push(header);
                size_update_allowed = false;
            } else if first & 0x20 != 0 {
                // Dynamic table size update (Section 6.3): 001xxxxx. Legal
                // once per block, before any header.
                if !size_update_allowed {
                    return Err(HpackError::MisplacedTableSizeUpdate);
                }
                let (new_size, consumed) = decode_integer(&data[pos..], 5)?;
                pos += consumed;
                if new_size > self.max_table_size {
                    return Err(HpackError::TableSizeExceedsMax {
                        requested: new_size,
                        max: self.max_table_size,
                    });
                }
                self.dynamic_table.set_max_size(new_size);
                size_update_allowed = false;
            } else {
                // Literal never indexed (0001xxxx) or without indexing
                // (0000xxxx): emitted, not stored.
                let (header, consumed) = self.decode_literal(&data[pos..], 4)?;
                pos += consumed;
                headers.push(header);
                size_update_allowed = false;
            }
        }

        Ok(headers)
    }

    /// Decode a literal directive: name (indexed or string), then value.
    fn decode_literal(
        &mut self,
        data: &[u8],
        prefix_bits: u8,
    ) -> Result<(HeaderField, usize), HpackError> {
        let (name_index, mut consumed) = decode_integer(data, prefix_bits)?;

        let name = if name_index > 0 {
            self.lookup(name_index)?.name
        } else {
            let (name, n) = decode_string(&data[consumed..])?;
            consumed += n;
            name
        };

        let (value, n) = decode_string(&data[consumed..])?;
        consumed += n;

        Ok((HeaderField::new(name, value), consumed))
    }

    /// Look up a header by index across the static and dynamic tables.
    fn lookup(&self, index: usize) -> Result<HeaderField, HpackError> {
        if index == 0 {
            return Err(HpackError::InvalidIndex(0));
        }
        if index <= StaticTable::len() {
            let (name, value) = StaticTable::get(index).ok_or(HpackError::InvalidIndex(index))?;
            return Ok(HeaderField::new(name.to_vec(), value.to_vec()));
        }
        self.dynamic_table
            .get(index - StaticTable::len() - 1)
            .cloned()
            .ok_or(HpackError::InvalidIndex(index))
    }

    #[cfg(test)]
    pub(super) fn table_len(&self) -> usize {
        self.dynamic_table.len()
    }
}

/// Decode an N-bit-prefix integer (RFC 7541 Section 5.1).
pub(super) fn decode_integer(data: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackError> {
    if data.is_empty() {
        return Err(HpackError::Incomplete);
    }

    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = data[0] as usize & max_prefix;
    let mut consumed = 1;

    if value < max_prefix {
        return Ok((value, consumed));
    }

    let mut shift = 0;
    loop {
        if consumed >= data.len() {
            return Err(HpackError::Incomplete);
        }
        let byte = data[consumed] as usize;
        consumed += 1;

        value += (byte & 0x7f) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((value, consumed));
        }
        if shift > 28 {
            return Err(HpackError::InvalidInteger);
        }
    }
}

/// Decode a string literal (RFC 7541 Section 5.2).
fn decode_string(data: &[u8]) -> Result<(Vec<u8>, usize), HpackError> {
    if data.is_empty() {
        return Err(HpackError::Incomplete);
    }

    let huffman_coded = data[0] & 0x80 != 0;
    let (length, mut consumed) = decode_integer(data, 7)?;

    if consumed + length > data.len() {
        return Err(HpackError::Incomplete);
    }
    let raw = &data[consumed..consumed + length];
    consumed += length;

    let value = if huffman_coded {
        let mut decoded = Vec::with_capacity(length * 2);
        huffman::decode(raw, &mut decoded)?;
        decoded
    } else {
        raw.to_vec()
    };

    Ok((value, consumed))
}

#[cfg(test)]
mod tests {
    use super::super::encode::{HpackEncoder, Indexing};
    use super::*;

    #[test]
    fn decode_integer_rfc_vectors() {
        // C.1.1: 10 in a 5-bit prefix.
        assert_eq!(decode_integer(&[0x2a], 5).unwrap(), (10, 1));
        // C.1.2: 1337 in a 5-bit prefix.
        assert_eq!(decode_integer(&[0x3f, 0x9a, 0x0a], 5).unwrap(), (1337, 3));
        // C.1.3: 42 in an 8-bit prefix.
        assert_eq!(decode_integer(&[0x2a], 8).unwrap(), (42, 1));
    }

    #[test]
    fn decode_integer_round_trip_all_prefixes() {
        for prefix_bits in 4..=7u8 {
            for value in [0usize, 1, 14, 15, 16, 63, 64, 127, 128, 1337, 65_535, 4_000_000] {
                let mut buf = Vec::new();
                super::super::encode::encode_integer(value, prefix_bits, 0, &mut buf);
                let (decoded, consumed) = decode_integer(&buf, prefix_bits).unwrap();
                assert_eq!(decoded, value, "prefix {} value {}", prefix_bits, value);
                assert_eq!(consumed, buf.len());
            }
        }
    }

    #[test]
    fn decode_integer_truncated() {
        assert!(matches!(
            decode_integer(&[0x1f], 5),
            Err(HpackError::Incomplete)
        ));
        assert!(matches!(decode_integer(&[], 5), Err(HpackError::Incomplete)));
    }

    #[test]
    fn decode_integer_overflow_guard() {
        let data = [0x1f, 0xff, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            decode_integer(&data, 5),
            Err(HpackError::InvalidInteger)
        ));
    }

    #[test]
    fn indexed_static_fields() {
        let mut decoder = HpackDecoder::new();
        let headers = decoder.decode(&[0x82, 0x86, 0x84]).unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], HeaderField::new(b":method".to_vec(), b"GET".to_vec()));
        assert_eq!(headers[1], HeaderField::new(b":scheme".to_vec(), b"http".to_vec()));
        assert_eq!(headers[2], HeaderField::new(b":path".to_vec(), b"/".to_vec()));
    }

    #[test]
    fn index_zero_rejected() {
        let mut decoder = HpackDecoder::new();
        assert!(matches!(
            decoder.decode(&[0x80]),
            Err(HpackError::InvalidIndex(0))
        ));
    }

    #[test]
    fn out_of_range_index_rejected() {
        let mut decoder = HpackDecoder::new();
        assert!(matches!(
            decoder.decode(&[0xff, 0x45]),
            Err(HpackError::InvalidIndex(_))
        ));
    }

    #[test]
    fn literal_with_indexing_stored() {
        let mut decoder = HpackDecoder::new();
        // Name index 1 (:authority), plain value "example.com".
        let mut data = vec![0x41, 0x0b];
        data.extend_from_slice(b"example.com");
        let headers = decoder.decode(&data).unwrap();
        assert_eq!(
            headers,
            [HeaderField::new(b":authority".to_vec(), b"example.com".to_vec())]
        );
        assert_eq!(decoder.table_len(), 1);

        // Dynamic index 62 now resolves to it.
        let headers = decoder.decode(&[0x80 | 62]).unwrap();
        assert_eq!(headers[0].value, b"example.com");
    }

    #[test]
    fn literal_without_indexing_not_stored() {
        let mut decoder = HpackDecoder::new();
        let mut data = vec![0x01, 0x08];
        data.extend_from_slice(b"test.com");
        let headers = decoder.decode(&data).unwrap();
        assert_eq!(headers[0].name, b":authority");
        assert_eq!(decoder.table_len(), 0);
    }

    #[test]
    fn literal_never_indexed_not_stored() {
        let mut decoder = HpackDecoder::new();
        let mut data = vec![0x11, 0x08];
        data.extend_from_slice(b"test.com");
        let headers = decoder.decode(&data).unwrap();
        assert_eq!(headers[0].name, b":authority");
        assert_eq!(decoder.table_len(), 0);
    }

    #[test]
    fn size_update_only_at_block_start() {
        let mut decoder = HpackDecoder::new();
        // Header then size update: rejected.
        assert!(matches!(
            decoder.decode(&[0x82, 0x20]),
            Err(HpackError::MisplacedTableSizeUpdate)
        ));
        // Two size updates in one block: rejected.
        assert!(matches!(
            decoder.decode(&[0x20, 0x20]),
            Err(HpackError::MisplacedTableSizeUpdate)
        ));
        // Single leading update: fine.
        let headers = decoder.decode(&[0x20, 0x82]).unwrap();
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn size_update_over_max_rejected() {
        let mut decoder = HpackDecoder::new();
        decoder.set_max_table_size(1024);
        // Size update to 4096 in a 5-bit prefix.
        let data = [0x3f, 0xe1, 0x1f];
        assert!(matches!(
            decoder.decode(&data),
            Err(HpackError::TableSizeExceedsMax { requested: 4096, .. })
        ));
    }

    #[test]
    fn round_trip_request_headers() {
        let mut encoder = HpackEncoder::new();
        let mut decoder = HpackDecoder::new();

        let headers = vec![
            HeaderField::new(b":method".to_vec(), b"POST".to_vec()),
            HeaderField::new(b":path".to_vec(), b"/example.HelloWorld/SayHello".to_vec()),
            HeaderField::new(b":scheme".to_vec(), b"http".to_vec()),
            HeaderField::new(b"content-type".to_vec(), b"application/grpc".to_vec()),
            HeaderField::new(b"te".to_vec(), b"trailers".to_vec()),
        ];
        let mut block = Vec::new();
        encoder.encode(&headers, &mut block);
        let decoded = decoder.decode(&block).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn round_trip_with_dynamic_table_and_huffman() {
        let mut encoder = HpackEncoder::new();
        let mut decoder = HpackDecoder::new();

        let headers = vec![
            HeaderField::new(b":method".to_vec(), b"GET".to_vec()),
            HeaderField::new(b":path".to_vec(), b"/".to_vec()),
            HeaderField::new(b":scheme".to_vec(), b"http".to_vec()),
            HeaderField::new(b"host".to_vec(), b"example.com".to_vec()),
        ];

        for round in 0..3 {
            let mut block = Vec::new();
            encoder.encode(&headers, &mut block);
            let decoded = decoder.decode(&block).unwrap();
            assert_eq!(decoded, headers, "round {}", round);
        }

        // Both sides should hold exactly the one literal entry.
        assert_eq!(decoder.table_len(), 1);
    }

    #[test]
    fn round_trip_never_indexed() {
        let mut encoder = HpackEncoder::new();
        let mut decoder = HpackDecoder::new();

        let header = HeaderField::new(b"authorization".to_vec(), b"Bearer s3cr3t".to_vec());
        let mut block = Vec::new();
        encoder.encode_field(&header, Indexing::Never, &mut block);
        let decoded = decoder.decode(&block).unwrap();
        assert_eq!(decoded, [header]);
        assert_eq!(decoder.table_len(), 0);
    }

    #[test]
    fn size_update_handshake_round_trip() {
        let mut encoder = HpackEncoder::new();
        let mut decoder = HpackDecoder::new();

        encoder.set_max_table_size(256);
        let headers = [HeaderField::new(b"x-token".to_vec(), b"abc".to_vec())];
        let mut block = Vec::new();
        encoder.encode(&headers, &mut block);
        let decoded = decoder.decode(&block).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn eviction_bounded_table_round_trip() {
        let mut encoder = HpackEncoder::with_table_size(64);
        let mut decoder = HpackDecoder::with_table_size(64);

        for i in 0..20 {
            let headers = [HeaderField::new(
                format!("x-header-{}", i).into_bytes(),
                b"some-longish-value".to_vec(),
            )];
            let mut block = Vec::new();
            encoder.encode(&headers, &mut block);
            let decoded = decoder.decode(&block).unwrap();
            assert_eq!(decoded, headers);
        }
    }
}
