//! HPACK header compression (RFC 7541).
//!
//! HPACK is the header compression used by HTTP/2:
//! - a static table of 61 common header fields
//! - a size-bounded dynamic table of recently seen headers
//! - Huffman coding for string literals
//! - a variable-length prefix integer encoding
//!
//! One encoder and one decoder exist per connection and are never shared
//! across connections; both carry mutable dynamic tables.

mod decode;
mod encode;
mod huffman;
mod table;

pub use decode::{HpackDecoder, HpackError};
pub use encode::{HpackEncoder, Indexing};
pub use table::{HeaderField, StaticTable};

/// Default dynamic table size (4096 bytes).
pub const DEFAULT_TABLE_SIZE: usize = 4096;
