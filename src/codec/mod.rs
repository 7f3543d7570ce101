//! Byte-level formats: the framed serialization buffer, the chunk record
//! layouts, and the cache file header.

pub mod buffer;
pub mod cache_header;
pub mod records;

pub use buffer::{SerialReader, SerialWriter};
pub use cache_header::{CacheHeader, SectionSpan};

/// Input type shared by every binary parser in the crate.
pub type Stream<'a> = &'a [u8];

/// Result of a binary parse step: the remaining input plus the parsed value.
pub type ParserResult<'a, T> =
    Result<(Stream<'a>, T), winnow::error::ErrMode<winnow::error::ContextError>>;
