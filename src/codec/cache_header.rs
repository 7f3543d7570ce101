//! The fixed-size header block at the start of every cache file. It names the
//! source document the cache was built from, locates the four payload
//! sections, and carries the render settings the cache was laid out under.
//! The whole populated prefix is covered by a trailing CRC32 and the block is
//! zero-padded out to 4 KiB.

use bytes::BufMut;
use flate2::Crc;
use winnow::binary::le_u32;
use winnow::error::{ContextError, ErrMode, ErrorKind, ParserError};
use winnow::token::{literal, take};
use winnow::Parser;

use crate::codec::{ParserResult, Stream};
use crate::version::{CACHE_FILE_MAGIC, CACHE_HEADER_SIZE};

/// Offset and size of one payload section within the cache file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectionSpan {
    pub offset: u32,
    pub size: u32,
}

impl SectionSpan {
    pub fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheHeader {
    pub src_file_size: u32,
    pub src_file_crc32: u32,
    pub props: SectionSpan,
    pub idtable: SectionSpan,
    pub pagetable: SectionSpan,
    pub data: SectionSpan,
    pub data_crc32: u32,
    pub data_index_size: u32,
    pub file_size: u32,
    pub render_dx: u32,
    pub render_dy: u32,
    pub render_docflags: u32,
    pub render_style_hash: u32,
    pub src_file_name: String,
}

impl CacheHeader {
    /// Encodes the header into its fixed 4 KiB block.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CACHE_HEADER_SIZE);
        out.put_slice(CACHE_FILE_MAGIC);
        out.put_u32_le(self.src_file_size);
        out.put_u32_le(self.src_file_crc32);
        for span in [&self.props, &self.idtable, &self.pagetable, &self.data] {
            out.put_u32_le(span.offset);
            out.put_u32_le(span.size);
        }
        out.put_u32_le(self.data_crc32);
        out.put_u32_le(self.data_index_size);
        out.put_u32_le(self.file_size);
        out.put_u32_le(self.render_dx);
        out.put_u32_le(self.render_dy);
        out.put_u32_le(self.render_docflags);
        out.put_u32_le(self.render_style_hash);
        out.put_u32_le(self.src_file_name.len() as u32);
        out.put_slice(self.src_file_name.as_bytes());

        let mut crc = Crc::new();
        crc.update(&out);
        out.put_u32_le(crc.sum());

        debug_assert!(out.len() <= CACHE_HEADER_SIZE, "header block overflow");
        out.resize(CACHE_HEADER_SIZE, 0);
        out
    }

    /// Parses a header block, verifying magic and the trailing CRC.
    pub fn parse(input: Stream<'_>) -> ParserResult<'_, Self> {
        let block_start = input;

        let (input, _) = literal(CACHE_FILE_MAGIC).parse_peek(input)?;
        let (input, src_file_size) = le_u32.parse_peek(input)?;
        let (input, src_file_crc32) = le_u32.parse_peek(input)?;

        let mut spans = [SectionSpan::default(); 4];
        let mut input = input;
        for span in spans.iter_mut() {
            let (rest, offset) = le_u32.parse_peek(input)?;
            let (rest, size) = le_u32.parse_peek(rest)?;
            *span = SectionSpan::new(offset, size);
            input = rest;
        }

        let (input, data_crc32) = le_u32.parse_peek(input)?;
        let (input, data_index_size) = le_u32.parse_peek(input)?;
        let (input, file_size) = le_u32.parse_peek(input)?;
        let (input, render_dx) = le_u32.parse_peek(input)?;
        let (input, render_dy) = le_u32.parse_peek(input)?;
        let (input, render_docflags) = le_u32.parse_peek(input)?;
        let (input, render_style_hash) = le_u32.parse_peek(input)?;

        let (input, name_len) = le_u32.parse_peek(input)?;
        let (input, name_bytes) = take(name_len).parse_peek(input)?;
        let src_file_name = match std::str::from_utf8(name_bytes) {
            Ok(name) => name.to_owned(),
            Err(_) => {
                let err = ContextError::from_error_kind(&input, ErrorKind::Verify);
                return Err(ErrMode::Cut(err));
            }
        };

        let covered = block_start.len() - input.len();
        let (input, stored_crc) = le_u32.parse_peek(input)?;

        let mut crc = Crc::new();
        crc.update(&block_start[..covered]);
        if crc.sum() != stored_crc {
            tracing::warn!(
                expected = stored_crc,
                actual = crc.sum(),
                "cache header checksum mismatch"
            );
            let err = ContextError::from_error_kind(&input, ErrorKind::Verify);
            return Err(ErrMode::Cut(err));
        }

        let header = CacheHeader {
            src_file_size,
            src_file_crc32,
            props: spans[0],
            idtable: spans[1],
            pagetable: spans[2],
            data: spans[3],
            data_crc32,
            data_index_size,
            file_size,
            render_dx,
            render_dy,
            render_docflags,
            render_style_hash,
            src_file_name,
        };

        Ok((input, header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> CacheHeader {
        CacheHeader {
            src_file_size: 123_456,
            src_file_crc32: 0xaabb_ccdd,
            props: SectionSpan::new(4096, 4096),
            idtable: SectionSpan::new(8192, 4096),
            pagetable: SectionSpan::new(12288, 4096),
            data: SectionSpan::new(16384, 65536),
            data_crc32: 0x1122_3344,
            data_index_size: 2048,
            file_size: 81920,
            render_dx: 600,
            render_dy: 800,
            render_docflags: 0x13,
            render_style_hash: 0xfeed_f00d,
            src_file_name: "books/war_and_peace.fb2".to_owned(),
        }
    }

    #[test]
    fn round_trip() {
        let header = sample_header();
        let block = header.encode();
        assert_eq!(block.len(), CACHE_HEADER_SIZE);

        let (_, parsed) = CacheHeader::parse(&block).expect("header parse");
        assert_eq!(parsed, header);
    }

    #[test]
    fn magic_mismatch_rejected() {
        let mut block = sample_header().encode();
        block[0] = b'X';
        assert!(CacheHeader::parse(&block).is_err());
    }

    #[test]
    fn crc_mismatch_rejected() {
        let mut block = sample_header().encode();
        // Flip a bit inside the covered region, past the magic.
        block[CACHE_FILE_MAGIC.len() + 2] ^= 0x40;
        assert!(CacheHeader::parse(&block).is_err());
    }
}
