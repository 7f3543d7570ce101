//! A single storage chunk: a 64 KiB buffer of 16-aligned records that can be
//! parked as a zlib image while cold and inflated back on demand.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::codec::records;
use crate::storage::{StorageError, CHUNK_SIZE, COMPRESSION_LEVEL};

/// Compressed (or raw, when deflate did not help) image of a chunk's
/// contents.
struct PackedImage {
    deflated: bool,
    bytes: Vec<u8>,
    unpacked_len: usize,
}

pub(crate) struct Chunk {
    index: usize,
    /// Uncompressed contents; `None` while the chunk is parked.
    data: Option<Vec<u8>>,
    packed: Option<PackedImage>,
    sealed: bool,
    /// Set on every mutation; a modified chunk's packed image is stale and
    /// gets discarded.
    modified: bool,
}

impl Chunk {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            data: Some(Vec::with_capacity(CHUNK_SIZE)),
            packed: None,
            sealed: false,
            modified: false,
        }
    }

    /// Wraps a buffer restored from a cache file. The chunk comes back
    /// sealed: cache data only ever grows through fresh chunks.
    pub(crate) fn adopt(index: usize, bytes: Vec<u8>) -> Self {
        Self {
            index,
            data: Some(bytes),
            packed: None,
            sealed: true,
            modified: false,
        }
    }

    /// Used bytes, whether or not the chunk is currently inflated.
    pub(crate) fn len(&self) -> usize {
        match (&self.data, &self.packed) {
            (Some(data), _) => data.len(),
            (None, Some(packed)) => packed.unpacked_len,
            (None, None) => 0,
        }
    }

    pub(crate) fn is_compressed(&self) -> bool {
        self.data.is_none() && self.packed.is_some()
    }

    pub(crate) fn packed_len(&self) -> usize {
        self.packed.as_ref().map(|p| p.bytes.len()).unwrap_or(0)
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    pub(crate) fn has_room(&self, size: usize) -> bool {
        !self.sealed && self.len() + size <= CHUNK_SIZE
    }

    /// Appends an encoded record (already 16-aligned) and returns its byte
    /// offset. The caller checks `has_room` first.
    pub(crate) fn append(&mut self, rec: &[u8]) -> usize {
        debug_assert_eq!(rec.len() % 16, 0);
        debug_assert!(self.has_room(rec.len()));
        let data = self.data.as_mut().expect("active chunk is unpacked");
        let offset = data.len();
        data.extend_from_slice(rec);
        self.modified = true;
        self.packed = None;
        offset
    }

    /// Parks the chunk: keeps (or rebuilds) the packed image and frees the
    /// uncompressed buffer. A deflate failure or an incompressible payload
    /// stores the raw bytes as the image, so the inflate path never
    /// special-cases.
    pub(crate) fn compact(&mut self) {
        let Some(data) = self.data.take() else {
            return;
        };
        if data.is_empty() {
            self.data = Some(data);
            return;
        }
        if !self.modified && self.packed.is_some() {
            // Existing image is still current.
            return;
        }

        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), COMPRESSION_LEVEL);
        let mut deflated = None;
        if encoder.write_all(&data).is_ok() {
            match encoder.finish() {
                Ok(out) if out.len() < data.len() => deflated = Some(out),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(chunk = self.index, %err, "chunk deflate failed")
                }
            }
        }

        let image = match deflated {
            Some(bytes) => {
                tracing::trace!(
                    chunk = self.index,
                    raw = data.len(),
                    packed = bytes.len(),
                    "chunk compacted"
                );
                PackedImage {
                    deflated: true,
                    bytes,
                    unpacked_len: data.len(),
                }
            }
            None => {
                tracing::debug!(chunk = self.index, len = data.len(), "chunk stored raw");
                PackedImage {
                    deflated: false,
                    unpacked_len: data.len(),
                    bytes: data,
                }
            }
        };
        self.packed = Some(image);
        self.modified = false;
    }

    /// Inflates a parked chunk back into an owned buffer. The packed image is
    /// retained so an unmodified chunk can be parked again for free.
    pub(crate) fn unpack(&mut self) -> Result<(), StorageError> {
        if self.data.is_some() {
            return Ok(());
        }
        let Some(packed) = &self.packed else {
            return Ok(());
        };

        let data = if packed.deflated {
            let mut out = Vec::with_capacity(packed.unpacked_len);
            let mut decoder = ZlibDecoder::new(packed.bytes.as_slice());
            decoder
                .read_to_end(&mut out)
                .map_err(|source| StorageError::Inflate {
                    chunk: self.index,
                    source,
                })?;
            if out.len() != packed.unpacked_len {
                return Err(StorageError::CorruptChunk(self.index));
            }
            out
        } else {
            packed.bytes.clone()
        };

        tracing::trace!(chunk = self.index, len = data.len(), "chunk inflated");
        self.data = Some(data);
        Ok(())
    }

    /// Invalidates the packed image after an in-place mutation. Only legal on
    /// an inflated chunk.
    pub(crate) fn mark_modified(&mut self) {
        debug_assert!(self.data.is_some(), "modified a parked chunk");
        self.modified = true;
        self.packed = None;
    }

    /// Drops the uncompressed buffer when a current packed image exists.
    /// No-op otherwise.
    pub(crate) fn drop_unpacked(&mut self) {
        if !self.modified && self.packed.is_some() {
            self.data = None;
        }
    }

    pub(crate) fn bytes(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Borrow of one record starting at `offset`. `None` when the offset is
    /// out of bounds or the chunk is parked.
    pub(crate) fn record(&self, offset: usize) -> Option<&[u8]> {
        let data = self.data.as_deref()?;
        if offset + records::REC_HEADER_SIZE > data.len() {
            return None;
        }
        let size = records::rec_size(&data[offset..]);
        if size == 0 || offset + size > data.len() {
            return None;
        }
        Some(&data[offset..offset + size])
    }

    /// Mutable borrow of one record; invalidates the packed image.
    pub(crate) fn record_mut(&mut self, offset: usize) -> Option<&mut [u8]> {
        self.record(offset)?;
        self.mark_modified();
        let data = self.data.as_deref_mut()?;
        let size = records::rec_size(&data[offset..]);
        Some(&mut data[offset..offset + size])
    }

    /// Walks live records in offset order, skipping freed holes. Returns an
    /// error on a zero-size record, which can only mean corruption.
    pub(crate) fn for_each_record(
        &self,
        mut visit: impl FnMut(usize, &[u8]),
    ) -> Result<(), StorageError> {
        let Some(data) = self.data.as_deref() else {
            return Ok(());
        };
        let mut offset = 0;
        while offset + records::REC_HEADER_SIZE <= data.len() {
            let size = records::rec_size(&data[offset..]);
            if size == 0 {
                tracing::error!(
                    chunk = self.index,
                    offset,
                    len = data.len(),
                    "zero-size record, aborting chunk walk"
                );
                return Err(StorageError::CorruptChunk(self.index));
            }
            if offset + size > data.len() {
                return Err(StorageError::CorruptChunk(self.index));
            }
            if records::rec_type(&data[offset..]) != records::REC_NO_DATA {
                visit(offset, &data[offset..offset + size]);
            }
            offset += size;
        }
        Ok(())
    }
}
