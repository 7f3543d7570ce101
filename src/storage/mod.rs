//! Chunked record storage. One manager per record kind packs variable-sized
//! records into 64 KiB chunks, keeps a hot working set uncompressed, and
//! parks everything else as zlib images.

mod chunk;

use flate2::Compression;

use crate::codec::{SerialReader, SerialWriter};
use crate::dom::handle::StorageAddress;
use chunk::Chunk;

/// Chunk capacity in bytes.
pub const CHUNK_SIZE: usize = 0x1_0000;

/// Total uncompressed buffer budget per manager (roughly eight chunks).
pub const MAX_UNCOMPRESSED: usize = 0x8_0000;

/// zlib level for parked chunks.
pub(crate) const COMPRESSION_LEVEL: Compression = Compression::new(6);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Text,
    Element,
}

impl RecordKind {
    fn label(self) -> &'static str {
        match self {
            RecordKind::Text => "text",
            RecordKind::Element => "element",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0} byte record does not fit into an empty chunk")]
    RecordTooLarge(usize),

    #[error("invalid storage address {0:?}")]
    BadAddress(StorageAddress),

    #[error("chunk address space exhausted")]
    AddressSpaceExhausted,

    #[error("failed to inflate chunk {chunk}: {source}")]
    Inflate {
        chunk: usize,
        source: std::io::Error,
    },

    #[error("corrupt chunk {0}")]
    CorruptChunk(usize),
}

/// Memory accounting snapshot of one manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub chunk_count: usize,
    pub compressed_count: usize,
    pub uncompressed_bytes: usize,
    pub packed_bytes: usize,
}

pub struct ChunkStorage {
    kind: RecordKind,
    chunks: Vec<Chunk>,
    /// Chunk indexes, hottest first.
    mru: Vec<usize>,
    max_uncompressed: usize,
}

impl ChunkStorage {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            chunks: Vec::new(),
            mru: Vec::new(),
            max_uncompressed: MAX_UNCOMPRESSED,
        }
    }

    /// Appends a record, sealing the active chunk and opening a fresh one
    /// when it no longer fits. A sealed chunk is parked immediately; the MRU
    /// walk will inflate it again if it turns out to be hot.
    pub fn alloc(&mut self, rec: &[u8]) -> Result<StorageAddress, StorageError> {
        if rec.len() > CHUNK_SIZE {
            return Err(StorageError::RecordTooLarge(rec.len()));
        }

        if self
            .chunks
            .last()
            .map(|active| !active.has_room(rec.len()))
            .unwrap_or(true)
        {
            let chunk_index = self.chunks.len().wrapping_sub(1);
            if let Some(active) = self.chunks.last_mut() {
                tracing::debug!(
                    kind = self.kind.label(),
                    chunk = chunk_index,
                    "sealing full chunk"
                );
                active.seal();
                active.compact();
            }
            if self.chunks.len() > u16::MAX as usize {
                return Err(StorageError::AddressSpaceExhausted);
            }
            self.chunks.push(Chunk::new(self.chunks.len()));
        }

        let index = self.chunks.len() - 1;
        let offset = self.chunks[index].append(rec);
        self.promote(index);
        Ok(StorageAddress::new(index, offset))
    }

    /// Resolves an address to its record bytes. Promotes the chunk to the
    /// head of the MRU order and inflates it if it was parked; the returned
    /// borrow stays valid until the next storage call.
    pub fn get(&mut self, addr: StorageAddress) -> Result<&[u8], StorageError> {
        let index = self.check(addr)?;
        self.promote(index);
        self.ensure_unpacked(index)?;
        self.chunks[index]
            .record(addr.byte_offset())
            .ok_or(StorageError::BadAddress(addr))
    }

    /// Mutable access to a record for in-place field overwrites. Marks the
    /// chunk modified, which discards any stale packed image.
    pub fn get_mut(&mut self, addr: StorageAddress) -> Result<&mut [u8], StorageError> {
        let index = self.check(addr)?;
        self.promote(index);
        self.ensure_unpacked(index)?;
        self.chunks[index]
            .record_mut(addr.byte_offset())
            .ok_or(StorageError::BadAddress(addr))
    }

    /// Re-types the addressed record as a freed hole.
    pub fn free(&mut self, addr: StorageAddress) -> Result<(), StorageError> {
        let rec = self.get_mut(addr)?;
        crate::codec::records::mark_no_data(rec);
        Ok(())
    }

    /// Flags the addressed chunk as modified without touching a record.
    pub fn modified(&mut self, addr: StorageAddress) -> Result<(), StorageError> {
        let index = self.check(addr)?;
        self.ensure_unpacked(index)?;
        self.chunks[index].mark_modified();
        Ok(())
    }

    /// Parks cold chunks until the uncompressed working set (plus `reserve`
    /// bytes of headroom) fits the budget. The active chunk and the chunk at
    /// `keep` are never parked.
    pub fn compact(&mut self, reserve: usize) {
        self.compact_keeping(reserve, None);
    }

    fn compact_keeping(&mut self, reserve: usize, keep: Option<usize>) {
        let budget = self.max_uncompressed.saturating_sub(reserve);
        let active = self.chunks.len().checked_sub(1);
        let mut kept = 0usize;
        for rank in 0..self.mru.len() {
            let index = self.mru[rank];
            if self.chunks[index].is_compressed() {
                continue;
            }
            if Some(index) == active || Some(index) == keep {
                kept += self.chunks[index].len();
                continue;
            }
            kept += self.chunks[index].len();
            if kept > budget {
                tracing::trace!(
                    kind = self.kind.label(),
                    chunk = index,
                    "parking cold chunk"
                );
                self.chunks[index].compact();
                kept -= self.chunks[index].len();
            }
        }
    }

    fn ensure_unpacked(&mut self, index: usize) -> Result<(), StorageError> {
        if self.chunks[index].is_compressed() {
            // Free headroom first so the inflate does not blow the budget.
            self.compact_keeping(CHUNK_SIZE, Some(index));
            self.chunks[index].unpack()?;
        }
        Ok(())
    }

    fn check(&self, addr: StorageAddress) -> Result<usize, StorageError> {
        let index = addr.chunk();
        if index >= self.chunks.len() {
            return Err(StorageError::BadAddress(addr));
        }
        Ok(index)
    }

    fn promote(&mut self, index: usize) {
        if self.mru.first() == Some(&index) {
            return;
        }
        self.mru.retain(|&i| i != index);
        self.mru.insert(0, index);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn stats(&self) -> StorageStats {
        let mut stats = StorageStats {
            chunk_count: self.chunks.len(),
            ..StorageStats::default()
        };
        for chunk in &self.chunks {
            if chunk.is_compressed() {
                stats.compressed_count += 1;
            } else {
                stats.uncompressed_bytes += chunk.len();
            }
            stats.packed_bytes += chunk.packed_len();
        }
        stats
    }

    /// Walks every live record across all chunks in storage order.
    pub fn for_each_record(
        &mut self,
        mut visit: impl FnMut(StorageAddress, &[u8]),
    ) -> Result<(), StorageError> {
        for index in 0..self.chunks.len() {
            self.ensure_unpacked(index)?;
            let chunk = &self.chunks[index];
            chunk.for_each_record(|offset, rec| {
                visit(StorageAddress::new(index, offset), rec);
            })?;
            self.chunks[index].drop_unpacked();
        }
        Ok(())
    }

    /// Writes `{chunk_count:u32, [len:u32, bytes..]*}` with every chunk in
    /// uncompressed form. Parked chunks are inflated for the write and parked
    /// again afterwards.
    pub fn serialize(&mut self, writer: &mut SerialWriter) -> Result<(), StorageError> {
        writer.put_u32(self.chunks.len() as u32);
        for index in 0..self.chunks.len() {
            let was_parked = self.chunks[index].is_compressed();
            self.ensure_unpacked(index)?;
            let bytes = self.chunks[index].bytes().unwrap_or(&[]);
            writer.put_u32(bytes.len() as u32);
            writer.put_bytes(bytes);
            if was_parked {
                self.chunks[index].drop_unpacked();
            }
        }
        Ok(())
    }

    /// Rebuilds a manager from the serialized form. Every chunk comes back
    /// sealed; subsequent allocations open fresh chunks.
    pub fn deserialize(kind: RecordKind, reader: &mut SerialReader<'_>) -> Option<Self> {
        let count = reader.get_u32() as usize;
        if count > u16::MAX as usize + 1 {
            return None;
        }
        let mut chunks = Vec::with_capacity(count);
        for index in 0..count {
            let len = reader.get_u32() as usize;
            if len > CHUNK_SIZE || !reader.ok() {
                return None;
            }
            let bytes = reader.get_bytes(len);
            if !reader.ok() {
                return None;
            }
            chunks.push(Chunk::adopt(index, bytes.to_vec()));
        }
        let mru = (0..count).collect();
        Some(Self {
            kind,
            chunks,
            mru,
            max_uncompressed: MAX_UNCOMPRESSED,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::records::{
        encode_text_record, rec_data_index, rec_parent_index, set_parent_index, text_bytes,
    };

    fn text_rec(i: u32, text: &str) -> Vec<u8> {
        encode_text_record(i << 4, 0x11, text)
    }

    #[test]
    fn alloc_spills_into_new_chunks() {
        let mut storage = ChunkStorage::new(RecordKind::Text);
        let payload = "x".repeat(100);
        let mut addrs = Vec::new();
        for i in 0..2000u32 {
            addrs.push(storage.alloc(&text_rec(i, &payload)).expect("alloc"));
        }

        // 2000 records at 128 bytes each: just under four chunks.
        let expected = (2000 * 128 + CHUNK_SIZE - 1) / CHUNK_SIZE;
        assert_eq!(storage.chunk_count(), expected);

        // All sealed chunks parked, the active one left hot.
        let stats = storage.stats();
        assert_eq!(stats.compressed_count, expected - 1);
        assert!(stats.uncompressed_bytes <= MAX_UNCOMPRESSED);

        // Reads survive the seal/park cycle.
        for (i, addr) in addrs.iter().enumerate() {
            let rec = storage.get(*addr).expect("get");
            assert_eq!(rec_data_index(rec), (i as u32) << 4);
            assert_eq!(text_bytes(rec), payload.as_bytes());
        }
    }

    #[test]
    fn get_after_compact_returns_original_bytes() {
        let mut storage = ChunkStorage::new(RecordKind::Text);
        let addr = storage.alloc(&text_rec(2, "persistent words")).expect("alloc");
        let original = storage.get(addr).expect("get").to_vec();

        // Fill enough records that the first chunk seals and parks.
        let filler = "f".repeat(400);
        for i in 0..300u32 {
            storage.alloc(&text_rec(100 + i, &filler)).expect("alloc");
        }
        assert!(storage.stats().compressed_count >= 1);
        storage.compact(MAX_UNCOMPRESSED * 2);
        let restored = storage.get(addr).expect("get after compact");
        assert_eq!(restored, original.as_slice());
    }

    #[test]
    fn in_place_mutation_survives_repacking() {
        let mut storage = ChunkStorage::new(RecordKind::Text);
        let addr = storage.alloc(&text_rec(2, "hello")).expect("alloc");

        set_parent_index(storage.get_mut(addr).expect("get_mut"), 0x51);
        storage.compact(MAX_UNCOMPRESSED * 2);

        let rec = storage.get(addr).expect("get");
        assert_eq!(rec_parent_index(rec), 0x51);
    }

    #[test]
    fn freed_records_are_skipped() {
        let mut storage = ChunkStorage::new(RecordKind::Text);
        let a = storage.alloc(&text_rec(2, "one")).expect("alloc");
        let b = storage.alloc(&text_rec(3, "two")).expect("alloc");
        let c = storage.alloc(&text_rec(4, "three")).expect("alloc");
        storage.free(b).expect("free");

        let mut seen = Vec::new();
        storage
            .for_each_record(|addr, rec| seen.push((addr, rec_data_index(rec))))
            .expect("walk");
        assert_eq!(seen, vec![(a, 2 << 4), (c, 4 << 4)]);
    }

    #[test]
    fn serialize_round_trip() {
        let mut storage = ChunkStorage::new(RecordKind::Text);
        let payload = "y".repeat(200);
        let mut addrs = Vec::new();
        for i in 0..600u32 {
            addrs.push(storage.alloc(&text_rec(i, &payload)).expect("alloc"));
        }

        let mut writer = SerialWriter::new();
        storage.serialize(&mut writer).expect("serialize");
        let bytes = writer.into_bytes();

        let mut reader = SerialReader::new(&bytes);
        let mut restored =
            ChunkStorage::deserialize(RecordKind::Text, &mut reader).expect("deserialize");
        assert!(reader.ok());
        assert_eq!(restored.chunk_count(), storage.chunk_count());

        for addr in addrs {
            let expected = storage.get(addr).expect("get").to_vec();
            assert_eq!(restored.get(addr).expect("restored get"), expected.as_slice());
        }

        // Restored chunks are sealed: new records go to a new chunk.
        let before = restored.chunk_count();
        restored.alloc(&text_rec(9999, "fresh")).expect("alloc");
        assert_eq!(restored.chunk_count(), before + 1);
    }

    #[test]
    fn oversized_record_rejected() {
        let mut storage = ChunkStorage::new(RecordKind::Text);
        let huge = "z".repeat(CHUNK_SIZE);
        assert!(matches!(
            storage.alloc(&encode_text_record(0x20, 0, &huge)),
            Err(StorageError::RecordTooLarge(_))
        ));
    }
}
