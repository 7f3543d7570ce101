//! Interning tables mapping symbolic names and attribute values to small
//! integer IDs. Name tables are seeded with a well-known range and extend
//! into an unknown range as the parser meets new names; both ranges persist
//! bit-stable through the cache.

pub mod known;

use std::collections::HashMap;

use crate::codec::{SerialReader, SerialWriter};

/// First ID handed out for a name that is not in the seeded table. Leaves
/// headroom under it for future seeded names without colliding with unknown
/// IDs already persisted in caches.
pub const UNKNOWN_BASE: u16 = 0x0400;

/// Largest mintable name or value ID.
pub const MAX_ID: u16 = 0xfffe;

/// Sentinel attribute-value ID meaning "attribute absent".
pub const ATTR_VALUE_NONE: u16 = 0xffff;

const NAME_TABLE_MAGIC: &[u8] = b"ITBL";
const VALUE_TABLE_MAGIC: &[u8] = b"VTBL";

/// Bidirectional name ↔ ID map. ID zero is reserved ("none" or "any"
/// depending on context).
pub struct InternTable {
    label: &'static str,
    by_name: HashMap<String, u16>,
    by_id: HashMap<u16, String>,
    next_unknown: u16,
}

impl InternTable {
    pub fn with_seed<'a>(label: &'static str, seed: impl IntoIterator<Item = &'a str>) -> Self {
        let mut table = Self {
            label,
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            next_unknown: UNKNOWN_BASE,
        };
        for (index, name) in seed.into_iter().enumerate() {
            let id = index as u16 + 1;
            debug_assert!(id < UNKNOWN_BASE, "seed table overflows the known range");
            table.by_name.insert(name.to_owned(), id);
            table.by_id.insert(id, name.to_owned());
        }
        table
    }

    /// Existing ID of `name`, or a freshly minted unknown ID. ID zero comes
    /// back only when the unknown range is exhausted.
    pub fn id_of(&mut self, name: &str) -> u16 {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        if self.next_unknown > MAX_ID {
            tracing::error!(table = self.label, name, "intern table id space exhausted");
            return 0;
        }
        let id = self.next_unknown;
        self.next_unknown += 1;
        tracing::trace!(table = self.label, name, id, "interned unknown name");
        self.by_name.insert(name.to_owned(), id);
        self.by_id.insert(id, name.to_owned());
        id
    }

    /// Lookup without interning.
    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: u16) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn serialize(&self, writer: &mut SerialWriter) {
        writer.put_magic(NAME_TABLE_MAGIC);
        writer.put_u16(self.next_unknown);
        writer.put_u32(self.by_id.len() as u32);
        let mut entries: Vec<(&u16, &String)> = self.by_id.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        for (id, name) in entries {
            writer.put_u16(*id);
            writer.put_string(name);
        }
        writer.put_crc();
    }

    /// Restores a serialized table. Returns `None` on framing or checksum
    /// damage; the reader's sticky error state is latched either way.
    pub fn deserialize(label: &'static str, reader: &mut SerialReader<'_>) -> Option<Self> {
        if !reader.check_magic(NAME_TABLE_MAGIC) {
            return None;
        }
        let next_unknown = reader.get_u16();
        let count = reader.get_u32() as usize;
        let mut by_name = HashMap::with_capacity(count);
        let mut by_id = HashMap::with_capacity(count);
        for _ in 0..count {
            let id = reader.get_u16();
            let name = reader.get_string();
            if !reader.ok() {
                return None;
            }
            by_name.insert(name.clone(), id);
            by_id.insert(id, name);
        }
        if !reader.check_crc() {
            return None;
        }
        Some(Self {
            label,
            by_name,
            by_id,
            next_unknown,
        })
    }
}

/// Interning table for attribute value strings. IDs are dense indices minted
/// from zero; [`ATTR_VALUE_NONE`] never collides with a real value.
#[derive(Default)]
pub struct AttrValueTable {
    values: Vec<String>,
    index: HashMap<String, u16>,
}

impl AttrValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_of(&mut self, value: &str) -> u16 {
        if let Some(&id) = self.index.get(value) {
            return id;
        }
        if self.values.len() > MAX_ID as usize {
            tracing::error!("attribute value table exhausted");
            return ATTR_VALUE_NONE;
        }
        let id = self.values.len() as u16;
        self.values.push(value.to_owned());
        self.index.insert(value.to_owned(), id);
        id
    }

    pub fn value_of(&self, id: u16) -> Option<&str> {
        if id == ATTR_VALUE_NONE {
            return None;
        }
        self.values.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn serialize(&self, writer: &mut SerialWriter) {
        writer.put_magic(VALUE_TABLE_MAGIC);
        writer.put_u32(self.values.len() as u32);
        for value in &self.values {
            writer.put_string(value);
        }
        writer.put_crc();
    }

    pub fn deserialize(reader: &mut SerialReader<'_>) -> Option<Self> {
        if !reader.check_magic(VALUE_TABLE_MAGIC) {
            return None;
        }
        let count = reader.get_u32() as usize;
        let mut table = Self::default();
        for _ in 0..count {
            let value = reader.get_string();
            if !reader.ok() {
                return None;
            }
            let id = table.values.len() as u16;
            table.index.insert(value.clone(), id);
            table.values.push(value);
        }
        if !reader.check_crc() {
            return None;
        }
        Some(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_then_unknown_ids() {
        let mut table = InternTable::with_seed("test", ["alpha", "beta"]);
        assert_eq!(table.id_of("alpha"), 1);
        assert_eq!(table.id_of("beta"), 2);
        assert_eq!(table.id_of("gamma"), UNKNOWN_BASE);
        assert_eq!(table.id_of("delta"), UNKNOWN_BASE + 1);
        // Interning is idempotent.
        assert_eq!(table.id_of("gamma"), UNKNOWN_BASE);
        assert_eq!(table.name_of(UNKNOWN_BASE), Some("gamma"));
        assert_eq!(table.name_of(0), None);
    }

    #[test]
    fn serialization_preserves_ids() {
        let mut table = InternTable::with_seed("test", ["alpha", "beta"]);
        let gamma = table.id_of("gamma");
        let delta = table.id_of("delta");

        let mut writer = SerialWriter::new();
        table.serialize(&mut writer);
        let bytes = writer.into_bytes();

        let mut reader = SerialReader::new(&bytes);
        let mut restored = InternTable::deserialize("test", &mut reader).expect("restore");
        assert!(reader.ok());

        assert_eq!(restored.lookup("alpha"), Some(1));
        assert_eq!(restored.lookup("gamma"), Some(gamma));
        assert_eq!(restored.lookup("delta"), Some(delta));
        // The unknown counter resumes where it left off.
        assert_eq!(restored.id_of("epsilon"), delta + 1);
    }

    #[test]
    fn corrupt_table_rejected() {
        let mut table = InternTable::with_seed("test", ["alpha"]);
        table.id_of("omega");

        let mut writer = SerialWriter::new();
        table.serialize(&mut writer);
        let mut bytes = writer.into_bytes().to_vec();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;

        let mut reader = SerialReader::new(&bytes);
        let restored = InternTable::deserialize("test", &mut reader);
        assert!(restored.is_none() || !reader.ok());
    }

    #[test]
    fn value_table_round_trip() {
        let mut values = AttrValueTable::new();
        let a = values.id_of("left");
        let b = values.id_of("right");
        assert_eq!(values.id_of("left"), a);
        assert_eq!(values.value_of(b), Some("right"));
        assert_eq!(values.value_of(ATTR_VALUE_NONE), None);

        let mut writer = SerialWriter::new();
        values.serialize(&mut writer);
        let bytes = writer.into_bytes();

        let mut reader = SerialReader::new(&bytes);
        let restored = AttrValueTable::deserialize(&mut reader).expect("restore");
        assert_eq!(restored.value_of(a), Some("left"));
        assert_eq!(restored.value_of(b), Some("right"));
        assert_eq!(restored.len(), 2);
    }
}
