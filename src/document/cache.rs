//! Document cache I/O. A cache file is the fixed header block followed by
//! four sections (properties, ID tables, the pagination blob, and the raw
//! chunk data of both storages), each bracketed by its own magic and CRC and
//! padded to 4 KiB. Loading validates everything before touching the
//! document; any damage fails the load cleanly and the caller re-parses the
//! source instead.

use std::collections::{BTreeMap, HashSet};

use flate2::Crc;

use crate::codec::{CacheHeader, SectionSpan, SerialReader, SerialWriter};
use crate::dom::caches::CACHE_SLOT_NONE;
use crate::dom::handle::NodeHandle;
use crate::dom::node::{ElemNode, TextNode};
use crate::dom::table::NodeTable;
use crate::intern::{AttrValueTable, InternTable};
use crate::storage::{ChunkStorage, RecordKind, StorageError};
use crate::version::{CACHE_HEADER_SIZE, CACHE_SECTION_ALIGN};

use super::Document;

const PROPS_MAGIC: &[u8] = b"PRPS";
const IDTABLE_MAGIC: &[u8] = b"IDTB";
const PAGETABLE_MAGIC: &[u8] = b"PGTB";
const DATA_MAGIC: &[u8] = b"DATA";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache header is invalid or damaged")]
    BadHeader,

    #[error("cache file truncated")]
    Truncated,

    #[error("cache section {0:?} failed validation")]
    BadSection(&'static str),

    #[error("cache data region checksum mismatch")]
    DataCrcMismatch,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Identity of the source document and the render settings the cache was
/// produced under. Stored in the header so a stale cache (source changed,
/// different render geometry) can be rejected without reading the body.
#[derive(Clone, Debug, Default)]
pub struct CacheMetadata {
    pub src_file_size: u32,
    pub src_file_crc32: u32,
    pub src_file_name: String,
    pub render_dx: u32,
    pub render_dy: u32,
    pub render_docflags: u32,
    pub render_style_hash: u32,
}

impl Document {
    /// Serializes the whole document into a cache image. Every node is
    /// persisted first; the returned buffer is what the cache directory
    /// collaborator writes to disk.
    pub fn save_cache(&mut self, meta: &CacheMetadata) -> Result<Vec<u8>, CacheError> {
        self.persist_all();

        let props = self.encode_props_section();
        let idtables = self.encode_idtable_section();
        let pagetable = self.encode_pagetable_section();
        let data = self.encode_data_section()?;

        let mut data_crc = Crc::new();
        data_crc.update(&data);

        let props_span = SectionSpan::new(CACHE_HEADER_SIZE as u32, props.len() as u32);
        let idtable_span = SectionSpan::new(props_span.end(), idtables.len() as u32);
        let pagetable_span = SectionSpan::new(idtable_span.end(), pagetable.len() as u32);
        let data_span = SectionSpan::new(pagetable_span.end(), data.len() as u32);

        let header = CacheHeader {
            src_file_size: meta.src_file_size,
            src_file_crc32: meta.src_file_crc32,
            props: props_span,
            idtable: idtable_span,
            pagetable: pagetable_span,
            data: data_span,
            data_crc32: data_crc.sum(),
            data_index_size: (self.nodes.elem_count() + self.nodes.text_count()) as u32,
            file_size: data_span.end(),
            render_dx: meta.render_dx,
            render_dy: meta.render_dy,
            render_docflags: meta.render_docflags,
            render_style_hash: meta.render_style_hash,
            src_file_name: meta.src_file_name.clone(),
        };

        let mut out = header.encode();
        out.extend_from_slice(&props);
        out.extend_from_slice(&idtables);
        out.extend_from_slice(&pagetable);
        out.extend_from_slice(&data);
        debug_assert_eq!(out.len() as u32, header.file_size);

        tracing::debug!(
            size = out.len(),
            nodes = header.data_index_size,
            "cache image written"
        );
        Ok(out)
    }

    /// Reconstructs a document from a cache image produced by
    /// [`save_cache`]. Validation failures leave no partial state behind.
    ///
    /// [`save_cache`]: Document::save_cache
    pub fn load_cache(bytes: &[u8]) -> Result<Document, CacheError> {
        let (_, header) = CacheHeader::parse(bytes).map_err(|err| {
            tracing::warn!(?err, "cache header rejected");
            CacheError::BadHeader
        })?;
        if header.file_size as usize != bytes.len() {
            return Err(CacheError::Truncated);
        }

        let props_bytes = section_slice(bytes, &header.props)?;
        let idtable_bytes = section_slice(bytes, &header.idtable)?;
        let pagetable_bytes = section_slice(bytes, &header.pagetable)?;
        let data_bytes = section_slice(bytes, &header.data)?;

        let mut data_crc = Crc::new();
        data_crc.update(data_bytes);
        if data_crc.sum() != header.data_crc32 {
            return Err(CacheError::DataCrcMismatch);
        }

        let props = decode_props_section(props_bytes)?;
        let (elem_names, attr_names, ns_names, attr_values) =
            decode_idtable_section(idtable_bytes)?;
        let pagination = decode_pagetable_section(pagetable_bytes)?;
        let (text_storage, elem_storage) = decode_data_section(data_bytes)?;

        let mut doc = Document {
            elem_names,
            attr_names,
            ns_names,
            attr_values,
            nodes: NodeTable::new(),
            text_storage: std::cell::RefCell::new(text_storage),
            elem_storage: std::cell::RefCell::new(elem_storage),
            styles: crate::dom::caches::RefCache::new(super::STYLE_CACHE_CAPACITY),
            fonts: crate::dom::caches::RefCache::new(super::FONT_CACHE_CAPACITY),
            props,
            pagination,
            root: NodeHandle::element(1, true),
            persistent_text: true,
        };
        doc.rebuild_node_table()?;

        tracing::debug!(
            elements = doc.nodes.elem_count(),
            texts = doc.nodes.text_count(),
            "cache image loaded"
        );
        Ok(doc)
    }

    fn encode_props_section(&self) -> Vec<u8> {
        let mut writer = SerialWriter::new();
        writer.put_magic(PROPS_MAGIC);
        writer.put_u32(self.props().len() as u32);
        for (key, value) in self.props() {
            writer.put_string(key);
            writer.put_string(value);
        }
        writer.put_crc();
        writer.pad_to(CACHE_SECTION_ALIGN);
        writer.into_bytes().to_vec()
    }

    fn encode_idtable_section(&self) -> Vec<u8> {
        let mut writer = SerialWriter::new();
        writer.put_magic(IDTABLE_MAGIC);
        writer.put_crc();
        self.elem_names.serialize(&mut writer);
        self.attr_names.serialize(&mut writer);
        self.ns_names.serialize(&mut writer);
        self.attr_values.serialize(&mut writer);
        writer.pad_to(CACHE_SECTION_ALIGN);
        writer.into_bytes().to_vec()
    }

    fn encode_pagetable_section(&self) -> Vec<u8> {
        let mut writer = SerialWriter::new();
        writer.put_magic(PAGETABLE_MAGIC);
        writer.put_u32(self.pagination_blob().len() as u32);
        writer.put_bytes(self.pagination_blob());
        writer.put_crc();
        writer.pad_to(CACHE_SECTION_ALIGN);
        writer.into_bytes().to_vec()
    }

    fn encode_data_section(&self) -> Result<Vec<u8>, CacheError> {
        let mut writer = SerialWriter::new();
        writer.put_magic(DATA_MAGIC);
        self.text_storage.borrow_mut().serialize(&mut writer)?;
        self.elem_storage.borrow_mut().serialize(&mut writer)?;
        writer.put_crc();
        writer.pad_to(CACHE_SECTION_ALIGN);
        Ok(writer.into_bytes().to_vec())
    }

    /// Walks every record in both storages and places each node into the
    /// tiny-node slot named by its stored data index.
    fn rebuild_node_table(&mut self) -> Result<(), CacheError> {
        use crate::codec::records;

        let mut text_slots = HashSet::new();
        let mut placements = Vec::new();
        self.text_storage
            .borrow_mut()
            .for_each_record(|addr, rec| {
                placements.push((records::rec_data_index(rec), addr));
            })?;
        for (data_index, addr) in placements {
            let handle = NodeHandle::from_raw(data_index);
            if !handle.is_text() || handle.slot() == 0 {
                return Err(CacheError::BadSection("data"));
            }
            self.nodes
                .place_text(handle.slot(), TextNode::Persistent { addr });
            text_slots.insert(handle.slot());
        }

        let mut elem_slots = HashSet::new();
        let mut placements = Vec::new();
        self.elem_storage
            .borrow_mut()
            .for_each_record(|addr, rec| {
                placements.push((records::rec_data_index(rec), addr));
            })?;
        for (data_index, addr) in placements {
            let handle = NodeHandle::from_raw(data_index);
            if !handle.is_element() || handle.slot() == 0 {
                return Err(CacheError::BadSection("data"));
            }
            self.nodes.place_elem(
                handle.slot(),
                ElemNode::Persistent {
                    addr,
                    style_slot: CACHE_SLOT_NONE,
                    font_slot: CACHE_SLOT_NONE,
                },
            );
            elem_slots.insert(handle.slot());
        }

        // Freed records leave gaps in the slot space; drop the fillers so
        // those slots return to the free list.
        self.nodes.retain_slots(&text_slots, &elem_slots);

        if !elem_slots.contains(&1) {
            return Err(CacheError::BadSection("data"));
        }
        Ok(())
    }
}

fn section_slice<'a>(bytes: &'a [u8], span: &SectionSpan) -> Result<&'a [u8], CacheError> {
    let start = span.offset as usize;
    let end = span.end() as usize;
    if start < CACHE_HEADER_SIZE || end > bytes.len() || start > end {
        return Err(CacheError::Truncated);
    }
    Ok(&bytes[start..end])
}

fn decode_props_section(bytes: &[u8]) -> Result<BTreeMap<String, String>, CacheError> {
    let mut reader = SerialReader::new(bytes);
    if !reader.check_magic(PROPS_MAGIC) {
        return Err(CacheError::BadSection("props"));
    }
    let count = reader.get_u32() as usize;
    let mut props = BTreeMap::new();
    for _ in 0..count {
        let key = reader.get_string();
        let value = reader.get_string();
        if !reader.ok() {
            return Err(CacheError::BadSection("props"));
        }
        props.insert(key, value);
    }
    if !reader.check_crc() {
        return Err(CacheError::BadSection("props"));
    }
    Ok(props)
}

type IdTables = (InternTable, InternTable, InternTable, AttrValueTable);

fn decode_idtable_section(bytes: &[u8]) -> Result<IdTables, CacheError> {
    let mut reader = SerialReader::new(bytes);
    if !reader.check_magic(IDTABLE_MAGIC) || !reader.check_crc() {
        return Err(CacheError::BadSection("idtable"));
    }
    let elem_names = InternTable::deserialize("elements", &mut reader)
        .ok_or(CacheError::BadSection("idtable"))?;
    let attr_names = InternTable::deserialize("attributes", &mut reader)
        .ok_or(CacheError::BadSection("idtable"))?;
    let ns_names = InternTable::deserialize("namespaces", &mut reader)
        .ok_or(CacheError::BadSection("idtable"))?;
    let attr_values =
        AttrValueTable::deserialize(&mut reader).ok_or(CacheError::BadSection("idtable"))?;
    Ok((elem_names, attr_names, ns_names, attr_values))
}

fn decode_pagetable_section(bytes: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut reader = SerialReader::new(bytes);
    if !reader.check_magic(PAGETABLE_MAGIC) {
        return Err(CacheError::BadSection("pagetable"));
    }
    let len = reader.get_u32() as usize;
    let blob = reader.get_bytes(len).to_vec();
    if !reader.ok() || !reader.check_crc() {
        return Err(CacheError::BadSection("pagetable"));
    }
    Ok(blob)
}

fn decode_data_section(bytes: &[u8]) -> Result<(ChunkStorage, ChunkStorage), CacheError> {
    let mut reader = SerialReader::new(bytes);
    if !reader.check_magic(DATA_MAGIC) {
        return Err(CacheError::BadSection("data"));
    }
    let text_storage = ChunkStorage::deserialize(RecordKind::Text, &mut reader)
        .ok_or(CacheError::BadSection("data"))?;
    let elem_storage = ChunkStorage::deserialize(RecordKind::Element, &mut reader)
        .ok_or(CacheError::BadSection("data"))?;
    if !reader.check_crc() {
        return Err(CacheError::BadSection("data"));
    }
    Ok((text_storage, elem_storage))
}
