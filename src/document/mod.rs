//! The document container: owns the intern tables, both chunk storages, the
//! tiny-node table, and the style/font caches, and bootstraps the root
//! element. The uniform node API lives in [`facade`], cache I/O in [`cache`].

mod cache;
mod facade;

pub use cache::{CacheError, CacheMetadata};
pub(crate) use facade::same_node;

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::dom::caches::{FontData, RefCache, StyleData};
use crate::dom::handle::NodeHandle;
use crate::dom::node::{ElemData, ElemNode};
use crate::dom::table::NodeTable;
use crate::intern::known;
use crate::intern::{AttrValueTable, InternTable};
use crate::storage::{ChunkStorage, RecordKind, StorageStats};
use crate::xptr::{PointerParseError, XPointerEx};

const STYLE_CACHE_CAPACITY: usize = 2048;
const FONT_CACHE_CAPACITY: usize = 1024;

pub struct Document {
    pub(crate) elem_names: InternTable,
    pub(crate) attr_names: InternTable,
    pub(crate) ns_names: InternTable,
    pub(crate) attr_values: AttrValueTable,

    pub(crate) nodes: NodeTable,
    // Reads promote MRU entries and may inflate parked chunks, so the
    // storages sit behind RefCell to keep the read API on `&self`.
    pub(crate) text_storage: RefCell<ChunkStorage>,
    pub(crate) elem_storage: RefCell<ChunkStorage>,

    pub(crate) styles: RefCache<StyleData>,
    pub(crate) fonts: RefCache<FontData>,

    props: BTreeMap<String, String>,
    pagination: Vec<u8>,

    root: NodeHandle,
    /// When set, freshly inserted text children go straight into chunk
    /// storage instead of a heap buffer.
    persistent_text: bool,
}

impl Document {
    pub fn new() -> Self {
        let mut nodes = NodeTable::new();
        let root = nodes.alloc_elem(ElemNode::Mutable(Box::new(ElemData::new(
            0,
            0,
            NodeHandle::NULL,
        ))));
        debug_assert_eq!(root.raw(), 17);

        Self {
            elem_names: known::element_names(),
            attr_names: known::attribute_names(),
            ns_names: known::namespace_names(),
            attr_values: AttrValueTable::new(),
            nodes,
            text_storage: RefCell::new(ChunkStorage::new(RecordKind::Text)),
            elem_storage: RefCell::new(ChunkStorage::new(RecordKind::Element)),
            styles: RefCache::new(STYLE_CACHE_CAPACITY),
            fonts: RefCache::new(FONT_CACHE_CAPACITY),
            props: BTreeMap::new(),
            pagination: Vec::new(),
            root,
            persistent_text: true,
        }
    }

    /// The root element. Always live, always an element, never destroyed.
    pub fn root(&self) -> NodeHandle {
        self.nodes.canonical(self.root)
    }

    /// Controls whether new text children are created persistent.
    pub fn set_persistent_text(&mut self, enabled: bool) {
        self.persistent_text = enabled;
    }

    pub(crate) fn persistent_text(&self) -> bool {
        self.persistent_text
    }

    pub fn set_prop(&mut self, key: &str, value: &str) {
        self.props.insert(key.to_owned(), value.to_owned());
    }

    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    pub(crate) fn props(&self) -> &BTreeMap<String, String> {
        &self.props
    }

    /// Opaque pagination blob produced by the rendering collaborator; stored
    /// verbatim in the cache.
    pub fn set_pagination_blob(&mut self, blob: Vec<u8>) {
        self.pagination = blob;
    }

    pub fn pagination_blob(&self) -> &[u8] {
        &self.pagination
    }

    /// Interns symbolic names for the builder.
    pub fn elem_name_id(&mut self, name: &str) -> u16 {
        self.elem_names.id_of(name)
    }

    pub fn attr_name_id(&mut self, name: &str) -> u16 {
        self.attr_names.id_of(name)
    }

    pub fn ns_name_id(&mut self, name: &str) -> u16 {
        self.ns_names.id_of(name)
    }

    /// Converts every remaining mutable node to persistent form. Text nodes
    /// go first so element records reference already-final text records.
    pub fn persist_all(&mut self) {
        for handle in self.nodes.text_handles() {
            if !handle.persistent_bit() {
                self.persist(handle);
            }
        }
        for handle in self.nodes.elem_handles() {
            if !handle.persistent_bit() {
                self.persist(handle);
            }
        }
        tracing::debug!(
            elements = self.nodes.elem_count(),
            texts = self.nodes.text_count(),
            "document persisted"
        );
    }

    /// Asks both storages to park cold chunks down to the working-set
    /// budget.
    pub fn compact(&self) {
        self.text_storage.borrow_mut().compact(0);
        self.elem_storage.borrow_mut().compact(0);
        let text = self.text_storage.borrow().stats();
        let elem = self.elem_storage.borrow().stats();
        tracing::debug!(?text, ?elem, "storage compacted");
    }

    pub fn text_storage_stats(&self) -> StorageStats {
        self.text_storage.borrow().stats()
    }

    pub fn elem_storage_stats(&self) -> StorageStats {
        self.elem_storage.borrow().stats()
    }

    /// Parses an XPointer path string against this document.
    pub fn create_xpointer(&self, path: &str) -> Result<XPointerEx, PointerParseError> {
        XPointerEx::parse(self, path)
    }

    /// Verifies the structural invariants: parent/child symmetry, nibble
    /// agreement, and root uniqueness. Returns a list of human-readable
    /// defects; with the `strict` feature any defect panics.
    pub fn check_consistency(&self) -> Vec<String> {
        let mut defects = Vec::new();

        for handle in self.nodes.elem_handles() {
            if handle == self.root() {
                if !self.parent(handle).is_null() {
                    defects.push(format!("root {handle:?} has a parent"));
                }
                continue;
            }
            self.check_linkage(handle, &mut defects);
        }
        for handle in self.nodes.text_handles() {
            self.check_linkage(handle, &mut defects);
        }

        if !defects.is_empty() {
            tracing::error!(count = defects.len(), "consistency check failed");
            #[cfg(feature = "strict")]
            panic!("document consistency check failed: {defects:?}");
        }
        defects
    }

    fn check_linkage(&self, handle: NodeHandle, defects: &mut Vec<String>) {
        let parent = self.parent(handle);
        if parent.is_null() {
            defects.push(format!("{handle:?} is orphaned"));
            return;
        }
        if !parent.is_element() {
            defects.push(format!("{handle:?} has a non-element parent"));
            return;
        }
        let occurrences = (0..self.child_count(parent))
            .filter(|&i| same_node(self.child(parent, i), handle))
            .count();
        if occurrences != 1 {
            defects.push(format!(
                "{handle:?} appears {occurrences} times in its parent's child list"
            ));
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_document_has_root_17() {
        let doc = Document::new();
        let root = doc.root();
        assert_eq!(root.raw(), 17);
        assert!(root.is_element());
        assert!(doc.parent(root).is_null());
        assert!(doc.is_root(root));
        assert_eq!(doc.child_count(root), 0);
    }

    #[test]
    fn props_round_trip() {
        let mut doc = Document::new();
        doc.set_prop("doc.title", "A Book");
        assert_eq!(doc.prop("doc.title"), Some("A Book"));
        assert_eq!(doc.prop("missing"), None);
    }

    #[test]
    fn fresh_document_is_consistent() {
        let doc = Document::new();
        assert!(doc.check_consistency().is_empty());
    }
}
