//! The tiny-node table: per-kind slabs handing out stable slot indices.
//! Freed slots are recycled through the slab's internal free list, so a
//! recycled node reuses the old slot index exactly as handles encode it.

use slab::Slab;

use crate::dom::handle::NodeHandle;
use crate::dom::node::{ElemNode, TextNode};

pub(crate) struct NodeTable {
    text: Slab<TextNode>,
    elems: Slab<ElemNode>,
}

impl NodeTable {
    /// Creates the two slabs with slot zero of each permanently reserved, so
    /// no live node ever gets the null handle and the first element lands in
    /// slot 1.
    pub(crate) fn new() -> Self {
        let mut text = Slab::with_capacity(64);
        let mut elems = Slab::with_capacity(64);
        let text_zero = text.insert(TextNode::Reserved);
        let elem_zero = elems.insert(ElemNode::Reserved);
        debug_assert_eq!(text_zero, 0);
        debug_assert_eq!(elem_zero, 0);
        Self { text, elems }
    }

    pub(crate) fn alloc_text(&mut self, node: TextNode) -> NodeHandle {
        let persistent = node.is_persistent();
        let slot = self.text.insert(node);
        NodeHandle::text(slot, persistent)
    }

    pub(crate) fn alloc_elem(&mut self, node: ElemNode) -> NodeHandle {
        let persistent = node.is_persistent();
        let slot = self.elems.insert(node);
        NodeHandle::element(slot, persistent)
    }

    /// Installs a node at a specific slot, growing the slab as needed. Cache
    /// loading places records by their stored data index; interleaved inserts
    /// keep the slab's free list coherent by filling gaps with placeholders
    /// that the remaining records overwrite.
    pub(crate) fn place_text(&mut self, slot: usize, node: TextNode) {
        while self.text.len() <= slot {
            let filler = self.text.insert(TextNode::Persistent {
                addr: crate::dom::handle::StorageAddress::new(0, 0),
            });
            debug_assert!(filler < slot + 1);
        }
        self.text[slot] = node;
    }

    pub(crate) fn place_elem(&mut self, slot: usize, node: ElemNode) {
        while self.elems.len() <= slot {
            let filler = self.elems.insert(ElemNode::Persistent {
                addr: crate::dom::handle::StorageAddress::new(0, 0),
                style_slot: crate::dom::caches::CACHE_SLOT_NONE,
                font_slot: crate::dom::caches::CACHE_SLOT_NONE,
            });
            debug_assert!(filler < slot + 1);
        }
        self.elems[slot] = node;
    }

    /// Drops every slot (other than the reserved zero slots) not named in
    /// the keep sets. Cache loading over-allocates filler slots for the gaps
    /// left by freed records; this returns them to the free lists.
    pub(crate) fn retain_slots(
        &mut self,
        text_keep: &std::collections::HashSet<usize>,
        elem_keep: &std::collections::HashSet<usize>,
    ) {
        let drop_text: Vec<usize> = self
            .text
            .iter()
            .map(|(slot, _)| slot)
            .filter(|slot| *slot != 0 && !text_keep.contains(slot))
            .collect();
        for slot in drop_text {
            self.text.remove(slot);
        }
        let drop_elems: Vec<usize> = self
            .elems
            .iter()
            .map(|(slot, _)| slot)
            .filter(|slot| *slot != 0 && !elem_keep.contains(slot))
            .collect();
        for slot in drop_elems {
            self.elems.remove(slot);
        }
    }

    /// Frees a slot, returning its payload. The slot index goes back on the
    /// slab's free list for reuse.
    pub(crate) fn free_text(&mut self, handle: NodeHandle) -> Option<TextNode> {
        debug_assert!(handle.is_text());
        self.text.try_remove(handle.slot())
    }

    pub(crate) fn free_elem(&mut self, handle: NodeHandle) -> Option<ElemNode> {
        debug_assert!(handle.is_element());
        self.elems.try_remove(handle.slot())
    }

    pub(crate) fn text(&self, handle: NodeHandle) -> Option<&TextNode> {
        if !handle.is_text() {
            return None;
        }
        match self.text.get(handle.slot()) {
            Some(TextNode::Reserved) | None => None,
            Some(node) => Some(node),
        }
    }

    pub(crate) fn text_mut(&mut self, handle: NodeHandle) -> Option<&mut TextNode> {
        if !handle.is_text() {
            return None;
        }
        match self.text.get_mut(handle.slot()) {
            Some(TextNode::Reserved) | None => None,
            Some(node) => Some(node),
        }
    }

    pub(crate) fn elem(&self, handle: NodeHandle) -> Option<&ElemNode> {
        if !handle.is_element() {
            return None;
        }
        match self.elems.get(handle.slot()) {
            Some(ElemNode::Reserved) | None => None,
            Some(node) => Some(node),
        }
    }

    pub(crate) fn elem_mut(&mut self, handle: NodeHandle) -> Option<&mut ElemNode> {
        if !handle.is_element() {
            return None;
        }
        match self.elems.get_mut(handle.slot()) {
            Some(ElemNode::Reserved) | None => None,
            Some(node) => Some(node),
        }
    }

    /// Canonical handle for a live slot: the persistent bit always reflects
    /// the current variant.
    pub(crate) fn canonical(&self, handle: NodeHandle) -> NodeHandle {
        if handle.is_element() {
            match self.elem(handle) {
                Some(node) => NodeHandle::element(handle.slot(), node.is_persistent()),
                None => NodeHandle::NULL,
            }
        } else if handle.is_text() {
            match self.text(handle) {
                Some(node) => NodeHandle::text(handle.slot(), node.is_persistent()),
                None => NodeHandle::NULL,
            }
        } else {
            NodeHandle::NULL
        }
    }

    pub(crate) fn text_handles(&self) -> Vec<NodeHandle> {
        self.text
            .iter()
            .filter(|(slot, node)| *slot != 0 && !matches!(node, TextNode::Reserved))
            .map(|(slot, node)| NodeHandle::text(slot, node.is_persistent()))
            .collect()
    }

    pub(crate) fn elem_handles(&self) -> Vec<NodeHandle> {
        self.elems
            .iter()
            .filter(|(slot, node)| *slot != 0 && !matches!(node, ElemNode::Reserved))
            .map(|(slot, node)| NodeHandle::element(slot, node.is_persistent()))
            .collect()
    }

    pub(crate) fn text_count(&self) -> usize {
        self.text.len() - 1
    }

    pub(crate) fn elem_count(&self) -> usize {
        self.elems.len() - 1
    }
}
