//! The uniform node API. Every operation takes a [`NodeHandle`] and works on
//! whichever representation the node currently has; persistent nodes are
//! converted to mutable form on demand where a mutation requires it.
//!
//! Per the error model, these methods do not return `Result`: structural
//! misuse (null handles, out-of-range indices, kind mismatches) yields a
//! sentinel value (the null handle, zero, or the empty string) and trips a
//! debug assertion.

use std::rc::Rc;

use crate::codec::records;
use crate::dom::caches::{FontData, StyleData, CACHE_SLOT_NONE};
use crate::dom::handle::NodeHandle;
use crate::dom::node::{Attribute, ElemData, ElemNode, RendMethod, RenderRect, TextNode};
use crate::intern::ATTR_VALUE_NONE;

use super::Document;

/// Same node regardless of either handle's persistent bit.
pub(crate) fn same_node(a: NodeHandle, b: NodeHandle) -> bool {
    !a.is_null() && !b.is_null() && a.slot() == b.slot() && a.is_element() == b.is_element()
}

impl Document {
    /// Canonical form of a handle: null for dead slots, otherwise the
    /// persistent bit matches the node's current variant.
    pub fn canonical(&self, handle: NodeHandle) -> NodeHandle {
        self.nodes.canonical(handle)
    }

    /// Whether the node currently lives in chunk storage. Authoritative,
    /// unlike the handle's own persistent bit.
    pub fn is_persistent(&self, handle: NodeHandle) -> bool {
        self.canonical(handle).persistent_bit()
    }

    pub fn is_root(&self, handle: NodeHandle) -> bool {
        same_node(handle, self.root())
    }

    pub fn parent(&self, handle: NodeHandle) -> NodeHandle {
        if handle.is_text() {
            match self.nodes.text(handle) {
                Some(TextNode::Mutable { parent, .. }) => self.canonical(*parent),
                Some(TextNode::Persistent { addr }) => {
                    let addr = *addr;
                    let mut storage = self.text_storage.borrow_mut();
                    match storage.get(addr) {
                        Ok(rec) => {
                            let raw = records::rec_parent_index(rec);
                            drop(storage);
                            self.canonical(NodeHandle::from_raw(raw))
                        }
                        Err(err) => {
                            tracing::error!(?handle, %err, "parent lookup failed");
                            NodeHandle::NULL
                        }
                    }
                }
                _ => NodeHandle::NULL,
            }
        } else if handle.is_element() {
            match self.nodes.elem(handle) {
                Some(ElemNode::Mutable(data)) => self.canonical(data.parent),
                Some(ElemNode::Persistent { addr, .. }) => {
                    let addr = *addr;
                    let mut storage = self.elem_storage.borrow_mut();
                    match storage.get(addr) {
                        Ok(rec) => {
                            let raw = records::rec_parent_index(rec);
                            drop(storage);
                            self.canonical(NodeHandle::from_raw(raw))
                        }
                        Err(err) => {
                            tracing::error!(?handle, %err, "parent lookup failed");
                            NodeHandle::NULL
                        }
                    }
                }
                _ => NodeHandle::NULL,
            }
        } else {
            NodeHandle::NULL
        }
    }

    /// Child count; always zero for text nodes.
    pub fn child_count(&self, handle: NodeHandle) -> usize {
        match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => data.children.len(),
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let mut storage = self.elem_storage.borrow_mut();
                match storage.get(addr) {
                    Ok(rec) => records::elem_child_count(rec),
                    Err(err) => {
                        tracing::error!(?handle, %err, "child count failed");
                        0
                    }
                }
            }
            _ => 0,
        }
    }

    /// The i-th child, or null when out of range (and for text nodes).
    pub fn child(&self, handle: NodeHandle, index: usize) -> NodeHandle {
        match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => data
                .children
                .get(index)
                .map(|&c| self.canonical(c))
                .unwrap_or(NodeHandle::NULL),
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let mut storage = self.elem_storage.borrow_mut();
                let raw = match storage.get(addr) {
                    Ok(rec) if index < records::elem_child_count(rec) => {
                        records::elem_child(rec, index)
                    }
                    Ok(_) => return NodeHandle::NULL,
                    Err(err) => {
                        tracing::error!(?handle, %err, "child lookup failed");
                        return NodeHandle::NULL;
                    }
                };
                drop(storage);
                self.canonical(NodeHandle::from_raw(raw))
            }
            _ => NodeHandle::NULL,
        }
    }

    pub fn children(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => {
                data.children.iter().map(|&c| self.canonical(c)).collect()
            }
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let raw = {
                    let mut storage = self.elem_storage.borrow_mut();
                    match storage.get(addr) {
                        Ok(rec) => records::elem_children(rec),
                        Err(err) => {
                            tracing::error!(?handle, %err, "children lookup failed");
                            return Vec::new();
                        }
                    }
                };
                raw.into_iter()
                    .map(|r| self.canonical(NodeHandle::from_raw(r)))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn index_in_parent(&self, handle: NodeHandle) -> Option<usize> {
        let parent = self.parent(handle);
        if parent.is_null() {
            return None;
        }
        self.children(parent)
            .iter()
            .position(|&c| same_node(c, handle))
    }

    pub fn node_name_id(&self, handle: NodeHandle) -> u16 {
        match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => data.name_id,
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let mut storage = self.elem_storage.borrow_mut();
                storage.get(addr).map(records::elem_name_id).unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn node_ns_id(&self, handle: NodeHandle) -> u16 {
        match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => data.ns_id,
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let mut storage = self.elem_storage.borrow_mut();
                storage.get(addr).map(records::elem_ns_id).unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn node_name(&self, handle: NodeHandle) -> &str {
        self.elem_names
            .name_of(self.node_name_id(handle))
            .unwrap_or("")
    }

    pub fn node_ns_name(&self, handle: NodeHandle) -> &str {
        self.ns_names
            .name_of(self.node_ns_id(handle))
            .unwrap_or("")
    }

    /// Re-tags an element. Requires mutable form; persistent receivers are
    /// converted first.
    pub fn set_node_id(&mut self, handle: NodeHandle, ns_id: u16, name_id: u16) {
        debug_assert!(handle.is_element(), "set_node_id on a non-element");
        if self.nodes.elem(handle).is_none() {
            return;
        }
        self.modify(handle);
        if let Some(ElemNode::Mutable(data)) = self.nodes.elem_mut(handle) {
            data.ns_id = ns_id;
            data.name_id = name_id;
        }
    }

    pub fn attribute_count(&self, handle: NodeHandle) -> usize {
        match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => data.attrs.len(),
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let mut storage = self.elem_storage.borrow_mut();
                storage.get(addr).map(records::elem_attr_count).unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Attribute value, or the empty string when absent. `ns_id` zero
    /// matches any namespace.
    pub fn attribute(&self, handle: NodeHandle, ns_id: u16, name_id: u16) -> &str {
        let value_id = match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => data
                .find_attr(ns_id, name_id)
                .map(|a| a.value_id)
                .unwrap_or(ATTR_VALUE_NONE),
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let mut storage = self.elem_storage.borrow_mut();
                storage
                    .get(addr)
                    .ok()
                    .and_then(|rec| records::elem_find_attr(rec, ns_id, name_id))
                    .unwrap_or(ATTR_VALUE_NONE)
            }
            _ => ATTR_VALUE_NONE,
        };
        self.attr_values.value_of(value_id).unwrap_or("")
    }

    pub fn attribute_by_name(&self, handle: NodeHandle, name: &str) -> &str {
        match self.attr_names.lookup(name) {
            Some(id) => self.attribute(handle, 0, id),
            None => "",
        }
    }

    /// Sets an attribute, replacing any previous value for `(ns_id,
    /// name_id)`. On a persistent receiver an existing attribute is updated
    /// in place inside the element record; only a brand-new attribute forces
    /// conversion to mutable form.
    pub fn set_attribute(&mut self, handle: NodeHandle, ns_id: u16, name_id: u16, value: &str) {
        debug_assert!(handle.is_element(), "set_attribute on a non-element");
        let value_id = self.attr_values.id_of(value);

        let persistent_addr = match self.nodes.elem(handle) {
            Some(ElemNode::Persistent { addr, .. }) => Some(*addr),
            Some(ElemNode::Mutable(_)) => None,
            _ => return,
        };
        if let Some(addr) = persistent_addr {
            let updated = {
                let mut storage = self.elem_storage.borrow_mut();
                match storage.get_mut(addr) {
                    Ok(rec) => records::set_attr_value(rec, ns_id, name_id, value_id),
                    Err(err) => {
                        tracing::error!(?handle, %err, "attribute update failed");
                        return;
                    }
                }
            };
            if updated {
                return;
            }
            self.modify(handle);
        }

        if let Some(ElemNode::Mutable(data)) = self.nodes.elem_mut(handle) {
            match data.find_attr_mut(ns_id, name_id) {
                Some(attr) => attr.value_id = value_id,
                None => data.attrs.push(Attribute {
                    ns_id,
                    name_id,
                    value_id,
                }),
            }
        }
    }

    /// Inserts a new mutable element child at `index` (clamped to the end)
    /// and returns its handle. The receiver is converted to mutable form if
    /// needed.
    pub fn insert_child_element(
        &mut self,
        parent: NodeHandle,
        index: usize,
        ns_id: u16,
        name_id: u16,
    ) -> NodeHandle {
        debug_assert!(parent.is_element(), "insert_child_element on a non-element");
        if self.nodes.elem(parent).is_none() {
            return NodeHandle::NULL;
        }
        self.modify(parent);

        let parent_c = self.canonical(parent);
        let child = self
            .nodes
            .alloc_elem(ElemNode::Mutable(Box::new(ElemData::new(
                ns_id, name_id, parent_c,
            ))));

        if let Some(ElemNode::Mutable(data)) = self.nodes.elem_mut(parent) {
            let at = index.min(data.children.len());
            data.children.insert(at, child);
        }
        child
    }

    pub fn append_child_element(&mut self, parent: NodeHandle, ns_id: u16, name_id: u16) -> NodeHandle {
        self.insert_child_element(parent, usize::MAX, ns_id, name_id)
    }

    /// Inserts a text child at `index` (clamped). New text goes straight to
    /// chunk storage when the persistent-text policy is on.
    pub fn insert_child_text(&mut self, parent: NodeHandle, index: usize, text: &str) -> NodeHandle {
        debug_assert!(parent.is_element(), "insert_child_text on a non-element");
        if self.nodes.elem(parent).is_none() {
            return NodeHandle::NULL;
        }
        self.modify(parent);

        let parent_c = self.canonical(parent);
        let child = self.nodes.alloc_text(TextNode::Mutable {
            parent: parent_c,
            text: text.to_owned(),
        });
        if self.persistent_text() {
            self.persist(child);
        }
        let child = self.canonical(child);

        if let Some(ElemNode::Mutable(data)) = self.nodes.elem_mut(parent) {
            let at = index.min(data.children.len());
            data.children.insert(at, child);
        }
        child
    }

    pub fn append_child_text(&mut self, parent: NodeHandle, text: &str) -> NodeHandle {
        self.insert_child_text(parent, usize::MAX, text)
    }

    /// Detaches the i-th child and returns it. The detached subtree is still
    /// alive; the caller owns it and eventually calls [`destroy`].
    ///
    /// [`destroy`]: Document::destroy
    pub fn remove_child(&mut self, parent: NodeHandle, index: usize) -> NodeHandle {
        debug_assert!(parent.is_element(), "remove_child on a non-element");
        if index >= self.child_count(parent) {
            debug_assert!(false, "remove_child index out of range");
            return NodeHandle::NULL;
        }
        self.modify(parent);

        let child = match self.nodes.elem_mut(parent) {
            Some(ElemNode::Mutable(data)) => data.children.remove(index),
            _ => return NodeHandle::NULL,
        };
        self.set_parent_link(child, NodeHandle::NULL);
        self.canonical(child)
    }

    /// Splices children `[lo..=hi]` of `src` onto the end of `dst`,
    /// reparenting each. Both elements are converted to mutable form.
    pub fn move_children_range(&mut self, src: NodeHandle, dst: NodeHandle, lo: usize, hi: usize) {
        debug_assert!(src.is_element() && dst.is_element());
        if lo > hi || hi >= self.child_count(src) || same_node(src, dst) {
            debug_assert!(false, "move_children_range bad range");
            return;
        }
        self.modify(src);
        self.modify(dst);

        let moved: Vec<NodeHandle> = match self.nodes.elem_mut(src) {
            Some(ElemNode::Mutable(data)) => data.children.drain(lo..=hi).collect(),
            _ => return,
        };

        let dst_c = self.canonical(dst);
        for &child in &moved {
            self.set_parent_link(child, dst_c);
        }
        if let Some(ElemNode::Mutable(data)) = self.nodes.elem_mut(dst) {
            data.children.extend(moved);
        }
    }

    /// Rewrites a node's parent link in whichever representation it has.
    /// Persistent nodes get an in-place record overwrite.
    fn set_parent_link(&mut self, handle: NodeHandle, new_parent: NodeHandle) {
        if handle.is_text() {
            match self.nodes.text_mut(handle) {
                Some(TextNode::Mutable { parent, .. }) => *parent = new_parent,
                Some(TextNode::Persistent { addr }) => {
                    let addr = *addr;
                    let mut storage = self.text_storage.borrow_mut();
                    match storage.get_mut(addr) {
                        Ok(rec) => records::set_parent_index(rec, new_parent.raw()),
                        Err(err) => tracing::error!(?handle, %err, "reparent failed"),
                    }
                }
                _ => {}
            }
        } else if handle.is_element() {
            match self.nodes.elem_mut(handle) {
                Some(ElemNode::Mutable(data)) => data.parent = new_parent,
                Some(ElemNode::Persistent { addr, .. }) => {
                    let addr = *addr;
                    let mut storage = self.elem_storage.borrow_mut();
                    match storage.get_mut(addr) {
                        Ok(rec) => records::set_parent_index(rec, new_parent.raw()),
                        Err(err) => tracing::error!(?handle, %err, "reparent failed"),
                    }
                }
                _ => {}
            }
        }
    }

    /// Text content. For a text node this is its own buffer; for an element,
    /// the concatenation of all descendant text.
    pub fn text(&self, handle: NodeHandle) -> String {
        self.text_with_delimiter(handle, "")
    }

    /// Like [`text`], inserting `delim` between children rendered as blocks.
    ///
    /// [`text`]: Document::text
    pub fn text_with_delimiter(&self, handle: NodeHandle, delim: &str) -> String {
        let mut out = String::new();
        self.collect_text(handle, delim, &mut out);
        out
    }

    fn collect_text(&self, handle: NodeHandle, delim: &str, out: &mut String) {
        if handle.is_text() {
            match self.nodes.text(handle) {
                Some(TextNode::Mutable { text, .. }) => out.push_str(text),
                Some(TextNode::Persistent { addr }) => {
                    let addr = *addr;
                    let mut storage = self.text_storage.borrow_mut();
                    match storage.get(addr) {
                        Ok(rec) => {
                            out.push_str(&String::from_utf8_lossy(records::text_bytes(rec)))
                        }
                        Err(err) => tracing::error!(?handle, %err, "text read failed"),
                    }
                }
                _ => {}
            }
            return;
        }

        let mut prev_block = false;
        for (i, child) in self.children(handle).into_iter().enumerate() {
            let block = child.is_element() && self.rend_method(child).is_block();
            if i > 0 && !delim.is_empty() && (block || prev_block) && !out.is_empty() {
                out.push_str(delim);
            }
            self.collect_text(child, delim, out);
            prev_block = block;
        }
    }

    /// Replaces a text node's content. Persistent receivers are converted to
    /// mutable form first.
    pub fn set_text(&mut self, handle: NodeHandle, text: &str) {
        debug_assert!(handle.is_text(), "set_text on a non-text node");
        if self.nodes.text(handle).is_none() {
            return;
        }
        self.modify(handle);
        if let Some(TextNode::Mutable { text: buf, .. }) = self.nodes.text_mut(handle) {
            buf.clear();
            buf.push_str(text);
        }
    }

    pub fn rend_method(&self, handle: NodeHandle) -> RendMethod {
        match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => data.rend_method,
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let mut storage = self.elem_storage.borrow_mut();
                storage
                    .get(addr)
                    .map(|rec| RendMethod::from_u8(records::elem_rend_method(rec)))
                    .unwrap_or_default()
            }
            _ => RendMethod::default(),
        }
    }

    /// Sets the render method. Persistent receivers take an in-place record
    /// overwrite; no conversion happens.
    pub fn set_rend_method(&mut self, handle: NodeHandle, method: RendMethod) {
        match self.nodes.elem_mut(handle) {
            Some(ElemNode::Mutable(data)) => data.rend_method = method,
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let mut storage = self.elem_storage.borrow_mut();
                match storage.get_mut(addr) {
                    Ok(rec) => records::set_rend_method(rec, method as u8),
                    Err(err) => tracing::error!(?handle, %err, "rend method update failed"),
                }
            }
            _ => {}
        }
    }

    pub fn render_data(&self, handle: NodeHandle) -> RenderRect {
        match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => data.render,
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let mut storage = self.elem_storage.borrow_mut();
                storage
                    .get(addr)
                    .map(records::elem_render_data)
                    .unwrap_or_default()
            }
            _ => RenderRect::default(),
        }
    }

    /// Stores the cached layout rectangle. In-place on persistent records;
    /// the chunk is marked modified.
    pub fn set_render_data(&mut self, handle: NodeHandle, render: RenderRect) {
        match self.nodes.elem_mut(handle) {
            Some(ElemNode::Mutable(data)) => data.render = render,
            Some(ElemNode::Persistent { addr, .. }) => {
                let addr = *addr;
                let mut storage = self.elem_storage.borrow_mut();
                match storage.get_mut(addr) {
                    Ok(rec) => records::set_render_data(rec, &render),
                    Err(err) => tracing::error!(?handle, %err, "render data update failed"),
                }
            }
            _ => {}
        }
    }

    pub fn clear_render_data(&mut self, handle: NodeHandle) {
        self.set_render_data(handle, RenderRect::default());
    }

    pub fn style_slot(&self, handle: NodeHandle) -> u16 {
        match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => data.style_slot,
            Some(ElemNode::Persistent { style_slot, .. }) => *style_slot,
            _ => CACHE_SLOT_NONE,
        }
    }

    pub fn style(&self, handle: NodeHandle) -> Option<Rc<StyleData>> {
        self.styles.get(self.style_slot(handle))
    }

    /// Caches the style and records its slot on the element. Equal styles
    /// land in the same slot across the whole document.
    pub fn set_style(&mut self, handle: NodeHandle, style: StyleData) {
        let old = self.style_slot(handle);
        let slot = self.styles.cache(old, style);
        match self.nodes.elem_mut(handle) {
            Some(ElemNode::Mutable(data)) => data.style_slot = slot,
            Some(ElemNode::Persistent { style_slot, .. }) => *style_slot = slot,
            _ => {
                // No receiver: undo the reference we just took.
                self.styles.release(slot);
            }
        }
    }

    pub fn font_slot(&self, handle: NodeHandle) -> u16 {
        match self.nodes.elem(handle) {
            Some(ElemNode::Mutable(data)) => data.font_slot,
            Some(ElemNode::Persistent { font_slot, .. }) => *font_slot,
            _ => CACHE_SLOT_NONE,
        }
    }

    pub fn font(&self, handle: NodeHandle) -> Option<Rc<FontData>> {
        self.fonts.get(self.font_slot(handle))
    }

    pub fn set_font(&mut self, handle: NodeHandle, font: FontData) {
        let old = self.font_slot(handle);
        let slot = self.fonts.cache(old, font);
        match self.nodes.elem_mut(handle) {
            Some(ElemNode::Mutable(data)) => data.font_slot = slot,
            Some(ElemNode::Persistent { font_slot, .. }) => *font_slot = slot,
            _ => {
                self.fonts.release(slot);
            }
        }
    }

    /// Moves a mutable node's content into chunk storage and swaps the slot
    /// to the persistent variant. Idempotent; the handle's slot index never
    /// changes. Style and font slots ride along outside the record.
    pub fn persist(&mut self, handle: NodeHandle) {
        if handle.is_text() {
            let (parent, text) = match self.nodes.text(handle) {
                Some(TextNode::Mutable { parent, text }) => (*parent, text.clone()),
                _ => return,
            };
            let data_index = NodeHandle::text(handle.slot(), true);
            let rec = records::encode_text_record(
                data_index.raw(),
                self.canonical(parent).raw(),
                &text,
            );
            let addr = match self.text_storage.borrow_mut().alloc(&rec) {
                Ok(addr) => addr,
                Err(err) => {
                    tracing::warn!(?handle, %err, "text persist failed, keeping mutable");
                    return;
                }
            };
            if let Some(slot) = self.nodes.text_mut(handle) {
                *slot = TextNode::Persistent { addr };
            }
        } else if handle.is_element() {
            let data = match self.nodes.elem(handle) {
                Some(ElemNode::Mutable(data)) => data.as_ref().clone(),
                _ => return,
            };
            let data_index = NodeHandle::element(handle.slot(), true);
            let children: Vec<u32> = data
                .children
                .iter()
                .map(|&c| self.canonical(c).raw())
                .collect();
            let rec = records::encode_elem_record(
                data_index.raw(),
                self.canonical(data.parent).raw(),
                data.name_id,
                data.ns_id,
                data.rend_method as u8,
                &data.render,
                &children,
                &data.attrs,
            );
            let addr = match self.elem_storage.borrow_mut().alloc(&rec) {
                Ok(addr) => addr,
                Err(err) => {
                    tracing::warn!(?handle, %err, "element persist failed, keeping mutable");
                    return;
                }
            };
            if let Some(slot) = self.nodes.elem_mut(handle) {
                *slot = ElemNode::Persistent {
                    addr,
                    style_slot: data.style_slot,
                    font_slot: data.font_slot,
                };
            }
        }
    }

    /// Materializes a heap record from a persistent node's storage record,
    /// frees the record, and swaps the slot to the mutable variant.
    /// Idempotent; the inverse of [`persist`].
    ///
    /// [`persist`]: Document::persist
    pub fn modify(&mut self, handle: NodeHandle) {
        if handle.is_text() {
            let addr = match self.nodes.text(handle) {
                Some(TextNode::Persistent { addr }) => *addr,
                _ => return,
            };
            let (parent_raw, text) = {
                let mut storage = self.text_storage.borrow_mut();
                match storage.get(addr) {
                    Ok(rec) => (
                        records::rec_parent_index(rec),
                        String::from_utf8_lossy(records::text_bytes(rec)).into_owned(),
                    ),
                    Err(err) => {
                        tracing::error!(?handle, %err, "modify failed to read record");
                        return;
                    }
                }
            };
            if let Err(err) = self.text_storage.borrow_mut().free(addr) {
                tracing::error!(?handle, %err, "modify failed to free record");
            }
            if let Some(slot) = self.nodes.text_mut(handle) {
                *slot = TextNode::Mutable {
                    parent: NodeHandle::from_raw(parent_raw),
                    text,
                };
            }
        } else if handle.is_element() {
            let (addr, style_slot, font_slot) = match self.nodes.elem(handle) {
                Some(ElemNode::Persistent {
                    addr,
                    style_slot,
                    font_slot,
                }) => (*addr, *style_slot, *font_slot),
                _ => return,
            };
            let data = {
                let mut storage = self.elem_storage.borrow_mut();
                match storage.get(addr) {
                    Ok(rec) => ElemData {
                        ns_id: records::elem_ns_id(rec),
                        name_id: records::elem_name_id(rec),
                        parent: NodeHandle::from_raw(records::rec_parent_index(rec)),
                        children: records::elem_children(rec)
                            .into_iter()
                            .map(NodeHandle::from_raw)
                            .collect(),
                        attrs: records::elem_attrs(rec),
                        rend_method: RendMethod::from_u8(records::elem_rend_method(rec)),
                        render: records::elem_render_data(rec),
                        style_slot,
                        font_slot,
                    },
                    Err(err) => {
                        tracing::error!(?handle, %err, "modify failed to read record");
                        return;
                    }
                }
            };
            if let Err(err) = self.elem_storage.borrow_mut().free(addr) {
                tracing::error!(?handle, %err, "modify failed to free record");
            }
            if let Some(slot) = self.nodes.elem_mut(handle) {
                *slot = ElemNode::Mutable(Box::new(data));
            }
        }
    }

    /// Frees a detached subtree: storage records, style/font references, and
    /// tiny-node slots. The caller has already removed `handle` from its
    /// parent (or obtained it from [`remove_child`]). Uses an explicit work
    /// stack; badly OCR'd books can nest pathologically deep.
    ///
    /// [`remove_child`]: Document::remove_child
    pub fn destroy(&mut self, handle: NodeHandle) {
        if handle.is_null() {
            return;
        }
        debug_assert!(!self.is_root(handle), "destroying the root");

        let mut work = vec![handle];
        while let Some(current) = work.pop() {
            if current.is_text() {
                match self.nodes.free_text(current) {
                    Some(TextNode::Persistent { addr }) => {
                        if let Err(err) = self.text_storage.borrow_mut().free(addr) {
                            tracing::error!(?current, %err, "destroy failed to free record");
                        }
                    }
                    Some(_) => {}
                    None => tracing::warn!(?current, "destroy of a dead text node"),
                }
            } else if current.is_element() {
                work.extend(self.children(current));
                let (style_slot, font_slot) = match self.nodes.free_elem(current) {
                    Some(ElemNode::Mutable(data)) => (data.style_slot, data.font_slot),
                    Some(ElemNode::Persistent {
                        addr,
                        style_slot,
                        font_slot,
                    }) => {
                        if let Err(err) = self.elem_storage.borrow_mut().free(addr) {
                            tracing::error!(?current, %err, "destroy failed to free record");
                        }
                        (style_slot, font_slot)
                    }
                    Some(ElemNode::Reserved) | None => {
                        tracing::warn!(?current, "destroy of a dead element");
                        continue;
                    }
                };
                self.styles.release(style_slot);
                self.fonts.release(font_slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::known::{ATTR_ALIGN, ATTR_ID, EL_P, EL_SECTION, EL_TITLE};

    fn build_small_doc() -> (Document, NodeHandle, NodeHandle) {
        let mut doc = Document::new();
        let root = doc.root();
        let title = doc.append_child_element(root, 0, EL_TITLE);
        let p = doc.append_child_element(root, 0, EL_P);
        doc.append_child_text(p, "Hello");
        doc.insert_child_text(p, 0, " world");
        (doc, title, p)
    }

    #[test]
    fn insert_before_index_semantics() {
        let (doc, _title, p) = build_small_doc();
        let root = doc.root();
        assert_eq!(doc.child_count(root), 2);
        assert!(same_node(doc.child(root, 1), p));
        assert_eq!(doc.text(p), " worldHello");
    }

    #[test]
    fn parent_child_symmetry() {
        let (doc, title, p) = build_small_doc();
        let root = doc.root();
        assert!(same_node(doc.parent(title), root));
        assert!(same_node(doc.parent(p), root));
        assert_eq!(doc.index_in_parent(p), Some(1));
        let text = doc.child(p, 0);
        assert!(text.is_text());
        assert!(same_node(doc.parent(text), p));
        assert!(doc.check_consistency().is_empty());
    }

    #[test]
    fn persist_then_modify_is_identity() {
        let (mut doc, _title, p) = build_small_doc();
        doc.set_attribute(p, 0, ATTR_ID, "intro");
        doc.set_rend_method(p, RendMethod::Final);
        let render = RenderRect {
            x: 5,
            y: 10,
            width: 300,
            height: 42,
        };
        doc.set_render_data(p, render);
        doc.set_style(
            p,
            StyleData {
                font_size: 14,
                ..StyleData::default()
            },
        );

        let text_before = doc.text(p);
        let style_before = doc.style_slot(p);

        doc.persist(p);
        assert!(doc.is_persistent(p));
        // Observable state unchanged in persistent form.
        assert_eq!(doc.text(p), text_before);
        assert_eq!(doc.attribute(p, 0, ATTR_ID), "intro");
        assert_eq!(doc.rend_method(p), RendMethod::Final);
        assert_eq!(doc.render_data(p), render);
        assert_eq!(doc.style_slot(p), style_before);
        assert_eq!(doc.node_name_id(p), EL_P);

        doc.modify(p);
        assert!(!doc.is_persistent(p));
        assert_eq!(doc.text(p), text_before);
        assert_eq!(doc.attribute(p, 0, ATTR_ID), "intro");
        assert_eq!(doc.rend_method(p), RendMethod::Final);
        assert_eq!(doc.render_data(p), render);
        assert_eq!(doc.style_slot(p), style_before);
        assert!(doc.check_consistency().is_empty());
    }

    #[test]
    fn variant_switch_preserves_handles() {
        let (mut doc, _title, p) = build_small_doc();
        let before = doc.canonical(p);
        doc.persist(p);
        let after = doc.canonical(p);
        assert_eq!(before.slot(), after.slot());
        assert!(after.persistent_bit());
        // A stale handle still resolves.
        assert_eq!(doc.node_name_id(before), EL_P);
        // Both operations are idempotent.
        doc.persist(p);
        doc.modify(p);
        doc.modify(p);
        assert!(!doc.is_persistent(p));
    }

    #[test]
    fn persistent_attribute_updates_in_place() {
        let (mut doc, _title, p) = build_small_doc();
        doc.set_attribute(p, 0, ATTR_ALIGN, "left");
        doc.persist(p);

        // Existing attribute: updated inside the record, node stays
        // persistent.
        doc.set_attribute(p, 0, ATTR_ALIGN, "right");
        assert!(doc.is_persistent(p));
        assert_eq!(doc.attribute(p, 0, ATTR_ALIGN), "right");

        // New attribute: conversion to mutable form.
        doc.set_attribute(p, 0, ATTR_ID, "para");
        assert!(!doc.is_persistent(p));
        assert_eq!(doc.attribute(p, 0, ATTR_ID), "para");
        assert_eq!(doc.attribute(p, 0, ATTR_ALIGN), "right");
    }

    #[test]
    fn remove_child_detaches_and_destroy_frees() {
        let (mut doc, _title, p) = build_small_doc();
        let root = doc.root();
        let removed = doc.remove_child(root, 1);
        assert!(same_node(removed, p));
        assert_eq!(doc.child_count(root), 1);
        assert!(doc.parent(removed).is_null());

        doc.destroy(removed);
        assert!(doc.canonical(removed).is_null());
    }

    #[test]
    fn destroyed_slots_are_recycled() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = doc.append_child_element(root, 0, EL_P);
        let removed = doc.remove_child(root, 0);
        doc.destroy(removed);

        let b = doc.append_child_element(root, 0, EL_SECTION);
        assert_eq!(a.slot(), b.slot());
        assert_eq!(doc.node_name_id(b), EL_SECTION);
    }

    #[test]
    fn move_children_range_reparents() {
        let mut doc = Document::new();
        let root = doc.root();
        let src = doc.append_child_element(root, 0, EL_SECTION);
        let dst = doc.append_child_element(root, 0, EL_SECTION);
        for text in ["a", "b", "c", "d"] {
            doc.append_child_text(src, text);
        }

        doc.move_children_range(src, dst, 1, 2);
        assert_eq!(doc.child_count(src), 2);
        assert_eq!(doc.child_count(dst), 2);
        assert_eq!(doc.text(src), "ad");
        assert_eq!(doc.text(dst), "bc");
        for i in 0..2 {
            assert!(same_node(doc.parent(doc.child(dst, i)), dst));
        }
        assert!(doc.check_consistency().is_empty());
    }

    #[test]
    fn equal_styles_share_a_slot() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = doc.append_child_element(root, 0, EL_P);
        let b = doc.append_child_element(root, 0, EL_P);

        let style = StyleData {
            font_size: 12,
            flags: 3,
            ..StyleData::default()
        };
        doc.set_style(a, style.clone());
        doc.set_style(b, style);
        assert_eq!(doc.style_slot(a), doc.style_slot(b));
        assert!(Rc::ptr_eq(&doc.style(a).unwrap(), &doc.style(b).unwrap()));

        doc.set_style(
            b,
            StyleData {
                font_size: 16,
                ..StyleData::default()
            },
        );
        assert_ne!(doc.style_slot(a), doc.style_slot(b));
    }

    #[test]
    fn block_delimiters_in_text_collection() {
        let mut doc = Document::new();
        let root = doc.root();
        let body = doc.append_child_element(root, 0, EL_SECTION);
        let p1 = doc.append_child_element(body, 0, EL_P);
        doc.append_child_text(p1, "First");
        let p2 = doc.append_child_element(body, 0, EL_P);
        doc.append_child_text(p2, "Second");
        doc.set_rend_method(p1, RendMethod::Final);
        doc.set_rend_method(p2, RendMethod::Final);

        assert_eq!(doc.text(body), "FirstSecond");
        assert_eq!(doc.text_with_delimiter(body, "\n"), "First\nSecond");
    }

    #[test]
    fn null_handles_return_sentinels() {
        let doc = Document::new();
        let null = NodeHandle::NULL;
        assert_eq!(doc.child_count(null), 0);
        assert!(doc.child(null, 0).is_null());
        assert!(doc.parent(null).is_null());
        assert_eq!(doc.text(null), "");
        assert_eq!(doc.attribute(null, 0, ATTR_ID), "");
        assert_eq!(doc.node_name(null), "");
        assert_eq!(doc.style_slot(null), CACHE_SLOT_NONE);
    }

    #[test]
    fn text_nodes_have_no_children() {
        let (doc, _title, p) = build_small_doc();
        let text = doc.child(p, 0);
        assert_eq!(doc.child_count(text), 0);
        assert!(doc.child(text, 0).is_null());
    }

    #[test]
    fn set_text_on_persistent_node() {
        let (mut doc, _title, p) = build_small_doc();
        let text = doc.child(p, 0);
        assert!(doc.is_persistent(text));
        doc.set_text(text, "replaced");
        assert_eq!(doc.text(text), "replaced");
        assert_eq!(doc.text(p), "replacedHello");
    }
}
