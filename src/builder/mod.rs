//! SAX-driven DOM construction. An external tokenizer pushes open/attribute/
//! text/close events into a [`ParserSink`]; [`DomBuilder`] turns them into
//! tree nodes, persisting every element as it closes. The loose-markup
//! auto-close layer lives in [`autoclose`].

pub mod autoclose;

pub use autoclose::AutoCloseBuilder;

use crate::document::Document;
use crate::dom::handle::NodeHandle;
use crate::intern::known;
use crate::utils::is_whitespace_only;

/// Flag bits accepted by [`ParserSink::on_text`].
pub mod flags {
    /// Drop the event when the text is whitespace-only.
    pub const NO_SPACE_TEXT: u32 = 1 << 0;
    /// Preserve whitespace verbatim.
    pub const PRE: u32 = 1 << 1;
    /// Preserve whitespace and split paragraphs on blank lines (tokenizer
    /// concern; stored for completeness).
    pub const PRE_PARA_SPLITTING: u32 = 1 << 2;
    /// Trim leading and trailing whitespace off the event text.
    pub const TRIM: u32 = 1 << 3;
}

/// Event interface the tokenizer drives. Events arrive strictly in document
/// order: `on_start`, nested open/attribute/text/close groups, `on_stop`.
pub trait ParserSink {
    fn on_start(&mut self);
    fn on_tag_open(&mut self, ns: Option<&str>, tag: &str);
    fn on_attribute(&mut self, ns: Option<&str>, name: &str, value: &str);
    fn on_text(&mut self, text: &str, flags: u32);
    fn on_tag_close(&mut self, ns: Option<&str>, tag: &str);
    /// Advisory encoding notification; most sinks ignore it.
    fn on_encoding(&mut self, _name: &str, _alias: &str) {}
    fn on_stop(&mut self);

    /// Cooperative cancellation: the tokenizer polls this between events and
    /// stops delivering when it turns true.
    fn is_stopped(&self) -> bool {
        false
    }
}

struct OpenElement {
    handle: NodeHandle,
    tag_id: u16,
    flags: u32,
}

/// Builds the document tree from parser events.
///
/// Keeps one stack entry per open tag. Elements become persistent the moment
/// they close; a mismatched close latches the sticky error flag and is
/// otherwise ignored, so one bad tag does not abort the whole parse.
pub struct DomBuilder<'a> {
    doc: &'a mut Document,
    stack: Vec<OpenElement>,
    error_flag: bool,
    stopped: bool,
    header_only_tag: Option<u16>,
    last_closed: NodeHandle,
}

impl<'a> DomBuilder<'a> {
    pub fn new(doc: &'a mut Document) -> Self {
        Self {
            doc,
            stack: Vec::new(),
            error_flag: false,
            stopped: false,
            header_only_tag: None,
            last_closed: NodeHandle::NULL,
        }
    }

    /// Header-only mode: parsing stops right after the named tag closes.
    /// Used to pull book metadata without building the body.
    pub fn with_stop_tag(doc: &'a mut Document, tag: &str) -> Self {
        let tag_id = doc.elem_name_id(tag);
        let mut builder = Self::new(doc);
        builder.header_only_tag = Some(tag_id);
        builder
    }

    /// True when any close event arrived without a matching open tag.
    pub fn error(&self) -> bool {
        self.error_flag
    }

    pub fn request_stop(&mut self) {
        self.stopped = true;
    }

    /// The element that closed most recently.
    pub fn last_closed(&self) -> NodeHandle {
        self.last_closed
    }

    pub(crate) fn doc(&mut self) -> &mut Document {
        self.doc
    }

    pub(crate) fn current(&self) -> NodeHandle {
        self.stack
            .last()
            .map(|open| open.handle)
            .unwrap_or_else(|| self.doc.root())
    }

    /// Tag IDs of the open elements, outermost first.
    pub(crate) fn open_tag_ids(&self) -> Vec<u16> {
        self.stack.iter().map(|open| open.tag_id).collect()
    }

    /// Pops and persists `count` elements off the stack.
    pub(crate) fn force_close(&mut self, count: usize) {
        for _ in 0..count {
            if !self.pop_and_persist() {
                break;
            }
        }
    }

    fn pop_and_persist(&mut self) -> bool {
        match self.stack.pop() {
            Some(open) => {
                self.doc.persist(open.handle);
                self.last_closed = self.doc.canonical(open.handle);
                true
            }
            None => false,
        }
    }

    fn inherited_flags(&self) -> u32 {
        self.stack
            .last()
            .map(|open| open.flags)
            .unwrap_or(flags::NO_SPACE_TEXT)
    }
}

impl ParserSink for DomBuilder<'_> {
    fn on_start(&mut self) {
        tracing::debug!("dom build started");
    }

    fn on_tag_open(&mut self, ns: Option<&str>, tag: &str) {
        if self.stopped {
            return;
        }
        let ns_id = ns.map(|n| self.doc.ns_name_id(n)).unwrap_or(0);
        let tag_id = self.doc.elem_name_id(tag);

        let parent = self.current();
        let handle = self.doc.append_child_element(parent, ns_id, tag_id);

        let mut elem_flags = self.inherited_flags();
        if known::elem_type_flags(tag_id).pre {
            elem_flags = (elem_flags | flags::PRE) & !flags::NO_SPACE_TEXT;
        }
        self.stack.push(OpenElement {
            handle,
            tag_id,
            flags: elem_flags,
        });
    }

    fn on_attribute(&mut self, ns: Option<&str>, name: &str, value: &str) {
        if self.stopped {
            return;
        }
        let Some(open) = self.stack.last() else {
            tracing::warn!(name, "attribute outside any open tag");
            return;
        };
        let handle = open.handle;
        let ns_id = ns.map(|n| self.doc.ns_name_id(n)).unwrap_or(0);
        let name_id = self.doc.attr_name_id(name);
        self.doc.set_attribute(handle, ns_id, name_id, value);
    }

    fn on_text(&mut self, text: &str, event_flags: u32) {
        if self.stopped {
            return;
        }
        let effective = self.inherited_flags() | event_flags;
        if effective & flags::PRE == 0
            && effective & flags::NO_SPACE_TEXT != 0
            && is_whitespace_only(text)
        {
            return;
        }
        let text = if effective & flags::TRIM != 0 && effective & flags::PRE == 0 {
            text.trim()
        } else {
            text
        };
        let parent = self.current();
        self.doc.append_child_text(parent, text);
    }

    fn on_tag_close(&mut self, _ns: Option<&str>, tag: &str) {
        if self.stopped {
            return;
        }
        let tag_id = self.doc.elem_name_id(tag);
        let matched = self
            .stack
            .iter()
            .rposition(|open| open.tag_id == tag_id);
        let Some(position) = matched else {
            tracing::warn!(tag, "close without matching open tag");
            self.error_flag = true;
            return;
        };

        let closes = self.stack.len() - position;
        if closes > 1 {
            tracing::trace!(tag, implicit = closes - 1, "close pops unclosed children");
        }
        self.force_close(closes);

        if self.header_only_tag == Some(tag_id) {
            tracing::debug!(tag, "header-only stop tag closed");
            self.stopped = true;
        }
    }

    fn on_stop(&mut self) {
        while self.pop_and_persist() {}
        tracing::debug!(error = self.error_flag, "dom build finished");
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::known::{EL_P, EL_SECTION, EL_TITLE};

    fn feed_simple(sink: &mut impl ParserSink) {
        sink.on_start();
        sink.on_tag_open(None, "section");
        sink.on_tag_open(None, "title");
        sink.on_text("Chapter One", 0);
        sink.on_tag_close(None, "title");
        sink.on_tag_open(None, "p");
        sink.on_attribute(None, "id", "first");
        sink.on_text("Some prose.", 0);
        sink.on_tag_close(None, "p");
        sink.on_tag_close(None, "section");
        sink.on_stop();
    }

    #[test]
    fn builds_nested_tree() {
        let mut doc = Document::new();
        let mut builder = DomBuilder::new(&mut doc);
        feed_simple(&mut builder);
        assert!(!builder.error());

        let root = doc.root();
        assert_eq!(doc.child_count(root), 1);
        let section = doc.child(root, 0);
        assert_eq!(doc.node_name_id(section), EL_SECTION);
        assert_eq!(doc.child_count(section), 2);
        assert_eq!(doc.node_name_id(doc.child(section, 0)), EL_TITLE);
        let p = doc.child(section, 1);
        assert_eq!(doc.node_name_id(p), EL_P);
        assert_eq!(doc.attribute_by_name(p, "id"), "first");
        assert_eq!(doc.text(p), "Some prose.");
        assert!(doc.check_consistency().is_empty());
    }

    #[test]
    fn elements_persist_at_close() {
        let mut doc = Document::new();
        let mut builder = DomBuilder::new(&mut doc);
        feed_simple(&mut builder);

        let section = doc.child(doc.root(), 0);
        assert!(doc.is_persistent(section));
        assert!(doc.is_persistent(doc.child(section, 0)));
        assert!(doc.is_persistent(doc.child(section, 1)));
    }

    #[test]
    fn whitespace_only_text_is_dropped() {
        let mut doc = Document::new();
        let mut builder = DomBuilder::new(&mut doc);
        builder.on_start();
        builder.on_tag_open(None, "section");
        builder.on_text("\n    ", 0);
        builder.on_tag_open(None, "p");
        builder.on_text("kept", 0);
        builder.on_tag_close(None, "p");
        builder.on_text("\n", 0);
        builder.on_tag_close(None, "section");
        builder.on_stop();

        let section = doc.child(doc.root(), 0);
        assert_eq!(doc.child_count(section), 1);
        assert_eq!(doc.text(section), "kept");
    }

    #[test]
    fn pre_element_keeps_whitespace() {
        let mut doc = Document::new();
        let mut builder = DomBuilder::new(&mut doc);
        builder.on_start();
        builder.on_tag_open(None, "pre");
        builder.on_text("  indented\n", 0);
        builder.on_tag_close(None, "pre");
        builder.on_stop();

        let pre = doc.child(doc.root(), 0);
        assert_eq!(doc.text(pre), "  indented\n");
    }

    #[test]
    fn mismatched_close_latches_error_and_continues() {
        let mut doc = Document::new();
        let mut builder = DomBuilder::new(&mut doc);
        builder.on_start();
        builder.on_tag_open(None, "section");
        builder.on_tag_close(None, "table");
        assert!(builder.error());
        builder.on_text("still here", 0);
        builder.on_tag_close(None, "section");
        builder.on_stop();

        let section = doc.child(doc.root(), 0);
        assert_eq!(doc.text(section), "still here");
    }

    #[test]
    fn close_pops_through_unclosed_children() {
        let mut doc = Document::new();
        let mut builder = DomBuilder::new(&mut doc);
        builder.on_start();
        builder.on_tag_open(None, "section");
        builder.on_tag_open(None, "p");
        builder.on_text("dangling", 0);
        // </section> implicitly closes the open <p>.
        builder.on_tag_close(None, "section");
        builder.on_stop();
        assert!(!builder.error());

        let section = doc.child(doc.root(), 0);
        assert!(doc.is_persistent(doc.child(section, 0)));
    }

    #[test]
    fn header_only_mode_stops_after_tag() {
        let mut doc = Document::new();
        let mut builder = DomBuilder::with_stop_tag(&mut doc, "description");
        builder.on_start();
        builder.on_tag_open(None, "description");
        builder.on_tag_open(None, "title-info");
        builder.on_text("meta", 0);
        builder.on_tag_close(None, "title-info");
        builder.on_tag_close(None, "description");
        assert!(builder.is_stopped());
        // Everything after the stop tag is ignored.
        builder.on_tag_open(None, "body");
        builder.on_text("ignored", 0);
        builder.on_stop();

        let root = doc.root();
        assert_eq!(doc.child_count(root), 1);
        assert_eq!(doc.text(root), "meta");
    }
}
