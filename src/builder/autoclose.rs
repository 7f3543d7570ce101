//! Loose-HTML event filter. Real-world HTML leaves `<li>` and `<p>` open all
//! the time; each tag carries a list of ancestor tags whose presence forces
//! an implicit close before the new element opens. A few site-specific
//! fixups ride along: `<br>` becomes a paragraph split, `<pre>` demotes to
//! `<div>`, and a right-aligned `<table>` (navigation junk in scraped pages)
//! is discarded wholesale.

use std::collections::HashMap;

use crate::builder::{DomBuilder, ParserSink};
use crate::document::{same_node, Document};
use crate::dom::handle::NodeHandle;
use crate::intern::known::{ATTR_ALIGN, EL_TABLE};

/// [`DomBuilder`] wrapper applying auto-close rules to open events.
pub struct AutoCloseBuilder<'a> {
    inner: DomBuilder<'a>,
    /// New-tag ID → ancestor tag IDs that force an implicit close.
    rules: HashMap<u16, Vec<u16>>,
    /// Tables marked for discard once their subtree closes.
    discard: Vec<NodeHandle>,
}

impl<'a> AutoCloseBuilder<'a> {
    /// Builds the filter over `rules` given as `(tag, closing ancestors)`
    /// pairs, e.g. `("li", &["li"])` or `("p", &["p", "li"])`.
    pub fn new(doc: &'a mut Document, rules: &[(&str, &[&str])]) -> Self {
        let resolved = rules
            .iter()
            .map(|(tag, ancestors)| {
                let tag_id = doc.elem_name_id(tag);
                let ancestor_ids = ancestors.iter().map(|a| doc.elem_name_id(a)).collect();
                (tag_id, ancestor_ids)
            })
            .collect();
        Self {
            inner: DomBuilder::new(doc),
            rules: resolved,
            discard: Vec::new(),
        }
    }

    pub fn error(&self) -> bool {
        self.inner.error()
    }

    pub fn request_stop(&mut self) {
        self.inner.request_stop();
    }

    /// Tag-name rewrites applied before any rule processing.
    fn substitute(tag: &str) -> &str {
        match tag {
            // A bare line break in loose markup reads as a paragraph split;
            // combined with the p-closes-p rule this starts a fresh
            // paragraph.
            "br" => "p",
            // Scraped pages abuse <pre> for layout; demote to a plain block.
            "pre" => "div",
            _ => tag,
        }
    }
}

impl ParserSink for AutoCloseBuilder<'_> {
    fn on_start(&mut self) {
        self.inner.on_start();
    }

    fn on_tag_open(&mut self, ns: Option<&str>, tag: &str) {
        let tag = Self::substitute(tag);
        let tag_id = self.inner.doc().elem_name_id(tag);

        if let Some(ancestors) = self.rules.get(&tag_id) {
            let open = self.inner.open_tag_ids();
            if let Some(from_top) = open
                .iter()
                .rev()
                .position(|open_tag| ancestors.contains(open_tag))
            {
                tracing::trace!(tag, implicit = from_top + 1, "auto-closing ancestors");
                self.inner.force_close(from_top + 1);
            }
        }

        self.inner.on_tag_open(ns, tag);
    }

    fn on_attribute(&mut self, ns: Option<&str>, name: &str, value: &str) {
        self.inner.on_attribute(ns, name, value);

        // Right-aligned tables in scraped pages are navigation sidebars;
        // remember the element and drop it once it closes.
        if self.inner.doc().attr_names.lookup(name) == Some(ATTR_ALIGN)
            && value.eq_ignore_ascii_case("right")
        {
            let current = self.inner.current();
            if self.inner.doc().node_name_id(current) == EL_TABLE {
                tracing::debug!("marking right-aligned table for discard");
                self.discard.push(current);
            }
        }
    }

    fn on_text(&mut self, text: &str, flags: u32) {
        self.inner.on_text(text, flags);
    }

    fn on_tag_close(&mut self, ns: Option<&str>, tag: &str) {
        match tag {
            // The substituted paragraph stays open until the next split or
            // the parent's close.
            "br" => return,
            "pre" => self.inner.on_tag_close(ns, "div"),
            _ => self.inner.on_tag_close(ns, tag),
        }

        let closed = self.inner.last_closed();
        if let Some(position) = self.discard.iter().position(|&t| same_node(t, closed)) {
            self.discard.remove(position);
            let doc = self.inner.doc();
            if let Some(index) = doc.index_in_parent(closed) {
                let parent = doc.parent(closed);
                let detached = doc.remove_child(parent, index);
                doc.destroy(detached);
                tracing::debug!("discarded right-aligned table");
            }
        }
    }

    fn on_stop(&mut self) {
        self.inner.on_stop();
    }

    fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::known::{EL_DIV, EL_LI, EL_P, EL_UL};

    const LIST_RULES: &[(&str, &[&str])] = &[("li", &["li"]), ("p", &["p", "li"])];

    #[test]
    fn sibling_li_auto_closes() {
        let mut doc = Document::new();
        let mut builder = AutoCloseBuilder::new(&mut doc, LIST_RULES);
        builder.on_start();
        builder.on_tag_open(None, "ul");
        builder.on_tag_open(None, "li");
        builder.on_text("a", 0);
        builder.on_tag_open(None, "li");
        builder.on_text("b", 0);
        builder.on_tag_close(None, "ul");
        builder.on_stop();
        assert!(!builder.error());

        let ul = doc.child(doc.root(), 0);
        assert_eq!(doc.node_name_id(ul), EL_UL);
        assert_eq!(doc.child_count(ul), 2);
        for (i, expected) in ["a", "b"].iter().enumerate() {
            let li = doc.child(ul, i);
            assert_eq!(doc.node_name_id(li), EL_LI);
            assert_eq!(doc.text(li), *expected);
        }
    }

    #[test]
    fn p_closes_p_and_li() {
        let mut doc = Document::new();
        let mut builder = AutoCloseBuilder::new(&mut doc, LIST_RULES);
        builder.on_start();
        builder.on_tag_open(None, "div");
        builder.on_tag_open(None, "p");
        builder.on_text("one", 0);
        builder.on_tag_open(None, "p");
        builder.on_text("two", 0);
        builder.on_tag_close(None, "div");
        builder.on_stop();

        let div = doc.child(doc.root(), 0);
        assert_eq!(doc.child_count(div), 2);
        assert_eq!(doc.text(doc.child(div, 0)), "one");
        assert_eq!(doc.text(doc.child(div, 1)), "two");
    }

    #[test]
    fn br_splits_paragraphs() {
        let mut doc = Document::new();
        let mut builder = AutoCloseBuilder::new(&mut doc, LIST_RULES);
        builder.on_start();
        builder.on_tag_open(None, "div");
        builder.on_tag_open(None, "p");
        builder.on_text("first line", 0);
        builder.on_tag_open(None, "br");
        builder.on_tag_close(None, "br");
        builder.on_text("second line", 0);
        builder.on_tag_close(None, "div");
        builder.on_stop();

        let div = doc.child(doc.root(), 0);
        assert_eq!(doc.child_count(div), 2);
        assert_eq!(doc.node_name_id(doc.child(div, 0)), EL_P);
        assert_eq!(doc.text(doc.child(div, 0)), "first line");
        assert_eq!(doc.node_name_id(doc.child(div, 1)), EL_P);
        assert_eq!(doc.text(doc.child(div, 1)), "second line");
    }

    #[test]
    fn pre_demotes_to_div() {
        let mut doc = Document::new();
        let mut builder = AutoCloseBuilder::new(&mut doc, LIST_RULES);
        builder.on_start();
        builder.on_tag_open(None, "pre");
        builder.on_text("content", 0);
        builder.on_tag_close(None, "pre");
        builder.on_stop();

        let node = doc.child(doc.root(), 0);
        assert_eq!(doc.node_name_id(node), EL_DIV);
        assert_eq!(doc.text(node), "content");
    }

    #[test]
    fn right_aligned_table_is_discarded() {
        let mut doc = Document::new();
        let mut builder = AutoCloseBuilder::new(&mut doc, LIST_RULES);
        builder.on_start();
        builder.on_tag_open(None, "div");
        builder.on_tag_open(None, "table");
        builder.on_attribute(None, "align", "right");
        builder.on_tag_open(None, "tr");
        builder.on_text("sidebar junk", 0);
        builder.on_tag_close(None, "tr");
        builder.on_tag_close(None, "table");
        builder.on_text("body text", 0);
        builder.on_tag_close(None, "div");
        builder.on_stop();

        let div = doc.child(doc.root(), 0);
        assert_eq!(doc.child_count(div), 1);
        assert_eq!(doc.text(div), "body text");
    }

    #[test]
    fn left_aligned_table_survives() {
        let mut doc = Document::new();
        let mut builder = AutoCloseBuilder::new(&mut doc, LIST_RULES);
        builder.on_start();
        builder.on_tag_open(None, "table");
        builder.on_attribute(None, "align", "left");
        builder.on_tag_close(None, "table");
        builder.on_stop();

        assert_eq!(doc.child_count(doc.root()), 1);
    }
}
