//! Ranges over the tree: an ordered pair of pointers plus user flags, with
//! iteration, intersection, text/word collection, search, and the
//! flag-preserving split used to paint marked ranges (selection, highlights)
//! line by line.

use std::cmp::Ordering;

use crate::document::Document;
use crate::dom::handle::NodeHandle;
use crate::dom::node::RendMethod;
use crate::xptr::{word_ends, word_starts, XPointer, XPointerEx, OFFSET_UNSPECIFIED};

/// A word (or match) found in document text, with pointers delimiting it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    pub start: XPointer,
    pub end: XPointer,
}

/// Callbacks for [`XRange::for_each`]. Elements are offered before their
/// subtree; returning false skips the subtree. Text nodes arrive as
/// sub-ranges clipped to the iterated range.
pub trait XRangeVisitor {
    fn on_element(&mut self, _doc: &Document, _ptr: &XPointerEx) -> bool {
        true
    }

    fn on_text(&mut self, doc: &Document, range: &XRange);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XRange {
    pub start: XPointerEx,
    pub end: XPointerEx,
    pub flags: u32,
}

impl XRange {
    pub fn new(start: XPointerEx, end: XPointerEx, flags: u32) -> Self {
        Self { start, end, flags }
    }

    pub fn is_null(&self) -> bool {
        self.start.is_null() || self.end.is_null()
    }

    /// True when the range covers no content at all.
    pub fn is_empty(&self) -> bool {
        self.start.compare(&self.end) == Ordering::Equal
    }

    /// Normalizes so that `start <= end` in document order.
    pub fn sort(&mut self) {
        if self.start.compare(&self.end) == Ordering::Greater {
            std::mem::swap(&mut self.start, &mut self.end);
        }
    }

    fn sorted(&self) -> XRange {
        let mut copy = self.clone();
        copy.sort();
        copy
    }

    /// Strict overlap; ranges that merely touch at an endpoint do not
    /// intersect.
    pub fn intersects(&self, other: &XRange) -> bool {
        let a = self.sorted();
        let b = other.sorted();
        a.start.compare(&b.end) == Ordering::Less && b.start.compare(&a.end) == Ordering::Less
    }

    /// The overlapping sub-range, with flags OR-ed; `None` when disjoint.
    pub fn intersection(&self, other: &XRange) -> Option<XRange> {
        if !self.intersects(other) {
            return None;
        }
        let a = self.sorted();
        let b = other.sorted();
        let start = ptr_max(&a.start, &b.start).clone();
        let end = ptr_min(&a.end, &b.end).clone();
        Some(XRange::new(start, end, a.flags | b.flags))
    }

    /// Deepest element containing both endpoints.
    pub fn nearest_common_parent(&self, doc: &Document) -> NodeHandle {
        let a = self.start.path();
        let b = self.end.path();
        let common = a
            .iter()
            .zip(b.iter())
            .take_while(|(x, y)| x == y)
            .count();

        let mut node = doc.root();
        for &index in &a[..common] {
            let child = doc.child(node, index);
            if !child.is_element() {
                break;
            }
            node = child;
        }
        node
    }

    /// Iterates the range in document order, invoking the visitor on every
    /// element (with subtree pruning) and every text sub-range.
    pub fn for_each(&self, doc: &Document, visitor: &mut dyn XRangeVisitor) {
        let range = self.sorted();
        if range.is_null() {
            return;
        }
        let root = XPointerEx::new(doc, doc.root(), OFFSET_UNSPECIFIED);
        walk_range(doc, &root, &range, visitor);
    }

    /// Flattens the range to text, honoring visibility and inserting
    /// `block_delim` between pieces from different parents. Collection stops
    /// once `max_len` characters are gathered (zero means unlimited).
    pub fn range_text(&self, doc: &Document, block_delim: &str, max_len: usize) -> String {
        let mut collector = TextCollector {
            out: String::new(),
            delim: block_delim,
            max_len,
            last_parent: NodeHandle::NULL,
            done: false,
        };
        self.for_each(doc, &mut collector);
        collector.out
    }

    /// Collects the words (maximal non-whitespace runs) of visible text in
    /// the range.
    pub fn range_words(&self, doc: &Document, out: &mut Vec<Word>) {
        let mut collector = WordCollector { out };
        self.for_each(doc, &mut collector);
    }

    /// Naive forward search for `pattern` across visible text nodes inside
    /// the range. Matches never span node boundaries. At most `max` hits are
    /// returned (zero means unlimited).
    pub fn find_text(
        &self,
        doc: &Document,
        pattern: &str,
        case_insensitive: bool,
        max: usize,
    ) -> Vec<Word> {
        if pattern.is_empty() {
            return Vec::new();
        }
        let needle: Vec<char> = if case_insensitive {
            pattern.to_lowercase().chars().collect()
        } else {
            pattern.chars().collect()
        };
        let mut finder = TextFinder {
            needle,
            case_insensitive,
            max,
            hits: Vec::new(),
        };
        self.for_each(doc, &mut finder);
        finder.hits
    }

    /// Expands `ptr` to the enclosing whitespace-delimited word within its
    /// text node.
    pub fn word_range_at(doc: &Document, ptr: &XPointerEx) -> Option<XRange> {
        if !ptr.node().is_text() {
            return None;
        }
        let text = doc.text(ptr.node());
        let offset = ptr.offset().max(0);
        let starts = word_starts(&text);
        let ends = word_ends(&text);
        for (&s, &e) in starts.iter().zip(ends.iter()) {
            if s as i32 <= offset && offset <= e as i32 {
                let mut start = ptr.clone();
                start.set_offset(s as i32);
                let mut end = ptr.clone();
                end.set_offset(e as i32);
                return Some(XRange::new(start, end, 0));
            }
        }
        None
    }
}

fn ptr_min<'a>(a: &'a XPointerEx, b: &'a XPointerEx) -> &'a XPointerEx {
    if a.compare(b) == Ordering::Greater {
        b
    } else {
        a
    }
}

fn ptr_max<'a>(a: &'a XPointerEx, b: &'a XPointerEx) -> &'a XPointerEx {
    if a.compare(b) == Ordering::Less {
        b
    } else {
        a
    }
}

fn is_path_prefix(prefix: &[usize], path: &[usize]) -> bool {
    path.len() >= prefix.len() && &path[..prefix.len()] == prefix
}

/// Recursive range walk. Returns false once iteration passed the range end.
fn walk_range(
    doc: &Document,
    node_ptr: &XPointerEx,
    range: &XRange,
    visitor: &mut dyn XRangeVisitor,
) -> bool {
    let node = node_ptr.node();
    let at_start_node = node_ptr.path() == range.start.path();
    let at_end_node = node_ptr.path() == range.end.path();

    for (i, child) in doc.children(node).into_iter().enumerate() {
        // Gap offsets on the boundary nodes clip the child window.
        if at_start_node && range.start.offset() >= 0 && (i as i32) < range.start.offset() {
            continue;
        }
        if at_end_node && range.end.offset() >= 0 && (i as i32) >= range.end.offset() {
            return false;
        }

        let mut child_path = node_ptr.path().to_vec();
        child_path.push(i);

        // Subtree entirely before the range start.
        if child_path.as_slice() < range.start.path()
            && !is_path_prefix(&child_path, range.start.path())
        {
            continue;
        }
        // Subtree entirely past the range end.
        if child_path.as_slice() > range.end.path()
            && !is_path_prefix(range.end.path(), &child_path)
        {
            return false;
        }

        let child_ptr = XPointerEx::new(doc, child, OFFSET_UNSPECIFIED);
        debug_assert_eq!(child_ptr.path(), child_path.as_slice());

        if child.is_text() {
            let len = doc.text(child).chars().count() as i32;
            let is_start = child_path.as_slice() == range.start.path();
            let is_end = child_path.as_slice() == range.end.path();
            let so = if is_start { range.start.offset().max(0) } else { 0 };
            let eo = if is_end && range.end.offset() >= 0 {
                range.end.offset().min(len)
            } else {
                len
            };
            if so < eo {
                let mut start = child_ptr.clone();
                start.set_offset(so);
                let mut end = child_ptr;
                end.set_offset(eo);
                visitor.on_text(doc, &XRange::new(start, end, range.flags));
            }
            if is_end {
                return false;
            }
        } else if child.is_element() {
            if visitor.on_element(doc, &child_ptr) && !walk_range(doc, &child_ptr, range, visitor) {
                return false;
            }
        }
    }
    true
}

struct TextCollector<'a> {
    out: String,
    delim: &'a str,
    max_len: usize,
    last_parent: NodeHandle,
    done: bool,
}

impl XRangeVisitor for TextCollector<'_> {
    fn on_element(&mut self, doc: &Document, ptr: &XPointerEx) -> bool {
        !self.done && doc.rend_method(ptr.node()) != RendMethod::Invisible
    }

    fn on_text(&mut self, doc: &Document, range: &XRange) {
        if self.done {
            return;
        }
        let node = range.start.node();
        let parent = doc.parent(node);
        if !self.out.is_empty() && !self.delim.is_empty() && parent != self.last_parent {
            self.out.push_str(self.delim);
        }
        self.last_parent = parent;

        let text = doc.text(node);
        let piece: String = text
            .chars()
            .skip(range.start.offset() as usize)
            .take((range.end.offset() - range.start.offset()) as usize)
            .collect();
        self.out.push_str(&piece);

        if self.max_len > 0 && self.out.chars().count() >= self.max_len {
            self.out = self.out.chars().take(self.max_len).collect();
            self.done = true;
        }
    }
}

struct WordCollector<'a> {
    out: &'a mut Vec<Word>,
}

impl XRangeVisitor for WordCollector<'_> {
    fn on_element(&mut self, doc: &Document, ptr: &XPointerEx) -> bool {
        doc.rend_method(ptr.node()) != RendMethod::Invisible
    }

    fn on_text(&mut self, doc: &Document, range: &XRange) {
        let node = range.start.node();
        let chars: Vec<char> = doc.text(node).chars().collect();
        let text: String = chars.iter().collect();
        let lo = range.start.offset();
        let hi = range.end.offset();
        for (&s, &e) in word_starts(&text).iter().zip(word_ends(&text).iter()) {
            if (s as i32) < lo || (e as i32) > hi {
                continue;
            }
            self.out.push(Word {
                text: chars[s..e].iter().collect(),
                start: XPointer::new(node, s as i32),
                end: XPointer::new(node, e as i32),
            });
        }
    }
}

struct TextFinder {
    needle: Vec<char>,
    case_insensitive: bool,
    max: usize,
    hits: Vec<Word>,
}

impl XRangeVisitor for TextFinder {
    fn on_element(&mut self, doc: &Document, ptr: &XPointerEx) -> bool {
        (self.max == 0 || self.hits.len() < self.max)
            && doc.rend_method(ptr.node()) != RendMethod::Invisible
    }

    fn on_text(&mut self, doc: &Document, range: &XRange) {
        if self.max > 0 && self.hits.len() >= self.max {
            return;
        }
        let node = range.start.node();
        let original: Vec<char> = doc.text(node).chars().collect();
        let haystack: Vec<char> = if self.case_insensitive {
            original
                .iter()
                .flat_map(|c| c.to_lowercase())
                .collect()
        } else {
            original.clone()
        };
        // Case folding can change lengths in exotic scripts; fall back to the
        // original when it does, losing only case insensitivity.
        let haystack = if haystack.len() == original.len() {
            haystack
        } else {
            original.clone()
        };

        let lo = range.start.offset() as usize;
        let hi = range.end.offset() as usize;
        let n = self.needle.len();
        if hi - lo < n {
            return;
        }
        for i in lo..=hi - n {
            if haystack[i..i + n] == self.needle[..] {
                self.hits.push(Word {
                    text: original[i..i + n].iter().collect(),
                    start: XPointer::new(node, i as i32),
                    end: XPointer::new(node, (i + n) as i32),
                });
                if self.max > 0 && self.hits.len() >= self.max {
                    return;
                }
            }
        }
    }
}

/// A set of disjoint ranges over one document, kept sorted in document
/// order. Splitting against a new range fragments the overlaps and ORs the
/// flags, so every point stays covered by exactly one flag set.
#[derive(Default)]
pub struct XRangeList {
    ranges: Vec<XRange>,
}

impl XRangeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranges(&self) -> &[XRange] {
        &self.ranges
    }

    /// Adds a range assumed disjoint from the current entries (use
    /// [`split`] otherwise).
    ///
    /// [`split`]: XRangeList::split
    pub fn add(&mut self, mut range: XRange) {
        range.sort();
        self.ranges.push(range);
        self.ranges.sort_by(|a, b| a.start.compare(&b.start));
    }

    /// Splits every intersecting entry against `incoming` into before /
    /// overlap / after pieces; overlap pieces OR the flags. Stretches of
    /// `incoming` not covered by any entry are inserted with its flags.
    pub fn split(&mut self, incoming: &XRange) {
        let incoming = incoming.sorted();
        let mut out: Vec<XRange> = Vec::with_capacity(self.ranges.len() + 2);
        let mut overlaps: Vec<(XPointerEx, XPointerEx)> = Vec::new();

        for entry in self.ranges.drain(..) {
            if !entry.intersects(&incoming) {
                out.push(entry);
                continue;
            }
            let ov_start = ptr_max(&entry.start, &incoming.start).clone();
            let ov_end = ptr_min(&entry.end, &incoming.end).clone();

            if entry.start.compare(&ov_start) == Ordering::Less {
                out.push(XRange::new(entry.start.clone(), ov_start.clone(), entry.flags));
            }
            out.push(XRange::new(
                ov_start.clone(),
                ov_end.clone(),
                entry.flags | incoming.flags,
            ));
            if ov_end.compare(&entry.end) == Ordering::Less {
                out.push(XRange::new(ov_end.clone(), entry.end.clone(), entry.flags));
            }
            overlaps.push((ov_start, ov_end));
        }

        // Pieces of the incoming range nobody covered yet.
        overlaps.sort_by(|a, b| a.0.compare(&b.0));
        let mut cursor = incoming.start.clone();
        for (ov_start, ov_end) in overlaps {
            if cursor.compare(&ov_start) == Ordering::Less {
                out.push(XRange::new(cursor.clone(), ov_start, incoming.flags));
            }
            if cursor.compare(&ov_end) == Ordering::Less {
                cursor = ov_end;
            }
        }
        if cursor.compare(&incoming.end) == Ordering::Less {
            out.push(XRange::new(cursor, incoming.end.clone(), incoming.flags));
        }

        out.retain(|r| !r.is_empty());
        out.sort_by(|a, b| a.start.compare(&b.start));
        self.ranges = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::known::{EL_P, EL_SECTION};

    fn text_doc(text: &str) -> (Document, XPointerEx) {
        let mut doc = Document::new();
        let root = doc.root();
        let p = doc.append_child_element(root, 0, EL_P);
        let t = doc.append_child_text(p, text);
        let ptr = XPointerEx::new(&doc, t, 0);
        (doc, ptr)
    }

    fn sub_range(ptr: &XPointerEx, lo: i32, hi: i32, flags: u32) -> XRange {
        let mut start = ptr.clone();
        start.set_offset(lo);
        let mut end = ptr.clone();
        end.set_offset(hi);
        XRange::new(start, end, flags)
    }

    #[test]
    fn sort_normalizes_order() {
        let (_doc, ptr) = text_doc("abcdefghij");
        let mut range = sub_range(&ptr, 7, 2, 0);
        range.sort();
        assert_eq!(range.start.offset(), 2);
        assert_eq!(range.end.offset(), 7);
    }

    #[test]
    fn intersection_on_one_text_node() {
        let (_doc, ptr) = text_doc("abcdefghij");
        let r1 = sub_range(&ptr, 2, 5, 1);
        let r2 = sub_range(&ptr, 4, 8, 2);
        let r3 = sub_range(&ptr, 8, 10, 4);

        assert!(r1.intersects(&r2));
        assert!(!r1.intersects(&r3));
        // Touching at an endpoint is not an intersection.
        assert!(!r2.intersects(&r3) || r2.end.compare(&r3.start) != Ordering::Equal);

        let overlap = r1.intersection(&r2).expect("overlap");
        assert_eq!(overlap.start.offset(), 4);
        assert_eq!(overlap.end.offset(), 5);
        assert_eq!(overlap.flags, 3);
        assert!(r1.intersection(&r3).is_none());
    }

    #[test]
    fn split_fragments_overlaps_and_ors_flags() {
        let (_doc, ptr) = text_doc("abcdefghij");
        let mut list = XRangeList::new();
        list.add(sub_range(&ptr, 2, 5, 1));
        list.split(&sub_range(&ptr, 4, 8, 2));

        let pieces: Vec<(i32, i32, u32)> = list
            .ranges()
            .iter()
            .map(|r| (r.start.offset(), r.end.offset(), r.flags))
            .collect();
        assert_eq!(pieces, vec![(2, 4, 1), (4, 5, 3), (5, 8, 2)]);
    }

    #[test]
    fn split_preserves_coverage_and_disjointness() {
        let (_doc, ptr) = text_doc("abcdefghijklmnopqrst");
        let mut list = XRangeList::new();
        list.add(sub_range(&ptr, 0, 6, 1));
        list.add(sub_range(&ptr, 10, 14, 2));
        list.split(&sub_range(&ptr, 4, 12, 4));

        let pieces: Vec<(i32, i32, u32)> = list
            .ranges()
            .iter()
            .map(|r| (r.start.offset(), r.end.offset(), r.flags))
            .collect();
        assert_eq!(
            pieces,
            vec![(0, 4, 1), (4, 6, 5), (6, 10, 4), (10, 12, 6), (12, 14, 2)]
        );

        // Disjoint and fully covering [0,14).
        for window in pieces.windows(2) {
            assert!(window[0].1 <= window[1].0);
        }
        let total: i32 = pieces.iter().map(|(lo, hi, _)| hi - lo).sum();
        assert_eq!(total, 14);
    }

    #[test]
    fn range_text_spans_nodes() {
        let mut doc = Document::new();
        let root = doc.root();
        let section = doc.append_child_element(root, 0, EL_SECTION);
        let p1 = doc.append_child_element(section, 0, EL_P);
        doc.append_child_text(p1, "First paragraph.");
        let p2 = doc.append_child_element(section, 0, EL_P);
        doc.append_child_text(p2, "Second paragraph.");

        let start = XPointerEx::new(&doc, doc.child(p1, 0), 6);
        let end = XPointerEx::new(&doc, doc.child(p2, 0), 6);
        let range = XRange::new(start, end, 0);

        assert_eq!(range.range_text(&doc, " ", 0), "paragraph. Second");
        assert_eq!(range.range_text(&doc, " ", 10), "paragraph.");
    }

    #[test]
    fn range_text_skips_invisible() {
        let mut doc = Document::new();
        let root = doc.root();
        let section = doc.append_child_element(root, 0, EL_SECTION);
        let visible = doc.append_child_element(section, 0, EL_P);
        doc.append_child_text(visible, "shown");
        let hidden = doc.append_child_element(section, 0, EL_P);
        doc.append_child_text(hidden, "hidden");
        doc.set_rend_method(hidden, RendMethod::Invisible);
        let tail = doc.append_child_element(section, 0, EL_P);
        doc.append_child_text(tail, "tail");

        let start = XPointerEx::new(&doc, section, 0);
        let end = XPointerEx::new(&doc, section, 3);
        let range = XRange::new(start, end, 0);
        assert_eq!(range.range_text(&doc, "|", 0), "shown|tail");
    }

    #[test]
    fn words_in_range() {
        let (doc, ptr) = text_doc("alpha beta gamma");
        let range = sub_range(&ptr, 0, 16, 0);
        let mut words = Vec::new();
        range.range_words(&doc, &mut words);
        let texts: Vec<&str> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "beta", "gamma"]);
        assert_eq!(words[1].start.offset, 6);
        assert_eq!(words[1].end.offset, 10);

        // Partial range drops clipped words.
        let partial = sub_range(&ptr, 0, 9, 0);
        let mut clipped = Vec::new();
        partial.range_words(&doc, &mut clipped);
        let texts: Vec<&str> = clipped.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha"]);
    }

    #[test]
    fn find_text_reports_every_occurrence() {
        let (doc, ptr) = text_doc("the cat and The dog and the bird");
        let range = sub_range(&ptr, 0, 32, 0);

        let hits = range.find_text(&doc, "the", false, 0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].start.offset, 0);
        assert_eq!(hits[1].start.offset, 24);

        let hits_ci = range.find_text(&doc, "the", true, 0);
        assert_eq!(hits_ci.len(), 3);
        assert_eq!(hits_ci[1].text, "The");

        let capped = range.find_text(&doc, "the", true, 2);
        assert_eq!(capped.len(), 2);

        // A superset pattern's hits are a subset of the shorter pattern's.
        let longer = range.find_text(&doc, "the ", false, 0);
        for hit in &longer {
            assert!(hits.iter().any(|h| h.start.offset == hit.start.offset));
        }
    }

    #[test]
    fn nearest_common_parent_is_deepest_ancestor() {
        let mut doc = Document::new();
        let root = doc.root();
        let section = doc.append_child_element(root, 0, EL_SECTION);
        let p1 = doc.append_child_element(section, 0, EL_P);
        let t1 = doc.append_child_text(p1, "one");
        let p2 = doc.append_child_element(section, 0, EL_P);
        let t2 = doc.append_child_text(p2, "two");

        let within = XRange::new(
            XPointerEx::new(&doc, t1, 0),
            XPointerEx::new(&doc, t1, 2),
            0,
        );
        assert!(crate::document::same_node(
            within.nearest_common_parent(&doc),
            p1
        ));

        let across = XRange::new(
            XPointerEx::new(&doc, t1, 0),
            XPointerEx::new(&doc, t2, 2),
            0,
        );
        assert!(crate::document::same_node(
            across.nearest_common_parent(&doc),
            section
        ));
    }

    #[test]
    fn word_range_expansion() {
        let (doc, ptr) = text_doc("alpha beta gamma");
        let mut inside = ptr.clone();
        inside.set_offset(8);
        let range = XRange::word_range_at(&doc, &inside).expect("word");
        assert_eq!(range.start.offset(), 6);
        assert_eq!(range.end.offset(), 10);
        assert_eq!(range.range_text(&doc, "", 0), "beta");
    }
}
