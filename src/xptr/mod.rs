//! Pointer addressing within the tree. An [`XPointer`] is a `(node, offset)`
//! pair; [`XPointerEx`] additionally caches the node's child-index path from
//! the root so document-order comparison and traversal work without repeated
//! parent walks. Ranges and range lists live in [`range`].

pub mod range;

pub use range::{Word, XRange, XRangeList, XRangeVisitor};

use std::cmp::Ordering;

use winnow::ascii::digit1;
use winnow::error::{ContextError, ErrMode};
use winnow::token::{literal, take_while};
use winnow::Parser;

use crate::document::Document;
use crate::dom::handle::NodeHandle;
use crate::dom::node::RendMethod;
use crate::utils::is_word_char;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PointerParseError {
    #[error("empty pointer path")]
    Empty,

    #[error("malformed step at {0:?}")]
    Syntax(String),

    #[error("no node matches step {0:?}")]
    NoSuchNode(String),
}

/// Offset value meaning "the whole node" (an XPath-style pointer with no
/// point component).
pub const OFFSET_UNSPECIFIED: i32 = -1;

/// A point in the document: a node plus an offset. For elements the offset
/// addresses an inter-child gap (0 = before the first child); for text
/// nodes, a character index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct XPointer {
    pub node: NodeHandle,
    pub offset: i32,
}

impl XPointer {
    pub fn new(node: NodeHandle, offset: i32) -> Self {
        Self { node, offset }
    }

    pub fn null() -> Self {
        Self {
            node: NodeHandle::NULL,
            offset: OFFSET_UNSPECIFIED,
        }
    }

    pub fn is_null(&self) -> bool {
        self.node.is_null()
    }

    /// Serializes to the path-string form, e.g.
    /// `/book/chapter[2]/para[5].12`. Sibling indices are omitted when the
    /// name is unambiguous among siblings.
    pub fn to_path(&self, doc: &Document) -> String {
        if self.is_null() {
            return String::new();
        }
        let mut steps = Vec::new();
        let mut node = doc.canonical(self.node);
        while !node.is_null() && !doc.is_root(node) {
            let parent = doc.parent(node);
            if parent.is_null() {
                break;
            }
            steps.push(step_string(doc, parent, node));
            node = parent;
        }
        steps.reverse();
        let mut path: String = steps.concat();
        if self.offset >= 0 {
            path.push('.');
            path.push_str(&self.offset.to_string());
        }
        path
    }
}

/// One `/name[i]` step for `node` under `parent`, with `[i]` omitted when
/// `node` is the only sibling of its name.
fn step_string(doc: &Document, parent: NodeHandle, node: NodeHandle) -> String {
    let siblings = doc.children(parent);
    let mut same_name = 0usize;
    let mut ordinal = 0usize;
    for sibling in &siblings {
        let matches = if node.is_text() {
            sibling.is_text()
        } else {
            sibling.is_element() && doc.node_name_id(*sibling) == doc.node_name_id(node)
        };
        if matches {
            same_name += 1;
            if crate::document::same_node(*sibling, node) {
                ordinal = same_name;
            }
        }
    }

    let name = if node.is_text() {
        "text()".to_owned()
    } else {
        let tag_name = doc.node_name(node);
        if tag_name.is_empty() {
            format!("[{ordinal}]")
        } else {
            tag_name.to_owned()
        }
    };

    if same_name > 1 {
        format!("/{name}[{ordinal}]")
    } else {
        format!("/{name}")
    }
}

/// Pointer with a cached ancestor-index path, supporting navigation and
/// document-order comparison without re-walking parents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XPointerEx {
    node: NodeHandle,
    offset: i32,
    /// Child indices from the root down to `node`; empty for the root.
    path: Vec<usize>,
}

impl XPointerEx {
    pub fn new(doc: &Document, node: NodeHandle, offset: i32) -> Self {
        let node = doc.canonical(node);
        let path = path_of(doc, node);
        Self { node, offset, path }
    }

    pub fn from_pointer(doc: &Document, ptr: XPointer) -> Self {
        Self::new(doc, ptr.node, ptr.offset)
    }

    pub fn pointer(&self) -> XPointer {
        XPointer::new(self.node, self.offset)
    }

    pub fn node(&self) -> NodeHandle {
        self.node
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: i32) {
        self.offset = offset;
    }

    pub fn is_null(&self) -> bool {
        self.node.is_null()
    }

    pub(crate) fn path(&self) -> &[usize] {
        &self.path
    }

    pub fn to_path(&self, doc: &Document) -> String {
        self.pointer().to_path(doc)
    }

    /// Document-order comparison: path first, offset as tiebreaker. An
    /// ancestor sorts before its descendants.
    pub fn compare(&self, other: &XPointerEx) -> Ordering {
        match self.path.cmp(&other.path) {
            Ordering::Equal => self.offset.cmp(&other.offset),
            ordering => ordering,
        }
    }

    /// Parses the path-string form against a document.
    pub fn parse(doc: &Document, input: &str) -> Result<XPointerEx, PointerParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PointerParseError::Empty);
        }

        let (steps, offset) =
            parse_path(trimmed).map_err(|_| PointerParseError::Syntax(trimmed.to_owned()))?;

        let mut node = doc.root();
        let mut path = Vec::with_capacity(steps.len());
        for step in &steps {
            let children = doc.children(node);
            let mut remaining = step.index;
            let mut found = None;
            for (i, child) in children.iter().enumerate() {
                let matches = if step.text {
                    child.is_text()
                } else {
                    child.is_element() && doc.node_name(*child) == step.name
                };
                if matches {
                    remaining -= 1;
                    if remaining == 0 {
                        found = Some((i, *child));
                        break;
                    }
                }
            }
            match found {
                Some((i, child)) => {
                    path.push(i);
                    node = child;
                }
                None => return Err(PointerParseError::NoSuchNode(step.to_string())),
            }
        }

        Ok(XPointerEx { node, offset, path })
    }

    // --- structural navigation ---------------------------------------

    /// Moves to the parent; false at the root.
    pub fn parent(&mut self, doc: &Document) -> bool {
        let parent = doc.parent(self.node);
        if parent.is_null() {
            return false;
        }
        self.node = parent;
        self.path.pop();
        self.offset = OFFSET_UNSPECIFIED;
        true
    }

    /// Moves to the i-th child; false when out of range.
    pub fn child(&mut self, doc: &Document, index: usize) -> bool {
        let child = doc.child(self.node, index);
        if child.is_null() {
            return false;
        }
        self.node = child;
        self.path.push(index);
        self.offset = OFFSET_UNSPECIFIED;
        true
    }

    pub fn first_child(&mut self, doc: &Document) -> bool {
        self.child(doc, 0)
    }

    pub fn last_child(&mut self, doc: &Document) -> bool {
        let count = doc.child_count(self.node);
        count > 0 && self.child(doc, count - 1)
    }

    pub fn first_element_child(&mut self, doc: &Document) -> bool {
        let children = doc.children(self.node);
        match children.iter().position(|c| c.is_element()) {
            Some(index) => self.child(doc, index),
            None => false,
        }
    }

    pub fn last_element_child(&mut self, doc: &Document) -> bool {
        let children = doc.children(self.node);
        match children.iter().rposition(|c| c.is_element()) {
            Some(index) => self.child(doc, index),
            None => false,
        }
    }

    /// Moves to the sibling at `index` within the parent; false when out of
    /// range (the pointer is unchanged).
    pub fn sibling(&mut self, doc: &Document, index: usize) -> bool {
        let parent = doc.parent(self.node);
        if parent.is_null() {
            return false;
        }
        let target = doc.child(parent, index);
        if target.is_null() {
            return false;
        }
        self.node = target;
        *self.path.last_mut().expect("non-root has a path") = index;
        self.offset = OFFSET_UNSPECIFIED;
        true
    }

    pub fn next_sibling(&mut self, doc: &Document) -> bool {
        match self.path.last() {
            Some(&index) => self.sibling(doc, index + 1),
            None => false,
        }
    }

    pub fn prev_sibling(&mut self, doc: &Document) -> bool {
        match self.path.last() {
            Some(&index) if index > 0 => self.sibling(doc, index - 1),
            _ => false,
        }
    }

    // --- document-order traversal ------------------------------------

    /// Advances to the next node in document order (depth-first); false at
    /// the end of the document.
    pub fn next_node(&mut self, doc: &Document) -> bool {
        if self.node.is_element() && self.first_child(doc) {
            return true;
        }
        let mut probe = self.clone();
        loop {
            if probe.next_sibling(doc) {
                *self = probe;
                return true;
            }
            if !probe.parent(doc) {
                return false;
            }
        }
    }

    /// Retreats to the previous node in document order; false at the root.
    pub fn prev_node(&mut self, doc: &Document) -> bool {
        let mut probe = self.clone();
        if probe.prev_sibling(doc) {
            // Descend to the deepest last descendant.
            while probe.node.is_element() && probe.last_child(doc) {}
            *self = probe;
            return true;
        }
        self.parent(doc)
    }

    pub fn next_element(&mut self, doc: &Document) -> bool {
        self.advance(doc, true, |_, h| h.is_element())
    }

    pub fn prev_element(&mut self, doc: &Document) -> bool {
        self.advance(doc, false, |_, h| h.is_element())
    }

    pub fn next_text(&mut self, doc: &Document) -> bool {
        self.advance(doc, true, |_, h| h.is_text())
    }

    pub fn prev_text(&mut self, doc: &Document) -> bool {
        self.advance(doc, false, |_, h| h.is_text())
    }

    pub fn next_visible_text(&mut self, doc: &Document) -> bool {
        self.advance(doc, true, |d, h| h.is_text() && is_visible(d, h))
    }

    pub fn prev_visible_text(&mut self, doc: &Document) -> bool {
        self.advance(doc, false, |d, h| h.is_text() && is_visible(d, h))
    }

    /// Next visible element rendered as a final block (a paragraph-level
    /// layout unit).
    pub fn next_visible_final(&mut self, doc: &Document) -> bool {
        self.advance(doc, true, |d, h| {
            h.is_element() && d.rend_method(h) == RendMethod::Final && is_visible(d, h)
        })
    }

    pub fn prev_visible_final(&mut self, doc: &Document) -> bool {
        self.advance(doc, false, |d, h| {
            h.is_element() && d.rend_method(h) == RendMethod::Final && is_visible(d, h)
        })
    }

    fn advance(
        &mut self,
        doc: &Document,
        forward: bool,
        accept: impl Fn(&Document, NodeHandle) -> bool,
    ) -> bool {
        let mut probe = self.clone();
        loop {
            let moved = if forward {
                probe.next_node(doc)
            } else {
                probe.prev_node(doc)
            };
            if !moved {
                return false;
            }
            if accept(doc, probe.node) {
                probe.offset = OFFSET_UNSPECIFIED;
                *self = probe;
                return true;
            }
        }
    }

    // --- word-granularity navigation ---------------------------------

    /// Moves to the next word start in visible text, strictly after the
    /// current position.
    pub fn next_visible_word_start(&mut self, doc: &Document) -> bool {
        self.word_seek_forward(doc, word_starts)
    }

    /// Moves to the next word end in visible text, strictly after the
    /// current position.
    pub fn next_visible_word_end(&mut self, doc: &Document) -> bool {
        self.word_seek_forward(doc, word_ends)
    }

    /// Moves to the previous word start, strictly before the current
    /// position.
    pub fn prev_visible_word_start(&mut self, doc: &Document) -> bool {
        self.word_seek_backward(doc, word_starts)
    }

    /// Moves to the previous word end, strictly before the current position.
    pub fn prev_visible_word_end(&mut self, doc: &Document) -> bool {
        self.word_seek_backward(doc, word_ends)
    }

    fn word_seek_forward(&mut self, doc: &Document, boundaries: fn(&str) -> Vec<usize>) -> bool {
        let mut probe = self.clone();
        let mut first = probe.node.is_text() && is_visible(doc, probe.node);
        if !first && !probe.next_visible_text(doc) {
            return false;
        }
        loop {
            let text = doc.text(probe.node);
            let floor = if first { probe.offset } else { OFFSET_UNSPECIFIED };
            if let Some(&hit) = boundaries(&text).iter().find(|&&b| (b as i32) > floor) {
                probe.offset = hit as i32;
                *self = probe;
                return true;
            }
            first = false;
            if !probe.next_visible_text(doc) {
                return false;
            }
        }
    }

    fn word_seek_backward(&mut self, doc: &Document, boundaries: fn(&str) -> Vec<usize>) -> bool {
        let mut probe = self.clone();
        let mut ceiling = if probe.node.is_text() && is_visible(doc, probe.node) {
            probe.offset
        } else if probe.prev_visible_text(doc) {
            i32::MAX
        } else {
            return false;
        };
        loop {
            let text = doc.text(probe.node);
            if let Some(&hit) = boundaries(&text).iter().rev().find(|&&b| (b as i32) < ceiling) {
                probe.offset = hit as i32;
                *self = probe;
                return true;
            }
            if !probe.prev_visible_text(doc) {
                return false;
            }
            ceiling = i32::MAX;
        }
    }
}

/// Child-index path from the root down to `node`; empty for the root, empty
/// for dead handles too (callers check `is_null` first).
fn path_of(doc: &Document, node: NodeHandle) -> Vec<usize> {
    let mut path = Vec::new();
    let mut current = node;
    while !current.is_null() && !doc.is_root(current) {
        match doc.index_in_parent(current) {
            Some(index) => path.push(index),
            None => break,
        }
        current = doc.parent(current);
    }
    path.reverse();
    path
}

/// A node is visible when neither it nor any ancestor is rendered
/// invisible.
pub(crate) fn is_visible(doc: &Document, node: NodeHandle) -> bool {
    let mut current = node;
    while !current.is_null() {
        if current.is_element() && doc.rend_method(current) == RendMethod::Invisible {
            return false;
        }
        current = doc.parent(current);
    }
    true
}

/// Character indices where a word (maximal non-whitespace run) begins.
pub(crate) fn word_starts(text: &str) -> Vec<usize> {
    let chars: Vec<char> = text.chars().collect();
    let mut starts = Vec::new();
    for (i, &ch) in chars.iter().enumerate() {
        if is_word_char(ch) && (i == 0 || !is_word_char(chars[i - 1])) {
            starts.push(i);
        }
    }
    starts
}

/// Character indices just past each word's final character.
pub(crate) fn word_ends(text: &str) -> Vec<usize> {
    let chars: Vec<char> = text.chars().collect();
    let mut ends = Vec::new();
    for i in 1..=chars.len() {
        if is_word_char(chars[i - 1]) && (i == chars.len() || !is_word_char(chars[i])) {
            ends.push(i);
        }
    }
    ends
}

// --- path-string grammar ---------------------------------------------

struct PathStep {
    name: String,
    text: bool,
    /// 1-based ordinal among same-named siblings.
    index: usize,
}

impl std::fmt::Display for PathStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.text {
            write!(f, "text()[{}]", self.index)
        } else {
            write!(f, "{}[{}]", self.name, self.index)
        }
    }
}

type StrResult<'a, T> = Result<(&'a str, T), ErrMode<ContextError>>;

fn parse_step(input: &str) -> StrResult<'_, PathStep> {
    let (input, _) = literal("/").parse_peek(input)?;
    let (input, name) =
        take_while(1.., |c: char| c.is_alphanumeric() || "-_:()".contains(c)).parse_peek(input)?;

    let (input, index) = if let Some(rest) = input.strip_prefix('[') {
        let (rest, digits) = digit1.parse_peek(rest)?;
        let (rest, _) = literal("]").parse_peek(rest)?;
        let index: usize = digits.parse().map_err(|_| ErrMode::Cut(ContextError::new()))?;
        (rest, index)
    } else {
        (input, 1)
    };

    if index == 0 {
        return Err(ErrMode::Cut(ContextError::new()));
    }

    let text = name == "text()";
    Ok((
        input,
        PathStep {
            name: name.to_owned(),
            text,
            index,
        },
    ))
}

fn parse_path(input: &str) -> Result<(Vec<PathStep>, i32), ErrMode<ContextError>> {
    let mut steps = Vec::new();
    let mut rest = input;
    while rest.starts_with('/') {
        let (next, step) = parse_step(rest)?;
        steps.push(step);
        rest = next;
    }
    if steps.is_empty() {
        return Err(ErrMode::Cut(ContextError::new()));
    }

    let offset = if let Some(stripped) = rest.strip_prefix('.') {
        let (next, digits) = digit1.parse_peek(stripped)?;
        if !next.is_empty() {
            return Err(ErrMode::Cut(ContextError::new()));
        }
        digits.parse().map_err(|_| ErrMode::Cut(ContextError::new()))?
    } else {
        if !rest.is_empty() {
            return Err(ErrMode::Cut(ContextError::new()));
        }
        OFFSET_UNSPECIFIED
    };

    Ok((steps, offset))
}
