//! Node slot payloads. Each slot in the tiny-node table holds a tagged union:
//! the mutable variants own heap data, the persistent variants are a bare
//! storage address (plus the style and font slots for elements, which never
//! move into chunk storage).

use crate::dom::caches::CACHE_SLOT_NONE;
use crate::dom::handle::{NodeHandle, StorageAddress};

/// How an element participates in layout. Stored on every element and
/// consulted by the core only for visibility (`Invisible`) and block text
/// delimiters; everything else is the renderer's business.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum RendMethod {
    Invisible = 0,
    #[default]
    Inline = 1,
    Block = 2,
    Final = 3,
    Table = 4,
    TableRow = 5,
    TableCell = 6,
    TableCaption = 7,
}

impl RendMethod {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => RendMethod::Invisible,
            1 => RendMethod::Inline,
            2 => RendMethod::Block,
            3 => RendMethod::Final,
            4 => RendMethod::Table,
            5 => RendMethod::TableRow,
            6 => RendMethod::TableCell,
            7 => RendMethod::TableCaption,
            _ => RendMethod::Inline,
        }
    }

    /// Block-level methods get a delimiter between them during text
    /// collection.
    pub fn is_block(self) -> bool {
        !matches!(self, RendMethod::Invisible | RendMethod::Inline)
    }
}

/// Cached layout rectangle of an element, 16 bytes in persistent records.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct RenderRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl RenderRect {
    pub fn is_empty(&self) -> bool {
        *self == RenderRect::default()
    }
}

/// One attribute of an element. The value lives in the document's
/// attribute-value intern table; `(ns_id, name_id)` is unique within one
/// element.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Attribute {
    pub ns_id: u16,
    pub name_id: u16,
    pub value_id: u16,
}

/// Heap record behind a mutable element.
#[derive(Clone, Debug)]
pub struct ElemData {
    pub ns_id: u16,
    pub name_id: u16,
    pub parent: NodeHandle,
    pub children: Vec<NodeHandle>,
    pub attrs: Vec<Attribute>,
    pub rend_method: RendMethod,
    pub render: RenderRect,
    pub style_slot: u16,
    pub font_slot: u16,
}

impl ElemData {
    pub fn new(ns_id: u16, name_id: u16, parent: NodeHandle) -> Self {
        Self {
            ns_id,
            name_id,
            parent,
            children: Vec::new(),
            attrs: Vec::new(),
            rend_method: RendMethod::default(),
            render: RenderRect::default(),
            style_slot: CACHE_SLOT_NONE,
            font_slot: CACHE_SLOT_NONE,
        }
    }

    pub fn find_attr(&self, ns_id: u16, name_id: u16) -> Option<&Attribute> {
        self.attrs
            .iter()
            .find(|a| a.name_id == name_id && (ns_id == 0 || a.ns_id == ns_id))
    }

    pub fn find_attr_mut(&mut self, ns_id: u16, name_id: u16) -> Option<&mut Attribute> {
        self.attrs
            .iter_mut()
            .find(|a| a.name_id == name_id && (ns_id == 0 || a.ns_id == ns_id))
    }
}

/// Payload of a text slot.
#[derive(Debug)]
pub enum TextNode {
    /// Slot zero of the slab; never handed out.
    Reserved,
    Mutable { parent: NodeHandle, text: String },
    Persistent { addr: StorageAddress },
}

impl TextNode {
    pub fn is_persistent(&self) -> bool {
        matches!(self, TextNode::Persistent { .. })
    }
}

/// Payload of an element slot.
#[derive(Debug)]
pub enum ElemNode {
    /// Slot zero of the slab; never handed out.
    Reserved,
    Mutable(Box<ElemData>),
    Persistent {
        addr: StorageAddress,
        style_slot: u16,
        font_slot: u16,
    },
}

impl ElemNode {
    pub fn is_persistent(&self) -> bool {
        matches!(self, ElemNode::Persistent { .. })
    }
}
