//! Stable node identifiers. A handle packs a slot index and a type nibble
//! into 32 bits; a storage address packs a chunk index and a 16-byte-granular
//! offset. Neither ever contains a memory address, so both survive chunk
//! compaction and slab growth.

/// Nibble bit marking an element node (clear means text).
const KIND_ELEMENT: u32 = 0b0001;
/// Nibble bit marking a persistent node (clear means mutable).
const FLAG_PERSISTENT: u32 = 0b0010;

/// Stable 32-bit identifier of a node.
///
/// Layout: the high 28 bits are the slot index within the node's kind-specific
/// slab, the low 4 bits describe the node. Bit 0 distinguishes element from
/// text, bit 1 persistent from mutable; the remaining two bits are reserved.
/// The all-zero value is the null handle.
///
/// Lookups only consult the slot index and the kind bit: a handle taken
/// before a `persist`/`modify` variant switch keeps resolving to the same
/// node even though its persistent bit is stale. The canonical handle for a
/// node (with the persistent bit reflecting the current variant) is whatever
/// the owning document reports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub const NULL: NodeHandle = NodeHandle(0);

    pub(crate) fn element(slot: usize, persistent: bool) -> Self {
        debug_assert!(slot < (1 << 28));
        let mut nibble = KIND_ELEMENT;
        if persistent {
            nibble |= FLAG_PERSISTENT;
        }
        NodeHandle(((slot as u32) << 4) | nibble)
    }

    pub(crate) fn text(slot: usize, persistent: bool) -> Self {
        debug_assert!(slot < (1 << 28));
        let nibble = if persistent { FLAG_PERSISTENT } else { 0 };
        NodeHandle(((slot as u32) << 4) | nibble)
    }

    pub fn from_raw(raw: u32) -> Self {
        NodeHandle(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn is_element(self) -> bool {
        !self.is_null() && self.0 & KIND_ELEMENT != 0
    }

    pub fn is_text(self) -> bool {
        !self.is_null() && self.0 & KIND_ELEMENT == 0
    }

    /// The persistent bit as recorded in the handle itself. May lag behind
    /// the node's current variant; the document's `is_persistent` is
    /// authoritative.
    pub fn persistent_bit(self) -> bool {
        self.0 & FLAG_PERSISTENT != 0
    }

    pub(crate) fn slot(self) -> usize {
        (self.0 >> 4) as usize
    }

    /// Copy of the handle with the persistent bit forced. Handy for
    /// comparing handles taken on either side of a variant switch.
    pub fn with_persistent(self, persistent: bool) -> Self {
        if persistent {
            NodeHandle(self.0 | FLAG_PERSISTENT)
        } else {
            NodeHandle(self.0 & !FLAG_PERSISTENT)
        }
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            return write!(f, "NodeHandle(null)");
        }
        write!(
            f,
            "NodeHandle({}:{}{})",
            if self.is_element() { "elem" } else { "text" },
            self.slot(),
            if self.persistent_bit() { ":p" } else { "" },
        )
    }
}

/// Location of a record inside chunked storage: high 16 bits select the
/// chunk, low 16 bits hold the byte offset divided by 16.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageAddress(u32);

impl StorageAddress {
    pub(crate) fn new(chunk: usize, byte_offset: usize) -> Self {
        debug_assert!(chunk <= u16::MAX as usize);
        debug_assert_eq!(byte_offset % 16, 0);
        debug_assert!(byte_offset >> 4 <= u16::MAX as usize);
        StorageAddress(((chunk as u32) << 16) | ((byte_offset >> 4) as u32))
    }

    pub(crate) fn chunk(self) -> usize {
        (self.0 >> 16) as usize
    }

    pub(crate) fn byte_offset(self) -> usize {
        ((self.0 & 0xffff) << 4) as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Debug for StorageAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageAddress({}+{:#x})", self.chunk(), self.byte_offset())
    }
}
