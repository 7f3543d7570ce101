//! Node identity and in-memory node payloads: handles, the tiny-node table,
//! the slot payload types, and the hash-consed style/font caches.

pub mod caches;
pub mod handle;
pub mod node;
pub(crate) mod table;

pub use caches::{FontData, RefCache, StyleData, CACHE_SLOT_NONE};
pub use handle::{NodeHandle, StorageAddress};
pub use node::{Attribute, ElemData, RendMethod, RenderRect};
