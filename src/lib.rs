//! # tinydom
//!
//! A compact, memory-efficient XML/HTML DOM engine built for e-book-scale
//! documents: hundreds of thousands of nodes held behind stable 32-bit
//! handles, with node content packed into zlib-compressed 64 KiB chunks and
//! the whole tree persistable to a CRC-framed disk cache.
//!
//! Every node has two representations: a *mutable* heap record for the parts
//! of the tree being actively edited, and a *persistent* serialized record
//! inside chunk storage for everything else. The two convert in place:
//! `persist` and `modify` swap a node's variant without invalidating any
//! handle.
//!
//! The engine is strictly single-threaded: one executor owns the document and
//! everything in it. Wrap the whole [`document::Document`] in a mutex if you
//! need to share it.

pub mod base64stream;
pub mod builder;
pub mod codec;
pub mod document;
pub mod dom;
pub mod error;
pub mod intern;
pub mod storage;
pub mod utils;
pub mod version;
pub mod xptr;

pub mod prelude {
    pub use crate::base64stream::Base64NodeStream;
    pub use crate::builder::{AutoCloseBuilder, DomBuilder, ParserSink};
    pub use crate::document::{CacheMetadata, Document};
    pub use crate::dom::{NodeHandle, RendMethod, RenderRect, StyleData};
    pub use crate::error::*;
    pub use crate::xptr::{XPointer, XPointerEx, XRange, XRangeList};
}
