//! Crate-level error surface. Most node operations deliberately return
//! sentinel values instead of errors; the fallible surfaces are storage,
//! cache I/O, and pointer parsing, unified here for callers that want one
//! error type.

pub use crate::document::CacheError;
pub use crate::storage::StorageError;
pub use crate::xptr::PointerParseError;

#[derive(Debug, thiserror::Error)]
pub enum TinyDomError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    PointerParse(#[from] PointerParseError),
}

pub type TinyDomResult<T> = Result<T, TinyDomError>;
