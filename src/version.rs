//! Cache format identity constants. The magic line doubles as a human-readable
//! marker at the very start of a cache file; bumping the version string
//! invalidates every cache written by earlier builds.

/// Magic string at offset zero of every document cache file. Includes the
/// format version, so a version bump is automatically a magic mismatch for
/// older and newer readers alike.
pub const CACHE_FILE_MAGIC: &[u8] = b"CoolReader3 Document Cache File\nformat version 3.01.06\n";

/// Fixed size of the cache file header block. The header is zero-padded up to
/// this boundary and every section offset is aligned to it.
pub const CACHE_HEADER_SIZE: usize = 4096;

/// Section payloads are padded out to this alignment within the cache file.
pub const CACHE_SECTION_ALIGN: usize = 4096;
