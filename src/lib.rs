#![forbid(unsafe_code)]

//! pagelite: an embeddable document store over an arbitrary random-access
//! byte stream. Documents are opaque byte blobs stored as chains of
//! fixed-size CRC-protected pages, indexed both by a stable 128-bit
//! document id and by human-readable paths. Crash recovery comes from
//! two-slot versioned links: every metadata swap keeps the previous,
//! still-valid side and readers pick the newest side that still passes
//! CRC.
//!
//! The entry point is [`PageTable::open`] over any [`ByteStream`]:
//! an in-memory buffer ([`stream::memory`]), a file
//! ([`stream::FileStream`]), or anything seekable.

pub mod engine;
pub mod stream;
pub mod types;
pub mod utils;

pub use engine::{
    CacheStats, ConsistencyReport, Page, PageChainStream, PageTable, PageType, PathTrie,
    RootLinks, VersionedLink,
};
pub use stream::{ByteStream, FileStream, IoStream, ReadOnly, SharedStream};
pub use types::{DocumentId, PageId};
pub use utils::errors::DbError;
pub use utils::logger;
