//! The root of the store: magic bytes plus three versioned links (index
//! chain head, path-trie chain head, free-list head). The 38-byte stream
//! header is the authoritative copy; page 0 mirrors the links under CRC
//! and serves as the fallback when a header link carries no valid page.

use crate::engine::page::{Page, PageType};
use crate::engine::version::{LINK_SIZE, VersionedLink};
use crate::types::{
    FIRST_FREE_PAGE_ID, FIRST_INDEX_PAGE_ID, FIRST_PATH_PAGE_ID, MAGIC, ROOT_PAGE_ID,
    STREAM_HEADER_SIZE,
};
use crate::utils::errors::DbError;

/// Link order inside the header and the mirror payload.
const LINK_INDEX: usize = 0;
const LINK_PATH: usize = 1;
const LINK_FREE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootLinks {
    pub index: VersionedLink,
    pub path: VersionedLink,
    pub free: VersionedLink,
}

impl RootLinks {
    /// Initial wiring: index chain at page 1, path trie at page 3, free
    /// list at page 2.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            index: VersionedLink::to_page(FIRST_INDEX_PAGE_ID),
            path: VersionedLink::to_page(FIRST_PATH_PAGE_ID),
            free: VersionedLink::to_page(FIRST_FREE_PAGE_ID),
        }
    }

    fn links(&self) -> [&VersionedLink; 3] {
        [&self.index, &self.path, &self.free]
    }

    /// Serialize the 38-byte stream header: magic, then the links at
    /// `8 + idx * 10`.
    #[must_use]
    pub fn encode_header(&self) -> [u8; STREAM_HEADER_SIZE as usize] {
        let mut out = [0u8; STREAM_HEADER_SIZE as usize];
        out[..8].copy_from_slice(&MAGIC);
        for (idx, link) in self.links().into_iter().enumerate() {
            let off = 8 + idx * LINK_SIZE;
            link.write_bytes(&mut out[off..off + LINK_SIZE]);
        }
        out
    }

    /// Parse a stream header, failing with `NotADatabase` on a magic
    /// mismatch.
    pub fn decode_header(buf: &[u8]) -> Result<Self, DbError> {
        if buf.len() < STREAM_HEADER_SIZE as usize || buf[..8] != MAGIC {
            return Err(DbError::NotADatabase);
        }
        let read = |idx: usize| {
            let off = 8 + idx * LINK_SIZE;
            VersionedLink::read_bytes(&buf[off..off + LINK_SIZE])
        };
        Ok(Self { index: read(LINK_INDEX), path: read(LINK_PATH), free: read(LINK_FREE) })
    }

    /// Build the page-0 mirror carrying the same three links in its
    /// payload.
    #[must_use]
    pub fn to_mirror_page(&self) -> Page {
        let mut page = Page::new(ROOT_PAGE_ID);
        page.page_type = PageType::Root;
        page.first_page_id = ROOT_PAGE_ID;
        for (idx, link) in self.links().into_iter().enumerate() {
            let off = idx * LINK_SIZE;
            link.write_bytes(&mut page.payload_mut()[off..off + LINK_SIZE]);
        }
        page
    }

    /// Read the mirrored links back out of a root page.
    #[must_use]
    pub fn from_mirror_page(page: &Page) -> Self {
        let read = |idx: usize| {
            let off = idx * LINK_SIZE;
            VersionedLink::read_bytes(&page.payload()[off..off + LINK_SIZE])
        };
        Self { index: read(LINK_INDEX), path: read(LINK_PATH), free: read(LINK_FREE) }
    }
}
