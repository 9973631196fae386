//! Index page: 126 `{did, versioned link}` entries laid out as an implicit
//! complete binary tree keyed by document id. Slots 0 and 1 are the
//! children of a virtual all-0x7F root; children of slot `i` live at
//! `2i + 2` and `2i + 3`. The link points at the end page of the
//! document's chain.

use crate::engine::version::{LINK_SIZE, VersionedLink};
use crate::types::{DocumentId, PageId};
use crate::utils::errors::DbError;

pub const INDEX_ENTRIES: usize = 126;

/// did(16) + versioned link(10).
const ENTRY_SIZE: usize = 16 + LINK_SIZE;

enum Probe {
    Found(usize),
    Vacant(usize),
    OffEnd,
}

/// Mutable index view over a page's payload.
pub struct IndexView<'a> {
    page: &'a mut crate::engine::page::Page,
}

impl<'a> IndexView<'a> {
    pub fn new(page: &'a mut crate::engine::page::Page) -> Self {
        Self { page }
    }

    fn entry_did(&self, slot: usize) -> DocumentId {
        let off = slot * ENTRY_SIZE;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.page.payload()[off..off + 16]);
        DocumentId::from_bytes(bytes)
    }

    fn entry_link(&self, slot: usize) -> VersionedLink {
        let off = slot * ENTRY_SIZE + 16;
        VersionedLink::read_bytes(&self.page.payload()[off..off + LINK_SIZE])
    }

    fn set_entry(&mut self, slot: usize, did: DocumentId, link: VersionedLink) {
        let off = slot * ENTRY_SIZE;
        let payload = self.page.payload_mut();
        payload[off..off + 16].copy_from_slice(did.as_bytes());
        link.write_bytes(&mut payload[off + 16..off + 16 + LINK_SIZE]);
    }

    /// Walk the implicit tree by byte-wise comparison: left on less, right
    /// on greater. An empty slot ends the walk and is the insertion point.
    fn probe(&self, did: &DocumentId) -> Probe {
        let mut slot = if *did < DocumentId::index_root() { 0 } else { 1 };
        loop {
            if slot >= INDEX_ENTRIES {
                return Probe::OffEnd;
            }
            let occupant = self.entry_did(slot);
            if occupant.is_nil() {
                return Probe::Vacant(slot);
            }
            slot = match did.cmp(&occupant) {
                std::cmp::Ordering::Equal => return Probe::Found(slot),
                std::cmp::Ordering::Less => 2 * slot + 2,
                std::cmp::Ordering::Greater => 2 * slot + 3,
            };
        }
    }

    /// Raw slot access, for diagnostics.
    #[must_use]
    pub fn entry(&self, slot: usize) -> Option<(DocumentId, VersionedLink)> {
        if slot >= INDEX_ENTRIES {
            return None;
        }
        Some((self.entry_did(slot), self.entry_link(slot)))
    }

    pub fn search(&self, did: &DocumentId) -> Option<VersionedLink> {
        match self.probe(did) {
            Probe::Found(slot) => Some(self.entry_link(slot)),
            _ => None,
        }
    }

    /// Place a fresh entry whose link starts at `(pid, version 0)`.
    /// Returns false when the walk runs off the array (the caller moves on
    /// to the next index page in the chain).
    pub fn try_insert(&mut self, did: &DocumentId, pid: PageId) -> Result<bool, DbError> {
        match self.probe(did) {
            Probe::Found(_) => Err(DbError::DuplicateDocument(*did)),
            Probe::Vacant(slot) => {
                self.set_entry(slot, *did, VersionedLink::to_page(pid));
                Ok(true)
            }
            Probe::OffEnd => Ok(false),
        }
    }

    /// Record a new end page for an existing document. Returns `None` when
    /// the did is not on this page, otherwise the expired pid (negative
    /// when a slot was still free).
    pub fn update(&mut self, did: &DocumentId, new_pid: PageId) -> Option<PageId> {
        match self.probe(did) {
            Probe::Found(slot) => {
                let mut link = self.entry_link(slot);
                let expired = link.write_new(new_pid);
                self.set_entry(slot, *did, link);
                Some(expired)
            }
            _ => None,
        }
    }

    /// Clear the entry back to the zero did. Slots are not compacted.
    pub fn remove(&mut self, did: &DocumentId) -> bool {
        match self.probe(did) {
            Probe::Found(slot) => {
                self.set_entry(slot, DocumentId::nil(), VersionedLink::empty());
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::page::{Page, PageType};
    use crate::types::NO_PAGE;

    fn index_page() -> Page {
        let mut page = Page::new(1);
        page.page_type = PageType::Index;
        page
    }

    #[test]
    fn entries_fit_the_payload() {
        assert!(INDEX_ENTRIES * ENTRY_SIZE <= crate::types::PAGE_PAYLOAD_SIZE);
        assert_eq!(INDEX_ENTRIES * ENTRY_SIZE, 3276);
    }

    #[test]
    fn insert_then_search_finds_the_link() {
        let mut page = index_page();
        let mut view = IndexView::new(&mut page);
        let did = DocumentId::new();
        assert!(view.try_insert(&did, 17).unwrap());
        let link = view.search(&did).unwrap();
        assert_eq!(link.try_get(0), Some(17));
        assert_eq!(view.search(&DocumentId::new()), None);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut page = index_page();
        let mut view = IndexView::new(&mut page);
        let did = DocumentId::new();
        view.try_insert(&did, 5).unwrap();
        assert!(matches!(
            view.try_insert(&did, 6),
            Err(DbError::DuplicateDocument(d)) if d == did
        ));
    }

    #[test]
    fn update_expires_the_older_version() {
        let mut page = index_page();
        let mut view = IndexView::new(&mut page);
        let did = DocumentId::new();
        view.try_insert(&did, 5).unwrap();
        assert_eq!(view.update(&did, 6), Some(NO_PAGE));
        assert_eq!(view.update(&did, 7), Some(5));
        let link = view.search(&did).unwrap();
        assert_eq!(link.try_get(0), Some(7));
        assert_eq!(link.try_get(1), Some(6));
        assert_eq!(view.update(&DocumentId::new(), 9), None);
    }

    #[test]
    fn remove_clears_the_slot_without_compaction() {
        let mut page = index_page();
        let mut view = IndexView::new(&mut page);
        let a = DocumentId::new();
        let b = DocumentId::new();
        view.try_insert(&a, 5).unwrap();
        view.try_insert(&b, 6).unwrap();
        assert!(view.remove(&a));
        assert!(!view.remove(&a));
        assert!(view.search(&b).is_some());
    }

    #[test]
    fn a_degenerate_walk_runs_off_the_array() {
        // Strictly descending dids always branch left, exhausting one path
        // of the tree in a handful of inserts.
        let mut page = index_page();
        let mut view = IndexView::new(&mut page);
        let mut inserted = 0u32;
        for b in (0u8..=0x6F).rev() {
            let did = DocumentId::from_bytes([b; 16]);
            if view.try_insert(&did, PageId::from(b) + 100).unwrap() {
                inserted += 1;
            } else {
                break;
            }
        }
        // Left spine: slots 0, 2, 6, 14, 30, 62; slot 126 is off the end.
        assert_eq!(inserted, 6);
    }
}
