//! Free-list page: a packed array of released page ids inside one page
//! payload, `count: i32` then `count` pid entries. Pages chain backwards
//! via `prev_page_id`; the head is reached from the root's free-list link
//! and is never released.

use byteorder::{ByteOrder, LittleEndian};

use crate::engine::page::Page;
use crate::types::{PAGE_PAYLOAD_SIZE, PageId, RESERVED_PAGE_COUNT};
use crate::utils::num;

/// Entries per page: the payload minus the count prefix, 4 bytes each.
pub const FREE_LIST_CAPACITY: usize = (PAGE_PAYLOAD_SIZE - 4) / 4;

/// Entry count of a free-list page without taking a mutable view.
#[must_use]
pub fn entry_count(page: &Page) -> usize {
    let raw = LittleEndian::read_i32(&page.payload()[..4]);
    num::i32_to_usize(raw).unwrap_or(0).min(FREE_LIST_CAPACITY)
}

/// Mutable free-list view over a page's payload.
pub struct FreeListView<'a> {
    page: &'a mut Page,
}

impl<'a> FreeListView<'a> {
    pub fn new(page: &'a mut Page) -> Self {
        Self { page }
    }

    /// Number of stored entries, clamped against a damaged prefix.
    #[must_use]
    pub fn count(&self) -> usize {
        entry_count(self.page)
    }

    fn set_count(&mut self, count: usize) {
        let val = num::usize_to_i32(count).unwrap_or(0);
        LittleEndian::write_i32(&mut self.page.payload_mut()[..4], val);
    }

    /// Append a released pid. Reserved metadata pages are rejected, and a
    /// full page returns false so the caller can extend the chain.
    pub fn try_add(&mut self, pid: PageId) -> bool {
        if pid < RESERVED_PAGE_COUNT {
            return false;
        }
        let count = self.count();
        if count >= FREE_LIST_CAPACITY {
            return false;
        }
        let off = 4 + count * 4;
        LittleEndian::write_i32(&mut self.page.payload_mut()[off..off + 4], pid);
        self.set_count(count + 1);
        true
    }

    /// Pop the most recently added entry.
    pub fn get_next(&mut self) -> Option<PageId> {
        let count = self.count();
        if count == 0 {
            return None;
        }
        let off = 4 + (count - 1) * 4;
        let pid = LittleEndian::read_i32(&self.page.payload()[off..off + 4]);
        self.set_count(count - 1);
        if pid < RESERVED_PAGE_COUNT {
            // A reserved pid can only appear through corruption that slipped
            // past the CRC; drop it rather than hand out a metadata page.
            return None;
        }
        Some(pid)
    }
}
