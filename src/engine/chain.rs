//! Stream view over a document's page chain. The chain is a singly linked
//! reverse list, so the first use walks `prev_page_id` from the end page,
//! caches each page's pid and used length, and reverses the cache into
//! forward order. Reads go through the page table's LRU cache; the write
//! path exists for the engine's own trie persistence and can extend the
//! chain one page at a time.

use std::io::{self, Read, Seek, SeekFrom};

use crate::engine::page::Page;
use crate::engine::table::{PageTable, TableState};
use crate::stream::ByteStream;
use crate::types::{PAGE_PAYLOAD_SIZE, PageId};
use crate::utils::errors::DbError;
use crate::utils::num;

pub struct PageChainStream<'a, S: ByteStream> {
    table: &'a PageTable<S>,
    end_pid: PageId,
    /// Forward-ordered `(pid, used_len)` built from the reverse walk.
    pages: Vec<(PageId, usize)>,
    total_len: u64,
    pos: u64,
}

impl<'a, S: ByteStream> PageChainStream<'a, S> {
    pub(crate) fn open(table: &'a PageTable<S>, end_pid: PageId) -> Result<Self, DbError> {
        if end_pid < 0 {
            return Err(DbError::InvalidPageId(end_pid));
        }
        let mut pages = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut cur = end_pid;
        while cur >= 0 {
            if !seen.insert(cur) {
                return Err(DbError::ChainLoop(cur));
            }
            let page = table.read_page(cur)?;
            pages.push((cur, page.used_len().min(PAGE_PAYLOAD_SIZE)));
            cur = page.prev_page_id;
        }
        pages.reverse();
        let total_len = pages.iter().map(|&(_, used)| num::usize_to_u64(used)).sum();
        Ok(Self { table, end_pid, pages, total_len, pos: 0 })
    }

    /// The chain's canonical handle: the pid of its final page.
    #[must_use]
    pub fn end_pid(&self) -> PageId {
        self.end_pid
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.total_len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub(crate) fn contains(&self, pid: PageId) -> bool {
        self.pages.iter().any(|&(p, _)| p == pid)
    }

    /// Drain the remaining bytes, preserving typed errors.
    pub fn read_all_bytes(&mut self) -> Result<Vec<u8>, DbError> {
        let remaining = self.total_len.saturating_sub(self.pos);
        let mut out = Vec::with_capacity(num::u64_to_usize(remaining).unwrap_or(0));
        while self.pos < self.total_len {
            let slot = num::u64_to_usize(self.pos / PAGE_PAYLOAD_SIZE as u64).unwrap_or(usize::MAX);
            let Some(&(pid, used)) = self.pages.get(slot) else { break };
            let offset = (self.pos % PAGE_PAYLOAD_SIZE as u64) as usize;
            if offset >= used {
                break;
            }
            let page = self.table.read_page(pid)?;
            out.extend_from_slice(&page.payload()[offset..used]);
            self.pos += num::usize_to_u64(used - offset);
        }
        Ok(out)
    }

    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, DbError> {
        if buf.is_empty() || self.pos >= self.total_len {
            return Ok(0);
        }
        let slot = num::u64_to_usize(self.pos / PAGE_PAYLOAD_SIZE as u64).unwrap_or(usize::MAX);
        let Some(&(pid, used)) = self.pages.get(slot) else { return Ok(0) };
        let offset = (self.pos % PAGE_PAYLOAD_SIZE as u64) as usize;
        if offset >= used {
            return Ok(0);
        }
        let page = self.table.read_page(pid)?;
        let n = buf.len().min(used - offset);
        buf[..n].copy_from_slice(&page.payload()[offset..offset + n]);
        self.pos += num::usize_to_u64(n);
        Ok(n)
    }

    /// Overwrite chain bytes starting at `pos`, extending the chain by one
    /// page at a time when the write runs off the end. Only the engine
    /// uses this, for persisting the path trie.
    pub(crate) fn write_at(
        &mut self,
        state: &mut TableState,
        pos: u64,
        data: &[u8],
    ) -> Result<(), DbError> {
        let mut pos = pos;
        let mut data = data;
        while !data.is_empty() {
            let slot = num::u64_to_usize(pos / PAGE_PAYLOAD_SIZE as u64)
                .ok_or(DbError::DocumentTooLarge)?;
            if slot >= self.pages.len() {
                self.extend_chain(state)?;
                continue;
            }
            if slot == self.pages.len() - 1 && pos > self.page_start(slot) + self.pages[slot].1 as u64
            {
                // Writing past the tail's used bytes would leave a gap.
                return Err(DbError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "write past end of chain",
                )));
            }
            let offset = (pos % PAGE_PAYLOAD_SIZE as u64) as usize;
            let n = data.len().min(PAGE_PAYLOAD_SIZE - offset);
            let mut page = self.table.read_page(self.pages[slot].0)?;
            page.payload_mut()[offset..offset + n].copy_from_slice(&data[..n]);
            if page.is_chain_end() {
                let used = self.pages[slot].1.max(offset + n);
                page.set_end_marker(used);
                self.total_len += num::usize_to_u64(used - self.pages[slot].1);
                self.pages[slot].1 = used;
            }
            self.table.commit_page(&page)?;
            pos += num::usize_to_u64(n);
            data = &data[n..];
        }
        Ok(())
    }

    fn page_start(&self, slot: usize) -> u64 {
        num::usize_to_u64(slot) * PAGE_PAYLOAD_SIZE as u64
    }

    /// Append a fresh page: the old end's sentinel becomes a forward
    /// pointer and the new page becomes the chain handle.
    fn extend_chain(&mut self, state: &mut TableState) -> Result<(), DbError> {
        let new_pid = self.table.pop_or_append(state)?;
        let mut old_end = self.table.read_page(self.end_pid)?;
        debug_assert!(old_end.is_chain_end());
        let mut page = Page::new(new_pid);
        page.page_type = old_end.page_type;
        page.did = old_end.did;
        page.first_page_id = old_end.first_page_id;
        page.sequence = old_end.sequence.wrapping_add(1);
        page.prev_page_id = self.end_pid;
        page.set_end_marker(0);
        self.table.commit_page(&page)?;
        old_end.next_page_id = new_pid;
        self.table.commit_page(&old_end)?;
        self.end_pid = new_pid;
        self.pages.push((new_pid, 0));
        Ok(())
    }
}

impl<S: ByteStream> Read for PageChainStream<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_some(buf).map_err(io::Error::other)
    }
}

impl<S: ByteStream> Seek for PageChainStream<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(p) => i128::from(p),
            SeekFrom::End(delta) => i128::from(self.total_len) + i128::from(delta),
            // Relative seeks clamp at the total length.
            SeekFrom::Current(delta) => {
                (i128::from(self.pos) + i128::from(delta)).min(i128::from(self.total_len))
            }
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of chain",
            ));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }
}
