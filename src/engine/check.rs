//! Structural verification: sweep the metadata chains and every reachable
//! page, tally CRC failures and orphans, and report enough detail for an
//! embedder to decide on its own recovery workflow.

use std::collections::HashSet;

use crate::engine::free_list;
use crate::engine::index::{INDEX_ENTRIES, IndexView};
use crate::engine::page::PageType;
use crate::engine::table::PageTable;
use crate::stream::ByteStream;
use crate::types::{PAGE_RAW_SIZE, PageId, RESERVED_PAGE_COUNT, STREAM_HEADER_SIZE};
use crate::utils::errors::DbError;
use crate::utils::num;

/// Diagnostics for one metadata chain.
#[derive(Debug, Clone, Default)]
pub struct ChainDiagnostics {
    pub pages: usize,
    pub intact: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub total_pages: usize,
    pub documents: usize,
    pub index_chain: ChainDiagnostics,
    pub free_chain: ChainDiagnostics,
    pub path_chain: ChainDiagnostics,
    pub free_entries: usize,
    pub corrupt_pages: Vec<PageId>,
    pub orphan_pages: Vec<PageId>,
}

impl ConsistencyReport {
    /// True when every chain walked cleanly and no referenced page failed
    /// CRC. Orphans are garbage, not corruption.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.corrupt_pages.is_empty()
            && self.index_chain.intact
            && self.free_chain.intact
            && self.path_chain.intact
    }
}

impl<S: ByteStream> PageTable<S> {
    /// Verify the store's structure. Read-only; never repairs.
    pub fn verify(&self) -> Result<ConsistencyReport, DbError> {
        let mut report = ConsistencyReport::default();
        let links = self.links_snapshot();
        let len = self.stream_len()?;
        let total_pages = num::u64_to_usize(
            (len.saturating_sub(STREAM_HEADER_SIZE)) / PAGE_RAW_SIZE as u64,
        )
        .unwrap_or(0);
        report.total_pages = total_pages;

        let mut reachable: HashSet<PageId> = (0..RESERVED_PAGE_COUNT).collect();
        let mut corrupt: HashSet<PageId> = HashSet::new();

        // Index chain, and through it every document chain.
        let mut document_ends = Vec::new();
        let mut documents = 0usize;
        report.index_chain = self.walk_chain(
            links.index.try_get(0),
            &mut reachable,
            &mut corrupt,
            |page| {
                let mut page = page.clone();
                let view = IndexView::new(&mut page);
                for slot in 0..INDEX_ENTRIES {
                    if let Some((did, link)) = view.entry(slot)
                        && !did.is_nil()
                    {
                        for rev in 0..2u8 {
                            if let Some(end) = link.try_get(rev) {
                                document_ends.push(end);
                            }
                        }
                        if link.try_get(0).is_some() {
                            documents += 1;
                        }
                    }
                }
            },
        );
        report.documents = documents;
        for end in document_ends {
            let diag = self.walk_chain(Some(end), &mut reachable, &mut corrupt, |_| {});
            if !diag.intact {
                log::warn!("document chain ending at {end} did not walk cleanly");
            }
        }

        // Free chain: its pages are metadata, its entries are reachable
        // garbage-in-waiting.
        let mut free_entries = 0usize;
        report.free_chain = self.walk_chain(
            links.free.try_get(0),
            &mut reachable,
            &mut corrupt,
            |page| {
                if page.page_type == PageType::FreeList {
                    free_entries += free_list::entry_count(page);
                }
            },
        );
        report.free_entries = free_entries;
        let mut free_members: HashSet<PageId> = HashSet::new();
        if let Some(mut cur) = links.free.try_get(0) {
            let mut seen = HashSet::new();
            while cur >= 0 && seen.insert(cur) {
                let Ok(mut page) = self.read_page(cur) else { break };
                for _ in 0..free_list::entry_count(&page) {
                    if let Some(pid) = free_list::FreeListView::new(&mut page).get_next() {
                        free_members.insert(pid);
                    }
                }
                cur = page.prev_page_id;
            }
        }

        // Path trie chain (both revisions).
        report.path_chain =
            self.walk_chain(links.path.try_get(0), &mut reachable, &mut corrupt, |_| {});
        if let Some(prev) = links.path.try_get(1) {
            let _ = self.walk_chain(Some(prev), &mut reachable, &mut corrupt, |_| {});
        }

        for pid in 0..num::usize_to_i32(total_pages).unwrap_or(PageId::MAX) {
            if reachable.contains(&pid) || free_members.contains(&pid) {
                continue;
            }
            match self.read_page(pid) {
                Ok(_) => report.orphan_pages.push(pid),
                Err(e) if e.is_corruption() => {
                    corrupt.insert(pid);
                }
                Err(e) => return Err(e),
            }
        }

        report.corrupt_pages = corrupt.into_iter().collect();
        report.corrupt_pages.sort_unstable();
        report.orphan_pages.sort_unstable();
        if !report.is_healthy() {
            log::warn!(
                "verification found {} corrupt pages, {} broken chains",
                report.corrupt_pages.len(),
                u8::from(!report.index_chain.intact)
                    + u8::from(!report.free_chain.intact)
                    + u8::from(!report.path_chain.intact),
            );
        }
        Ok(report)
    }

    fn walk_chain(
        &self,
        head: Option<PageId>,
        reachable: &mut HashSet<PageId>,
        corrupt: &mut HashSet<PageId>,
        mut visit: impl FnMut(&crate::engine::page::Page),
    ) -> ChainDiagnostics {
        let mut diag = ChainDiagnostics { pages: 0, intact: true };
        let Some(mut cur) = head else {
            diag.intact = false;
            return diag;
        };
        let mut seen = HashSet::new();
        while cur >= 0 {
            if !seen.insert(cur) {
                diag.intact = false;
                return diag;
            }
            reachable.insert(cur);
            match self.read_page(cur) {
                Ok(page) => {
                    diag.pages += 1;
                    visit(&page);
                    cur = page.prev_page_id;
                }
                Err(e) if e.is_corruption() => {
                    corrupt.insert(cur);
                    diag.intact = false;
                    return diag;
                }
                Err(_) => {
                    diag.intact = false;
                    return diag;
                }
            }
        }
        diag
    }
}
