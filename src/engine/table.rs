//! The page table owns initialisation, page allocation (free-list first,
//! then append), chain walking, commits, the document-id index chain, the
//! path trie and the root links. It is the only writer of any shared
//! structure; all stream I/O funnels through the single lease token.
//!
//! Lock order: table state, then page cache, then the stream token. Never
//! the reverse.

use std::collections::HashSet;
use std::io::Read;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::engine::chain::PageChainStream;
use crate::engine::free_list::{self, FreeListView};
use crate::engine::index::IndexView;
use crate::engine::page::{Page, PageType};
use crate::engine::root::RootLinks;
use crate::engine::trie::{self, PathTrie, TRIE_HEADER_SIZE, TRIE_TERMINATOR};
use crate::engine::version::VersionedLink;
use crate::stream::{ByteStream, SharedStream};
use crate::types::{
    DocumentId, FIRST_FREE_PAGE_ID, FIRST_INDEX_PAGE_ID, FIRST_PATH_PAGE_ID, MAX_CHAIN_PAGES,
    NO_PAGE, PAGE_PAYLOAD_SIZE, PAGE_RAW_SIZE, PageId, RESERVED_PAGE_COUNT, STREAM_HEADER_SIZE,
};
use crate::utils::errors::DbError;
use crate::utils::num;

const PAGE_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(2048).unwrap();

/// Page-cache hit/miss counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Mutable engine state guarded by the table lock: the root links, the
/// append watermark and the in-memory path trie with its chain handle.
pub(crate) struct TableState {
    pub(crate) links: RootLinks,
    pub(crate) next_append: PageId,
    pub(crate) trie: Option<PathTrie>,
    pub(crate) path_end: PageId,
}

/// Thread-safe page table over a host byte stream.
pub struct PageTable<S: ByteStream> {
    stream: SharedStream<S>,
    state: Mutex<TableState>,
    cache: Mutex<LruCache<PageId, Page>>,
    stats: Mutex<CacheStats>,
}

impl<S: ByteStream> PageTable<S> {
    /// Open a database on `stream`. An empty stream is initialised with
    /// the magic header, the root page and the three metadata chains.
    /// A non-empty stream without the magic is *NotADatabase*; one with
    /// the magic but shorter than the mandatory metadata pages is
    /// *TruncatedDatabase*.
    pub fn open(mut stream: S) -> Result<Self, DbError> {
        let len = stream.len()?;
        let state = if len == 0 {
            Self::initialize(&mut stream)?
        } else {
            Self::recover(&mut stream, len)?
        };
        Ok(Self {
            stream: SharedStream::new(stream),
            state: Mutex::new(state),
            cache: Mutex::new(LruCache::new(PAGE_CACHE_CAPACITY)),
            stats: Mutex::new(CacheStats::default()),
        })
    }

    fn initialize(stream: &mut S) -> Result<TableState, DbError> {
        let links = RootLinks::initial();
        stream.seek(0)?;
        stream.write(&links.encode_header()).map_err(DbError::from_write)?;

        links.to_mirror_page().commit(stream)?;

        let mut index = Page::new(FIRST_INDEX_PAGE_ID);
        index.page_type = PageType::Index;
        index.commit(stream)?;

        let mut free = Page::new(FIRST_FREE_PAGE_ID);
        free.page_type = PageType::FreeList;
        free.commit(stream)?;

        let mut empty_trie = PathTrie::new();
        let trie_bytes = empty_trie.to_bytes()?;
        let mut path = Page::new(FIRST_PATH_PAGE_ID);
        path.page_type = PageType::PathLookup;
        path.did = DocumentId::path_index();
        path.set_end_marker(trie_bytes.len());
        path.payload_mut()[..trie_bytes.len()].copy_from_slice(&trie_bytes);
        path.commit(stream)?;

        stream.flush().map_err(DbError::from_write)?;
        log::debug!("initialised empty database: header + {RESERVED_PAGE_COUNT} metadata pages");
        empty_trie.mark_persisted(0);
        Ok(TableState {
            links,
            next_append: RESERVED_PAGE_COUNT,
            trie: Some(empty_trie),
            path_end: FIRST_PATH_PAGE_ID,
        })
    }

    fn recover(stream: &mut S, len: u64) -> Result<TableState, DbError> {
        if len < STREAM_HEADER_SIZE {
            let mut magic = vec![0u8; len.min(8) as usize];
            stream.seek(0)?;
            stream.read_exact(&mut magic)?;
            if magic.len() == 8 && magic == crate::types::MAGIC {
                return Err(DbError::TruncatedDatabase(len));
            }
            return Err(DbError::NotADatabase);
        }
        let mut header = [0u8; STREAM_HEADER_SIZE as usize];
        stream.seek(0)?;
        stream.read_exact(&mut header)?;
        let mut links = RootLinks::decode_header(&header)?;
        let mandatory = STREAM_HEADER_SIZE + RESERVED_PAGE_COUNT as u64 * PAGE_RAW_SIZE as u64;
        if len < mandatory {
            return Err(DbError::TruncatedDatabase(len));
        }
        // A header link with no valid side falls back to the CRC-protected
        // mirror on page 0.
        if links.index.is_empty() || links.path.is_empty() || links.free.is_empty() {
            match Page::read(stream, crate::types::ROOT_PAGE_ID) {
                Ok(mirror) => {
                    let copy = RootLinks::from_mirror_page(&mirror);
                    if links.index.is_empty() {
                        log::warn!("index link empty in header, using root-page mirror");
                        links.index = copy.index;
                    }
                    if links.path.is_empty() {
                        log::warn!("path link empty in header, using root-page mirror");
                        links.path = copy.path;
                    }
                    if links.free.is_empty() {
                        log::warn!("free-list link empty in header, using root-page mirror");
                        links.free = copy.free;
                    }
                }
                Err(e) => log::warn!("root mirror page unreadable: {e}"),
            }
        }
        let pages = (len - STREAM_HEADER_SIZE).div_ceil(PAGE_RAW_SIZE as u64);
        let next_append = num::u64_to_usize(pages)
            .and_then(num::usize_to_i32)
            .ok_or(DbError::InvalidPageId(PageId::MAX))?;
        Ok(TableState { links, next_append, trie: None, path_end: NO_PAGE })
    }

    // --- page I/O ---

    /// Read and CRC-validate a page, through the LRU cache.
    pub fn read_page(&self, pid: PageId) -> Result<Page, DbError> {
        if pid < 0 {
            return Err(DbError::InvalidPageId(pid));
        }
        if let Some(page) = self.cache.lock().get(&pid) {
            self.stats.lock().hits += 1;
            return Ok(page.clone());
        }
        self.stats.lock().misses += 1;
        let page = {
            let mut lease = self.stream.read_lease();
            Page::read(&mut *lease, pid)?
        };
        self.cache.lock().put(pid, page.clone());
        Ok(page)
    }

    /// Update the CRC and write the page in place as one aligned write;
    /// the lease release flushes it.
    pub fn commit_page(&self, page: &Page) -> Result<(), DbError> {
        {
            let mut lease = self.stream.write_lease();
            page.commit(&mut *lease)?;
        }
        self.cache.lock().put(page.pid(), page.clone());
        Ok(())
    }

    /// Deterministic durability point for the embedder.
    pub fn flush(&self) -> Result<(), DbError> {
        self.stream.write_lease().flush().map_err(DbError::from_write)
    }

    /// Current length of the underlying stream, in bytes.
    pub fn stream_len(&self) -> Result<u64, DbError> {
        Ok(self.stream.read_lease().len()?)
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    pub(crate) fn links_snapshot(&self) -> RootLinks {
        self.state.lock().links
    }

    // --- allocation ---

    /// Allocate `n` pages: free-list entries first, then fresh pages at
    /// the end of the stream.
    pub fn allocate_block(&self, n: usize) -> Result<Vec<PageId>, DbError> {
        let mut state = self.state.lock();
        self.allocate_block_locked(&mut state, n)
    }

    pub(crate) fn allocate_block_locked(
        &self,
        state: &mut TableState,
        n: usize,
    ) -> Result<Vec<PageId>, DbError> {
        (0..n).map(|_| self.pop_or_append(state)).collect()
    }

    pub(crate) fn pop_or_append(&self, state: &mut TableState) -> Result<PageId, DbError> {
        if let Some(pid) = self.pop_free(state)? {
            log::debug!("allocated page {pid} from the free list");
            return Ok(pid);
        }
        let pid = state.next_append;
        state.next_append += 1;
        Ok(pid)
    }

    fn pop_free(&self, state: &mut TableState) -> Result<Option<PageId>, DbError> {
        for rev in 0..2u8 {
            let Some(head) = state.links.free.try_get(rev) else { continue };
            match self.pop_free_from(head) {
                Ok(found) => return Ok(found),
                Err(e) if e.is_corruption() => {
                    log::warn!("free list from page {head} unreadable ({e}), trying fallback");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn pop_free_from(&self, head: PageId) -> Result<Option<PageId>, DbError> {
        let mut seen = HashSet::new();
        let mut cur = head;
        while cur >= 0 {
            if !seen.insert(cur) {
                return Err(DbError::ChainLoop(cur));
            }
            let mut page = self.read_page(cur)?;
            let next = page.prev_page_id;
            let popped = FreeListView::new(&mut page).get_next();
            if let Some(pid) = popped {
                self.commit_page(&page)?;
                return Ok(Some(pid));
            }
            // Emptied pages stay in the chain; they fill back up when
            // entries return.
            cur = next;
        }
        Ok(None)
    }

    /// Push a released pid onto the free list. When the head page is full
    /// the released page itself becomes the new head.
    fn push_free(&self, state: &mut TableState, pid: PageId) -> Result<(), DbError> {
        if pid < RESERVED_PAGE_COUNT {
            log::warn!("refusing to release reserved page {pid}");
            return Ok(());
        }
        let head = self.free_head(state)?;
        let mut head_page = self.read_page(head)?;
        let head_seq = head_page.sequence;
        if FreeListView::new(&mut head_page).try_add(pid) {
            self.commit_page(&head_page)?;
            return Ok(());
        }
        let mut page = Page::new(pid);
        page.page_type = PageType::FreeList;
        page.first_page_id = FIRST_FREE_PAGE_ID;
        page.sequence = head_seq.wrapping_add(1);
        page.prev_page_id = head;
        self.commit_page(&page)?;
        // Former heads stay linked via prev_page_id, so the pid expired
        // out of the link is still part of the chain and is never
        // released.
        let _expired = state.links.free.write_new(pid);
        self.persist_links(state)?;
        log::debug!("free list extended: page {pid} is the new head");
        Ok(())
    }

    fn free_head(&self, state: &TableState) -> Result<PageId, DbError> {
        self.resolve_link(&state.links.free, "free list")
    }

    /// Newest link side whose referenced page still validates; falls back
    /// to the previous revision with a warning.
    fn resolve_link(&self, link: &VersionedLink, what: &str) -> Result<PageId, DbError> {
        let mut first_err: Option<DbError> = None;
        for rev in 0..2u8 {
            let Some(pid) = link.try_get(rev) else { continue };
            match self.read_page(pid) {
                Ok(_) => {
                    if rev == 1 {
                        log::warn!("{what}: newest revision unreadable, using previous head {pid}");
                    }
                    return Ok(pid);
                }
                Err(e) if e.is_corruption() => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(first_err.unwrap_or(DbError::DamagedMetadata))
    }

    fn persist_links(&self, state: &TableState) -> Result<(), DbError> {
        let header = state.links.encode_header();
        {
            let mut lease = self.stream.write_lease();
            lease.seek(0)?;
            lease.write(&header).map_err(DbError::from_write)?;
        }
        self.commit_page(&state.links.to_mirror_page())
    }

    // --- chains ---

    /// Walk `prev_page_id` from the end of a chain, newest page first.
    /// Detects cycles via a seen-set.
    pub(crate) fn collect_chain(&self, end_pid: PageId) -> Result<Vec<PageId>, DbError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut cur = end_pid;
        while cur >= 0 {
            if !seen.insert(cur) {
                return Err(DbError::ChainLoop(cur));
            }
            let page = self.read_page(cur)?;
            out.push(cur);
            cur = page.prev_page_id;
        }
        Ok(out)
    }

    /// Push every page of the chain ending at `end_pid` onto the free
    /// list. Page data is not erased. Returns the number of pages
    /// released.
    pub fn release_chain(&self, end_pid: PageId) -> Result<usize, DbError> {
        let mut state = self.state.lock();
        self.release_chain_locked(&mut state, end_pid)
    }

    fn release_chain_locked(
        &self,
        state: &mut TableState,
        end_pid: PageId,
    ) -> Result<usize, DbError> {
        let pids = self.collect_chain(end_pid)?;
        for &pid in &pids {
            self.push_free(state, pid)?;
        }
        log::debug!("released {} pages from chain ending at {end_pid}", pids.len());
        Ok(pids.len())
    }

    // --- document writes and reads ---

    /// Write a document as a fresh page chain and return the end pid (the
    /// chain's canonical handle). The caller binds it with `bind_index`.
    pub fn write_stream<R: Read>(&self, did: &DocumentId, reader: &mut R) -> Result<PageId, DbError> {
        if did.is_reserved() {
            return Err(DbError::InvalidDocumentId(*did));
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let mut state = self.state.lock();
        self.write_chain_locked(&mut state, did, &data)
    }

    pub(crate) fn write_chain_locked(
        &self,
        state: &mut TableState,
        did: &DocumentId,
        data: &[u8],
    ) -> Result<PageId, DbError> {
        if data.is_empty() {
            return Err(DbError::EmptyPayload);
        }
        let page_count = data.len().div_ceil(PAGE_PAYLOAD_SIZE);
        if page_count > MAX_CHAIN_PAGES {
            return Err(DbError::DocumentTooLarge);
        }
        let pids = self.allocate_block_locked(state, page_count)?;
        let page_type = if *did == DocumentId::path_index() {
            PageType::PathLookup
        } else {
            PageType::Data
        };
        for (i, chunk) in data.chunks(PAGE_PAYLOAD_SIZE).enumerate() {
            let mut page = Page::new(pids[i]);
            page.page_type = page_type;
            page.did = *did;
            page.first_page_id = pids[0];
            page.sequence = i as u16;
            page.prev_page_id = if i == 0 { NO_PAGE } else { pids[i - 1] };
            if i + 1 < page_count {
                page.next_page_id = pids[i + 1];
            } else {
                page.set_end_marker(chunk.len());
            }
            page.payload_mut()[..chunk.len()].copy_from_slice(chunk);
            self.commit_page(&page)?;
        }
        Ok(pids[page_count - 1])
    }

    /// Seekable read view over the chain ending at `end_pid`.
    pub fn get_stream(&self, end_pid: PageId) -> Result<PageChainStream<'_, S>, DbError> {
        PageChainStream::open(self, end_pid)
    }

    /// Read a whole document by id. `None` when the id is not indexed.
    pub fn read_document(&self, did: &DocumentId) -> Result<Option<Vec<u8>>, DbError> {
        let Some(end) = self.get_document_head(did)? else { return Ok(None) };
        let mut stream = self.get_stream(end)?;
        Ok(Some(stream.read_all_bytes()?))
    }

    // --- document-id index ---

    fn index_head(&self, state: &TableState) -> Result<PageId, DbError> {
        self.resolve_link(&state.links.index, "index chain")
    }

    fn find_index_link(
        &self,
        state: &TableState,
        did: &DocumentId,
    ) -> Result<Option<VersionedLink>, DbError> {
        let head = self.index_head(state)?;
        let mut seen = HashSet::new();
        let mut cur = head;
        while cur >= 0 {
            if !seen.insert(cur) {
                return Err(DbError::ChainLoop(cur));
            }
            let mut page = self.read_page(cur)?;
            if let Some(link) = IndexView::new(&mut page).search(did) {
                return Ok(Some(link));
            }
            cur = page.prev_page_id;
        }
        Ok(None)
    }

    /// Bind (or rebind) a document id to the end page of its chain.
    /// Returns the pid expired out of the entry's versioned link, or a
    /// negative sentinel when a slot was still free. The caller decides
    /// when to release the expired chain.
    pub fn bind_index(&self, did: &DocumentId, new_end_pid: PageId) -> Result<PageId, DbError> {
        if did.is_reserved() {
            return Err(DbError::InvalidDocumentId(*did));
        }
        let mut state = self.state.lock();
        let head = self.index_head(&state)?;

        // Update pass: the chain is walked most-recent first.
        let mut seen = HashSet::new();
        let mut cur = head;
        while cur >= 0 {
            if !seen.insert(cur) {
                return Err(DbError::ChainLoop(cur));
            }
            let mut page = self.read_page(cur)?;
            let updated = IndexView::new(&mut page).update(did, new_end_pid);
            if let Some(expired) = updated {
                self.commit_page(&page)?;
                return Ok(expired);
            }
            cur = page.prev_page_id;
        }

        // Insert pass over the already-validated chain.
        cur = head;
        while cur >= 0 {
            let mut page = self.read_page(cur)?;
            let inserted = IndexView::new(&mut page).try_insert(did, new_end_pid)?;
            if inserted {
                self.commit_page(&page)?;
                return Ok(NO_PAGE);
            }
            cur = page.prev_page_id;
        }

        // Every page rejected the walk: prepend a fresh index page so the
        // most recently bound documents are found fastest.
        let pid = self.pop_or_append(&mut state)?;
        let head_seq = self.read_page(head)?.sequence;
        let mut page = Page::new(pid);
        page.page_type = PageType::Index;
        page.first_page_id = FIRST_INDEX_PAGE_ID;
        page.sequence = head_seq.wrapping_add(1);
        page.prev_page_id = head;
        IndexView::new(&mut page).try_insert(did, new_end_pid)?;
        self.commit_page(&page)?;
        // The expired pid is an older head still linked via prev; index
        // chain pages are never released.
        let _expired = state.links.index.write_new(pid);
        self.persist_links(&state)?;
        log::debug!("index chain extended with page {pid}");
        Ok(NO_PAGE)
    }

    /// Clear a document's index entry. The slot is zeroed, not compacted.
    pub fn unbind_index(&self, did: &DocumentId) -> Result<bool, DbError> {
        let state = self.state.lock();
        self.unbind_index_locked(&state, did)
    }

    fn unbind_index_locked(&self, state: &TableState, did: &DocumentId) -> Result<bool, DbError> {
        let head = self.index_head(state)?;
        let mut seen = HashSet::new();
        let mut cur = head;
        while cur >= 0 {
            if !seen.insert(cur) {
                return Err(DbError::ChainLoop(cur));
            }
            let mut page = self.read_page(cur)?;
            let removed = IndexView::new(&mut page).remove(did);
            if removed {
                self.commit_page(&page)?;
                return Ok(true);
            }
            cur = page.prev_page_id;
        }
        Ok(false)
    }

    /// End page of the newest chain revision whose end page passes CRC;
    /// falls back to the previous revision before surfacing corruption.
    pub fn get_document_head(&self, did: &DocumentId) -> Result<Option<PageId>, DbError> {
        let link = {
            let state = self.state.lock();
            self.find_index_link(&state, did)?
        };
        let Some(link) = link else { return Ok(None) };
        let mut first_err: Option<DbError> = None;
        for rev in 0..2u8 {
            let Some(pid) = link.try_get(rev) else { continue };
            match self.read_page(pid) {
                Ok(_) => {
                    if rev == 1 {
                        log::warn!("document {did}: newest revision corrupt, reading previous");
                    }
                    return Ok(Some(pid));
                }
                Err(e) if e.is_corruption() => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(first_err.unwrap_or(DbError::DamagedMetadata))
    }

    /// Release every live revision of a document, clear its index entry
    /// and unbind all of its paths.
    pub fn delete_document(&self, did: &DocumentId) -> Result<bool, DbError> {
        let mut state = self.state.lock();
        let Some(link) = self.find_index_link(&state, did)? else {
            return Ok(false);
        };
        self.unbind_index_locked(&state, did)?;
        for rev in 0..2u8 {
            let Some(end) = link.try_get(rev) else { continue };
            match self.release_chain_locked(&mut state, end) {
                Ok(_) => {}
                Err(e) if e.is_corruption() => {
                    log::warn!("could not release revision {rev} of {did}: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        self.load_trie(&mut state)?;
        let changed = {
            let Some(trie) = state.trie.as_mut() else { return Err(DbError::DamagedMetadata) };
            let paths = trie.paths_for(did);
            let mut changed = false;
            for path in &paths {
                changed |= trie.delete(path);
            }
            changed
        };
        if changed {
            self.persist_trie(&mut state)?;
        }
        Ok(true)
    }

    // --- path trie ---

    fn load_trie(&self, state: &mut TableState) -> Result<(), DbError> {
        if state.trie.is_some() {
            return Ok(());
        }
        let mut first_err: Option<DbError> = None;
        for rev in 0..2u8 {
            let Some(end) = state.links.path.try_get(rev) else { continue };
            match self.read_trie_chain(end) {
                Ok(loaded) => {
                    if rev == 1 {
                        log::warn!("path trie: newest revision unreadable, loaded previous");
                    }
                    state.trie = Some(loaded);
                    state.path_end = end;
                    return Ok(());
                }
                Err(e) if e.is_corruption() || matches!(e, DbError::DamagedMetadata) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(first_err.unwrap_or(DbError::DamagedMetadata))
    }

    fn read_trie_chain(&self, end: PageId) -> Result<PathTrie, DbError> {
        let mut chain = PageChainStream::open(self, end)?;
        let bytes = chain.read_all_bytes()?;
        PathTrie::from_bytes(&bytes)
    }

    /// Persist the in-memory trie: append new nodes into the existing
    /// chain when possible, otherwise rewrite the whole document and swap
    /// the root's path link.
    fn persist_trie(&self, state: &mut TableState) -> Result<(), DbError> {
        let (dirty, full) = match state.trie.as_ref() {
            Some(trie) => (trie.is_dirty(), trie.needs_full_rewrite()),
            None => return Ok(()),
        };
        if !dirty {
            return Ok(());
        }
        if full || state.path_end < 0 {
            let bytes = match state.trie.as_ref() {
                Some(trie) => trie.to_bytes()?,
                None => return Ok(()),
            };
            let new_end =
                self.write_chain_locked(state, &DocumentId::path_index(), &bytes)?;
            let new_chain = self.collect_chain(new_end)?;
            let old_end = state.path_end;
            let expired = state.links.path.write_new(new_end);
            self.persist_links(state)?;
            state.path_end = new_end;
            // The immediately superseded snapshot stays live as the
            // fallback revision; the pid expired out of the link belongs
            // to an older cycle and is reclaimed unless it is still part
            // of a chain we can reach.
            if expired >= 0 && expired != old_end && !new_chain.contains(&expired) {
                if let Err(e) = self.release_chain_locked(state, expired) {
                    log::warn!("could not release superseded path chain {expired}: {e}");
                }
            }
            if let Some(trie) = state.trie.as_mut() {
                trie.mark_persisted(bytes.len() - TRIE_HEADER_SIZE - TRIE_TERMINATOR.len());
            }
        } else {
            let (tail, old_region) = match state.trie.as_ref() {
                Some(trie) => (trie.unpersisted_tail()?, trie.persisted_bytes()),
                None => return Ok(()),
            };
            let mut chain = PageChainStream::open(self, state.path_end)?;
            let mut buf = tail.clone();
            buf.extend_from_slice(&TRIE_TERMINATOR);
            // New records first, length header last: a crash in between
            // leaves the shorter, still-valid snapshot in charge.
            chain.write_at(state, (TRIE_HEADER_SIZE + old_region) as u64, &buf)?;
            let new_region = old_region + tail.len();
            let mut header = Vec::with_capacity(TRIE_HEADER_SIZE);
            let region_len = num::usize_to_u32(new_region).ok_or(DbError::PathIndexFull)?;
            trie::write_varint_wide(&mut header, region_len)?;
            chain.write_at(state, 0, &header)?;
            let new_end = chain.end_pid();
            if new_end != state.path_end {
                let old_end = state.path_end;
                let expired = state.links.path.write_new(new_end);
                self.persist_links(state)?;
                state.path_end = new_end;
                if expired >= 0 && expired != old_end && !chain.contains(expired) {
                    if let Err(e) = self.release_chain_locked(state, expired) {
                        log::warn!("could not release superseded path chain {expired}: {e}");
                    }
                }
            }
            if let Some(trie) = state.trie.as_mut() {
                trie.mark_persisted(new_region);
            }
        }
        Ok(())
    }

    /// Bind a path to a document id, returning the previous binding.
    pub fn bind_path(&self, path: &str, did: &DocumentId) -> Result<Option<DocumentId>, DbError> {
        if did.is_reserved() {
            return Err(DbError::InvalidDocumentId(*did));
        }
        let mut state = self.state.lock();
        self.load_trie(&mut state)?;
        let old = {
            let Some(trie) = state.trie.as_mut() else { return Err(DbError::DamagedMetadata) };
            trie.add(path, *did)?
        };
        self.persist_trie(&mut state)?;
        Ok(old)
    }

    /// Remove a path binding. Returns whether anything changed.
    pub fn unbind_path(&self, path: &str) -> Result<bool, DbError> {
        let mut state = self.state.lock();
        self.load_trie(&mut state)?;
        let changed = {
            let Some(trie) = state.trie.as_mut() else { return Err(DbError::DamagedMetadata) };
            trie.delete(path)
        };
        if changed {
            self.persist_trie(&mut state)?;
        }
        Ok(changed)
    }

    pub fn get_document_id_by_path(&self, path: &str) -> Result<Option<DocumentId>, DbError> {
        let mut state = self.state.lock();
        self.load_trie(&mut state)?;
        Ok(state.trie.as_ref().and_then(|trie| trie.get(path)))
    }

    pub fn paths_for_document(&self, did: &DocumentId) -> Result<Vec<String>, DbError> {
        let mut state = self.state.lock();
        self.load_trie(&mut state)?;
        Ok(state.trie.as_ref().map(|trie| trie.paths_for(did)).unwrap_or_default())
    }

    pub fn search_paths(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        let mut state = self.state.lock();
        self.load_trie(&mut state)?;
        Ok(state.trie.as_ref().map(|trie| trie.search(prefix)).unwrap_or_default())
    }

    // --- diagnostics ---

    /// Total entries currently parked on the free list.
    pub fn count_free_pages(&self) -> Result<usize, DbError> {
        let state = self.state.lock();
        let Some(head) = state.links.free.try_get(0) else { return Ok(0) };
        drop(state);
        let mut seen = HashSet::new();
        let mut total = 0usize;
        let mut cur = head;
        while cur >= 0 {
            if !seen.insert(cur) {
                return Err(DbError::ChainLoop(cur));
            }
            let page = self.read_page(cur)?;
            total += free_list::entry_count(&page);
            cur = page.prev_page_id;
        }
        Ok(total)
    }
}
