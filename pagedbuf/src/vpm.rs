// SPDX-License-Identifier: MPL-2.0

//! The virtual page manager: a flat byte address space over demand-loaded
//! pages.
//!
//! Reads and mutations locate their pages through the address index, fault
//! absent pages in from the store, and keep the index contiguous within the
//! same call. Structural changes (splits and merges) are broadcast to a
//! [`PageEventListener`] before the triggering call returns.

use crate::{
    cache::PageCache,
    events::PageEventListener,
    index::{AddressIndex, PageDescriptor},
    page::{scan_newlines, Page, PageState},
    prelude::*,
    store::{PageKey, PageStore},
};

/// Resident-memory accounting, as reported by
/// [`PagedBuffer::get_memory_stats`](crate::PagedBuffer::get_memory_stats).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemoryStats {
    /// Pages known to the address index.
    pub total_pages: usize,
    /// Pages currently resident.
    pub loaded_pages: usize,
    /// Resident pages whose payload has not been written back.
    pub dirty_pages: usize,
    /// Estimated payload bytes held in memory.
    pub resident_bytes: usize,
    /// Lookups served from the cache.
    pub cache_hits: u64,
    /// Lookups that had to fault a page in.
    pub cache_misses: u64,
    /// Pages evicted to stay under the resident bound.
    pub evictions: u64,
}

pub(crate) struct PageManager<S: PageStore> {
    store: S,
    cache: PageCache,
    index: AddressIndex,
    page_size: usize,
    next_key: u64,
}

impl<S: PageStore> PageManager<S> {
    pub fn new(store: S, page_size: usize, max_loaded_pages: usize) -> Result<Self> {
        if page_size == 0 || max_loaded_pages == 0 {
            return_errno_with_msg!(InvalidArgs, "page size and cache limit must be nonzero");
        }
        let mut manager = Self {
            store,
            cache: PageCache::new(max_loaded_pages),
            index: AddressIndex::new(),
            page_size,
            next_key: 0,
        };
        manager.install_empty_page();
        Ok(manager)
    }

    pub fn index(&self) -> &AddressIndex {
        &self.index
    }

    pub fn total_size(&self) -> usize {
        self.index.total_size()
    }

    pub fn get_memory_stats(&self) -> MemoryStats {
        let (loaded_pages, dirty_pages, resident_bytes) = self.cache.usage();
        let (cache_hits, cache_misses, evictions) = self.cache.counters();
        MemoryStats {
            total_pages: self.index.len(),
            loaded_pages,
            dirty_pages,
            resident_bytes,
            cache_hits,
            cache_misses,
            evictions,
        }
    }

    fn alloc_key(&mut self) -> PageKey {
        let key = PageKey::new(self.next_key);
        self.next_key += 1;
        key
    }

    /// The buffer never goes below one page, so that every address in
    /// `[0, total_size]` resolves to page-relative coordinates.
    fn install_empty_page(&mut self) {
        let key = self.alloc_key();
        self.index.push(PageDescriptor {
            key,
            virtual_start: 0,
            virtual_size: 0,
            newlines: Some(Vec::new()),
        });
        self.cache.insert(key, Page::new(Vec::new(), PageState::Dirty));
    }

    /// Resets all state and re-chops `bytes` into pages of the target size.
    pub fn load_content(&mut self, bytes: &[u8]) -> Result<()> {
        for key in self.index.iter().map(|d| d.key).collect::<Vec<_>>() {
            if let Err(err) = self.store.delete(key) {
                warn!("dropping {} from the store failed: {}", key, err);
            }
        }
        self.cache.clear();
        self.index.clear();

        if bytes.is_empty() {
            self.install_empty_page();
            return Ok(());
        }
        let mut start = 0;
        for chunk in bytes.chunks(self.page_size) {
            let key = self.alloc_key();
            self.index.push(PageDescriptor {
                key,
                virtual_start: start,
                virtual_size: chunk.len(),
                newlines: Some(scan_newlines(chunk)),
            });
            self.cache.insert(key, Page::new(chunk.to_vec(), PageState::Dirty));
            self.cache.enforce_limit(&self.store)?;
            start += chunk.len();
        }
        trace!("loaded {} bytes into {} pages", bytes.len(), self.index.len());
        Ok(())
    }

    /// Faults the page of descriptor `i` in from the store if absent.
    fn ensure_loaded(&mut self, i: usize) -> Result<()> {
        let (key, size) = {
            let d = self.index.get(i);
            (d.key, d.virtual_size)
        };
        if self.cache.promote(key) {
            return Ok(());
        }
        let bytes = self.store.load(key)?;
        if bytes.len() != size {
            return_errno_with_msg!(StoreFailed, "store payload does not match page size");
        }
        trace!("faulted in {}", key);
        self.cache.insert(key, Page::new(bytes, PageState::UpToDate));
        self.cache.enforce_limit(&self.store)
    }

    /// Returns the bytes in `[start, end)`.
    pub fn read_range(&mut self, start: usize, end: usize) -> Result<Vec<u8>> {
        if start > end || end > self.total_size() {
            return_errno!(OutOfBounds);
        }
        if start == end {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(end - start);
        let Some(mut i) = self.index.find_page_at(start) else {
            return_errno_with_msg!(OutOfBounds, "no page under read start");
        };
        let mut cursor = start;
        while cursor < end && i < self.index.len() {
            let (key, page_start, page_end) = {
                let d = self.index.get(i);
                (d.key, d.virtual_start, d.end())
            };
            if page_end <= cursor {
                i += 1;
                continue;
            }
            self.ensure_loaded(i)?;
            let page = self.cache.expect_resident(key)?;
            let stop = end.min(page_end);
            out.extend_from_slice(&page.as_slice()[cursor - page_start..stop - page_start]);
            cursor = stop;
            i += 1;
        }
        Ok(out)
    }

    /// Inserts `data` at `addr`, shifting everything after it.
    pub fn insert_at(
        &mut self,
        addr: usize,
        data: &[u8],
        listener: &mut dyn PageEventListener,
    ) -> Result<()> {
        if addr > self.total_size() {
            return_errno!(OutOfBounds);
        }
        if data.is_empty() {
            return Ok(());
        }
        let Some(i) = self.index.find_page_at_inclusive(addr) else {
            return_errno_with_msg!(OutOfBounds, "no page under insert position");
        };
        self.ensure_loaded(i)?;
        let (key, rel) = {
            let d = self.index.get(i);
            (d.key, addr - d.virtual_start)
        };
        self.cache.expect_resident(key)?.insert(rel, data);
        {
            let d = self.index.get_mut(i);
            d.virtual_size += data.len();
            d.newlines = None;
        }
        self.index.shift_tail(i + 1, data.len() as isize);
        self.enforce_split(i, listener)?;
        self.cache.enforce_limit(&self.store)
    }

    /// Chops the page of descriptor `i` into target-sized pages once it has
    /// reached twice the target size.
    fn enforce_split(&mut self, i: usize, listener: &mut dyn PageEventListener) -> Result<()> {
        if self.index.get(i).virtual_size < 2 * self.page_size {
            return Ok(());
        }
        let mut i = i;
        while self.index.get(i).virtual_size > self.page_size {
            self.ensure_loaded(i)?;
            let (orig, start) = {
                let d = self.index.get(i);
                (d.key, d.virtual_start)
            };
            let tail = self
                .cache
                .expect_resident(orig)?
                .split_off(self.page_size);
            let fresh = self.alloc_key();
            let tail_len = tail.len();
            {
                let d = self.index.get_mut(i);
                d.virtual_size = self.page_size;
                d.newlines = None;
            }
            self.index.insert(
                i + 1,
                PageDescriptor {
                    key: fresh,
                    virtual_start: start + self.page_size,
                    virtual_size: tail_len,
                    newlines: None,
                },
            );
            self.cache.insert(fresh, Page::new(tail, PageState::Dirty));
            debug!("split {} at {}, tail now {}", orig, self.page_size, fresh);
            listener.on_split(orig, fresh, self.page_size);
            self.cache.enforce_limit(&self.store)?;
            i += 1;
        }
        Ok(())
    }

    /// Removes and returns the bytes in `[start, end)`.
    pub fn delete_range(
        &mut self,
        start: usize,
        end: usize,
        listener: &mut dyn PageEventListener,
    ) -> Result<Vec<u8>> {
        if start > end || end > self.total_size() {
            return_errno!(OutOfBounds);
        }
        if start == end {
            return Ok(Vec::new());
        }
        let Some(first) = self.index.find_page_at(start) else {
            return_errno_with_msg!(OutOfBounds, "no page under delete start");
        };
        let mut removed = Vec::with_capacity(end - start);
        let mut i = first;
        let mut cursor = start;
        // Per-page removal works in pre-deletion coordinates; the starts are
        // rebuilt in one pass below, within the same call.
        while cursor < end && i < self.index.len() {
            let (key, page_start, page_end) = {
                let d = self.index.get(i);
                (d.key, d.virtual_start, d.end())
            };
            if page_end <= cursor {
                i += 1;
                continue;
            }
            self.ensure_loaded(i)?;
            let stop = end.min(page_end);
            let chunk = self
                .cache
                .expect_resident(key)?
                .remove(cursor - page_start, stop - page_start);
            {
                let d = self.index.get_mut(i);
                d.virtual_size -= chunk.len();
                d.newlines = None;
            }
            removed.extend_from_slice(&chunk);
            cursor = stop;
            i += 1;
        }
        self.index.rebuild_starts_after(first);
        let last = i.saturating_sub(1).max(first);
        self.merge_span(first, last, listener)?;
        self.cache.enforce_limit(&self.store)?;
        Ok(removed)
    }

    /// Overwrites `[addr, addr + data.len())`, extending the buffer if the
    /// range reaches past the end. Returns the replaced bytes.
    pub fn overwrite_at(
        &mut self,
        addr: usize,
        data: &[u8],
        listener: &mut dyn PageEventListener,
    ) -> Result<Vec<u8>> {
        let total = self.total_size();
        if addr > total {
            return_errno!(OutOfBounds);
        }
        let delete_end = addr + data.len().min(total - addr);
        let removed = if delete_end > addr {
            self.delete_range(addr, delete_end, listener)?
        } else {
            Vec::new()
        };
        self.insert_at(addr, data, listener)?;
        Ok(removed)
    }

    /// Coalesces undersized neighbours across the span of shrunken
    /// descriptors `[first, last]`, greedily leftward then rightward.
    fn merge_span(
        &mut self,
        first: usize,
        last: usize,
        listener: &mut dyn PageEventListener,
    ) -> Result<()> {
        let mut i = first.min(self.index.len().saturating_sub(1));
        let mut last = last.min(self.index.len().saturating_sub(1));
        while i > 0 && self.pair_fits(i - 1) {
            self.merge_pair(i - 1, listener)?;
            i -= 1;
            last = last.saturating_sub(1);
        }
        let mut j = i;
        while j + 1 < self.index.len() {
            if self.pair_fits(j) {
                self.merge_pair(j, listener)?;
                if last > j {
                    last -= 1;
                }
            } else if j < last {
                j += 1;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn pair_fits(&self, left: usize) -> bool {
        self.index.get(left).virtual_size + self.index.get(left + 1).virtual_size
            <= self.page_size
    }

    /// Appends the page right of `left` onto it and drops the absorbed page
    /// from the index, the cache, and the store.
    fn merge_pair(&mut self, left: usize, listener: &mut dyn PageEventListener) -> Result<()> {
        let absorbed_key = self.index.get(left + 1).key;
        self.ensure_loaded(left + 1)?;
        let Some(absorbed) = self.cache.take(absorbed_key) else {
            return_errno_with_msg!(NotFound, "absorbed page not resident");
        };
        self.ensure_loaded(left)?;
        let (target_key, left_size) = {
            let d = self.index.get(left);
            (d.key, d.virtual_size)
        };
        self.cache
            .expect_resident(target_key)?
            .append(absorbed.into_bytes());
        let absorbed_desc = self.index.remove(left + 1);
        {
            let d = self.index.get_mut(left);
            d.virtual_size = left_size + absorbed_desc.virtual_size;
            d.newlines = None;
        }
        if let Err(err) = self.store.delete(absorbed_key) {
            warn!("dropping merged {} from the store failed: {}", absorbed_key, err);
        }
        debug!("merged {} into {} at offset {}", absorbed_key, target_key, left_size);
        listener.on_merge(absorbed_key, target_key, left_size);
        Ok(())
    }

    /// The newline table of descriptor `i`, rebuilding it from resident
    /// bytes when possible. `None` means the page is evicted and its table
    /// was invalidated by an edit, so its newlines are unknown.
    pub fn newline_table(&mut self, i: usize) -> Option<&[usize]> {
        if self.index.get(i).newlines.is_none() {
            let key = self.index.get(i).key;
            if let Some(page) = self.cache.peek(key) {
                let table = page.newline_offsets();
                self.index.get_mut(i).newlines = Some(table);
            }
        }
        self.index.get(i).newlines.as_deref()
    }
}

impl<S: PageStore> Debug for PageManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageManager")
            .field("page_size", &self.page_size)
            .field("index", &self.index)
            .field("cache", &self.cache)
            .finish()
    }
}
