// SPDX-License-Identifier: MPL-2.0

use lru::LruCache;

use crate::{
    page::Page,
    prelude::*,
    store::{PageKey, PageStore},
};

/// Resident pages, in least-recently-used order.
///
/// The LRU list is unbounded and the limit is enforced explicitly, because a
/// page picked for eviction may be dirty and must make it through the store
/// before it can be dropped.
pub(crate) struct PageCache {
    pages: LruCache<PageKey, Page>,
    max_loaded: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl PageCache {
    pub fn new(max_loaded: usize) -> Self {
        Self {
            pages: LruCache::unbounded(),
            max_loaded,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Promotes `key` to most-recently-used. Returns whether it is resident.
    pub fn promote(&mut self, key: PageKey) -> bool {
        if self.pages.get(&key).is_some() {
            self.hits += 1;
            true
        } else {
            self.misses += 1;
            false
        }
    }

    pub fn insert(&mut self, key: PageKey, page: Page) {
        self.pages.put(key, page);
    }

    /// The resident page under `key`, which the caller has just loaded or
    /// promoted.
    pub fn expect_resident(&mut self, key: PageKey) -> Result<&mut Page> {
        match self.pages.get_mut(&key) {
            Some(page) => Ok(page),
            None => return_errno_with_msg!(NotFound, "page not resident"),
        }
    }

    /// Non-promoting lookup.
    pub fn peek(&self, key: PageKey) -> Option<&Page> {
        self.pages.peek(&key)
    }

    /// Removes and returns the resident page under `key`.
    pub fn take(&mut self, key: PageKey) -> Option<Page> {
        self.pages.pop(&key)
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Evicts pages until the resident count is back under the limit.
    ///
    /// Clean pages go first, in LRU order; a dirty page is picked (and
    /// flushed to `store` before being dropped) only when no clean
    /// candidate is left. The most recently touched page is never evicted;
    /// the caller is in the middle of using it.
    pub fn enforce_limit<S: PageStore>(&mut self, store: &S) -> Result<()> {
        while self.pages.len() > self.max_loaded && self.pages.len() > 1 {
            // The iterator runs most-recently-used first, so the last
            // candidate seen in each tier is the LRU-most one.
            let mut clean = None;
            let mut dirty = None;
            for (key, page) in self.pages.iter().skip(1) {
                if page.is_dirty() {
                    dirty = Some(*key);
                } else {
                    clean = Some(*key);
                }
            }
            let Some(key) = clean.or(dirty) else {
                break;
            };
            if let Some(page) = self.pages.peek_mut(&key) {
                if page.is_dirty() {
                    store.save(key, page.as_slice())?;
                    page.mark_clean();
                }
            }
            self.pages.pop(&key);
            self.evictions += 1;
            debug!("evicted {}", key);
        }
        Ok(())
    }

    /// (loaded pages, dirty pages, resident payload bytes)
    pub fn usage(&self) -> (usize, usize, usize) {
        let mut dirty = 0;
        let mut bytes = 0;
        for (_, page) in self.pages.iter() {
            if page.is_dirty() {
                dirty += 1;
            }
            bytes += page.len();
        }
        (self.pages.len(), dirty, bytes)
    }

    pub fn counters(&self) -> (u64, u64, u64) {
        (self.hits, self.misses, self.evictions)
    }
}

impl Debug for PageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageCache")
            .field("loaded", &self.pages.len())
            .field("max_loaded", &self.max_loaded)
            .finish()
    }
}
