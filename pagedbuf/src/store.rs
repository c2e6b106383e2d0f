// SPDX-License-Identifier: MPL-2.0

//! The page store contract and the built-in volatile backend.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use crate::prelude::*;

/// Stable opaque identity of a page.
///
/// Keys are issued by the page manager from a monotonic counter and never
/// reused within one buffer. Their format is opaque to the store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PageKey(u64);

impl PageKey {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw key value, e.g. for store implementations that
    /// need a primitive to key their own tables with.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

/// Stateless key-to-bytes persistence injected into the buffer.
///
/// All methods may fail; failures surface to the caller as
/// [`Errno::StoreFailed`](crate::Errno::StoreFailed). Implementations must
/// return exactly the bytes most recently saved under a key.
pub trait PageStore {
    /// Loads the payload saved under `key`.
    fn load(&self, key: PageKey) -> Result<Vec<u8>>;

    /// Saves `bytes` under `key`, replacing any previous payload.
    fn save(&self, key: PageKey, bytes: &[u8]) -> Result<()>;

    /// Deletes the payload under `key`. Deleting an absent key is a no-op.
    fn delete(&self, key: PageKey) -> Result<()>;

    /// Whether a payload is currently saved under `key`.
    fn exists(&self, key: PageKey) -> bool;
}

/// An in-memory `PageStore`.
///
/// Cloning yields a second handle onto the same storage, so a test (or an
/// embedder) can keep inspecting the store after moving a handle into the
/// buffer.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<MemStoreInner>,
}

#[derive(Default)]
struct MemStoreInner {
    pages: Mutex<HashMap<PageKey, Vec<u8>>>,
    failing: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent store operation fail until reset.
    ///
    /// Exists so that store-error propagation can be exercised in tests.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::Relaxed);
    }

    /// Number of payloads currently held.
    pub fn page_count(&self) -> usize {
        self.lock_pages().len()
    }

    fn lock_pages(&self) -> std::sync::MutexGuard<'_, HashMap<PageKey, Vec<u8>>> {
        self.inner
            .pages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failing(&self) -> Result<()> {
        if self.inner.failing.load(Ordering::Relaxed) {
            return_errno_with_msg!(StoreFailed, "injected store failure");
        }
        Ok(())
    }
}

impl PageStore for MemStore {
    fn load(&self, key: PageKey) -> Result<Vec<u8>> {
        self.check_failing()?;
        match self.lock_pages().get(&key) {
            Some(bytes) => Ok(bytes.clone()),
            None => return_errno_with_msg!(StoreFailed, "no payload under key"),
        }
    }

    fn save(&self, key: PageKey, bytes: &[u8]) -> Result<()> {
        self.check_failing()?;
        self.lock_pages().insert(key, bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: PageKey) -> Result<()> {
        self.check_failing()?;
        self.lock_pages().remove(&key);
        Ok(())
    }

    fn exists(&self, key: PageKey) -> bool {
        self.lock_pages().contains_key(&key)
    }
}

impl Debug for MemStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemStore")
            .field("pages", &self.page_count())
            .finish()
    }
}
