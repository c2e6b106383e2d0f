// SPDX-License-Identifier: MPL-2.0

//! The address index: an ordered table mapping the flat address space onto
//! pages.

use crate::{prelude::*, store::PageKey};

/// One entry of the address index.
///
/// The cached newline table lives here rather than on the resident page so
/// that line queries can keep using it after the page has been evicted. It is
/// dropped whenever the page's bytes change and rebuilt lazily from resident
/// bytes.
pub(crate) struct PageDescriptor {
    pub key: PageKey,
    pub virtual_start: usize,
    pub virtual_size: usize,
    pub newlines: Option<Vec<usize>>,
}

impl PageDescriptor {
    pub fn end(&self) -> usize {
        self.virtual_start + self.virtual_size
    }
}

/// A dense list of page descriptors, sorted by `virtual_start`, with
/// `descriptors[i + 1].virtual_start == descriptors[i].end()`.
pub(crate) struct AddressIndex {
    descriptors: Vec<PageDescriptor>,
}

impl AddressIndex {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn total_size(&self) -> usize {
        self.descriptors.last().map(|d| d.end()).unwrap_or(0)
    }

    pub fn get(&self, i: usize) -> &PageDescriptor {
        &self.descriptors[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut PageDescriptor {
        &mut self.descriptors[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageDescriptor> {
        self.descriptors.iter()
    }

    /// Index of the page containing `addr`, for `addr < total_size`.
    ///
    /// A zero-sized page never contains an address.
    pub fn find_page_at(&self, addr: usize) -> Option<usize> {
        if addr >= self.total_size() {
            return None;
        }
        Some(self.descriptors.partition_point(|d| d.end() <= addr))
    }

    /// Like [`find_page_at`](Self::find_page_at), but `addr == total_size`
    /// resolves to the last page (where it denotes the end position,
    /// `offset == virtual_size`).
    pub fn find_page_at_inclusive(&self, addr: usize) -> Option<usize> {
        if self.descriptors.is_empty() || addr > self.total_size() {
            return None;
        }
        let i = self.descriptors.partition_point(|d| d.end() <= addr);
        Some(i.min(self.descriptors.len() - 1))
    }

    /// Translates `addr` to page-relative `(key, offset)` coordinates.
    pub fn resolve_address(&self, addr: usize) -> Option<(PageKey, usize)> {
        let i = self.find_page_at_inclusive(addr)?;
        let d = &self.descriptors[i];
        Some((d.key, addr - d.virtual_start))
    }

    /// Translates page-relative coordinates back to a virtual address.
    ///
    /// `None` if no page with that key is present (an orphaned mark).
    pub fn address_of(&self, key: PageKey, offset: usize) -> Option<usize> {
        self.position_of(key)
            .map(|i| self.descriptors[i].virtual_start + offset)
    }

    pub fn position_of(&self, key: PageKey) -> Option<usize> {
        self.descriptors.iter().position(|d| d.key == key)
    }

    pub fn push(&mut self, descriptor: PageDescriptor) {
        self.descriptors.push(descriptor);
    }

    pub fn insert(&mut self, i: usize, descriptor: PageDescriptor) {
        self.descriptors.insert(i, descriptor);
    }

    pub fn remove(&mut self, i: usize) -> PageDescriptor {
        self.descriptors.remove(i)
    }

    pub fn clear(&mut self) {
        self.descriptors.clear();
    }

    /// Shifts `virtual_start` of every descriptor from `from` on by `delta`.
    pub fn shift_tail(&mut self, from: usize, delta: isize) {
        let start = from.min(self.descriptors.len());
        for d in &mut self.descriptors[start..] {
            d.virtual_start = (d.virtual_start as isize + delta) as usize;
        }
    }

    /// Recomputes `virtual_start` of every descriptor after `from` so the
    /// contiguity invariant holds again after a multi-page size change.
    pub fn rebuild_starts_after(&mut self, from: usize) {
        for i in (from + 1)..self.descriptors.len() {
            self.descriptors[i].virtual_start = self.descriptors[i - 1].end();
        }
    }
}

impl Debug for AddressIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressIndex")
            .field("pages", &self.descriptors.len())
            .field("total_size", &self.total_size())
            .finish()
    }
}
