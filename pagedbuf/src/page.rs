// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

/// A resident page: its byte payload plus its relation to the page store.
pub(crate) struct Page {
    bytes: Vec<u8>,
    state: PageState,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PageState {
    /// The payload is consistent with what the store holds under this key.
    UpToDate,
    /// The payload has been mutated in memory and not yet written back.
    Dirty,
}

impl Page {
    pub fn new(bytes: Vec<u8>, state: PageState) -> Self {
        Self { bytes, state }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn is_dirty(&self) -> bool {
        self.state == PageState::Dirty
    }

    pub fn mark_clean(&mut self) {
        self.state = PageState::UpToDate;
    }

    /// Splices `data` into the payload at `at`.
    pub fn insert(&mut self, at: usize, data: &[u8]) {
        self.bytes.splice(at..at, data.iter().copied());
        self.state = PageState::Dirty;
    }

    /// Removes and returns the payload bytes in `[from, to)`.
    pub fn remove(&mut self, from: usize, to: usize) -> Vec<u8> {
        let removed: Vec<u8> = self.bytes.drain(from..to).collect();
        self.state = PageState::Dirty;
        removed
    }

    /// Truncates the payload at `at` and returns the tail.
    pub fn split_off(&mut self, at: usize) -> Vec<u8> {
        let tail = self.bytes.split_off(at);
        self.state = PageState::Dirty;
        tail
    }

    /// Appends `tail` to the payload.
    pub fn append(&mut self, mut tail: Vec<u8>) {
        self.bytes.append(&mut tail);
        self.state = PageState::Dirty;
    }

    /// In-page offsets of every `\n` octet, in ascending order.
    pub fn newline_offsets(&self) -> Vec<usize> {
        self.bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .map(|(i, _)| i)
            .collect()
    }
}

impl Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("len", &self.bytes.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Newline scan over raw bytes, for pages that are built rather than edited.
pub(crate) fn scan_newlines(bytes: &[u8]) -> Vec<usize> {
    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\n')
        .map(|(i, _)| i)
        .collect()
}
