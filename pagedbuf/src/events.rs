// SPDX-License-Identifier: MPL-2.0

use crate::store::PageKey;

/// Receiver of page-topology changes.
///
/// The page manager owns the pages and calls out through this trait whenever
/// its topology changes, so that mark bookkeeping can follow page structure
/// without the manager holding a back-pointer to it. Events are delivered
/// before the mutation that caused them returns.
pub trait PageEventListener {
    /// `orig` was split at `split_offset`; the bytes from `split_offset` on
    /// now live in `fresh`, which sits immediately after `orig`.
    fn on_split(&mut self, orig: PageKey, fresh: PageKey, split_offset: usize);

    /// `absorbed` was merged into `target`: its bytes now start at
    /// `insert_offset` within `target`, and `absorbed` no longer exists.
    fn on_merge(&mut self, absorbed: PageKey, target: PageKey, insert_offset: usize);
}

/// A listener that ignores every event.
#[cfg(test)]
pub struct NoopListener;

#[cfg(test)]
impl PageEventListener for NoopListener {
    fn on_split(&mut self, _orig: PageKey, _fresh: PageKey, _split_offset: usize) {}

    fn on_merge(&mut self, _absorbed: PageKey, _target: PageKey, _insert_offset: usize) {}
}
