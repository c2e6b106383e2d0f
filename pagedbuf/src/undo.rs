// SPDX-License-Identifier: MPL-2.0

//! The operation log: every buffer mutation becomes a [`BufferOp`], and
//! close-together operations coalesce into one undoable unit.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::prelude::*;

/// What a buffer mutation did.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) enum OpKind {
    Insert { data: Vec<u8> },
    Delete { original: Vec<u8> },
    Overwrite { data: Vec<u8>, original: Vec<u8> },
}

/// One recorded buffer mutation.
#[derive(Clone, Debug)]
pub(crate) struct BufferOp {
    kind: OpKind,
    /// Virtual address the call was made with.
    pre_position: usize,
    /// Virtual address at which the operation's output begins, once
    /// executed.
    post_position: Option<usize>,
    /// Monotonic number issued on recording.
    seq: u64,
    at: Instant,
}

impl BufferOp {
    fn new(kind: OpKind, pre_position: usize, seq: u64) -> Self {
        Self {
            kind,
            pre_position,
            post_position: Some(pre_position),
            seq,
            at: Instant::now(),
        }
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn pre_position(&self) -> usize {
        self.pre_position
    }

    pub fn post_position(&self) -> usize {
        self.post_position.unwrap_or(self.pre_position)
    }

    fn same_kind(&self, other: &BufferOp) -> bool {
        matches!(
            (&self.kind, &other.kind),
            (OpKind::Insert { .. }, OpKind::Insert { .. })
                | (OpKind::Delete { .. }, OpKind::Delete { .. })
                | (OpKind::Overwrite { .. }, OpKind::Overwrite { .. })
        )
    }

    /// Post-execution footprint: where this operation's output lives. A
    /// delete's footprint is a single point.
    fn footprint(&self) -> (usize, usize) {
        let start = self.post_position();
        let written = match &self.kind {
            OpKind::Insert { data } | OpKind::Overwrite { data, .. } => data.len(),
            OpKind::Delete { .. } => 0,
        };
        (start, start + written)
    }

    /// The span of addresses this operation itself covers, pre-execution.
    fn span(&self) -> (usize, usize) {
        let len = match &self.kind {
            OpKind::Delete { original } => original.len(),
            OpKind::Insert { data } | OpKind::Overwrite { data, .. } => data.len(),
        };
        (self.pre_position, self.pre_position + len)
    }

    /// Spatial gap between two operations; 0 when the first operation's
    /// footprint touches or overlaps the second's span.
    ///
    /// Symmetric in call order: the chronologically earlier operation is
    /// always the footprint side.
    pub fn logical_distance(&self, other: &BufferOp) -> usize {
        let (first, second) = if self.seq <= other.seq {
            (self, other)
        } else {
            (other, self)
        };
        let (f_start, f_end) = first.footprint();
        let (s_start, s_end) = second.span();
        if s_start > f_end {
            s_start - f_end
        } else if f_start > s_end {
            f_start - s_end
        } else {
            0
        }
    }

    /// Folds `next` into this operation when the two form one contiguous
    /// edit. Returns `false` (leaving both untouched) when they do not.
    fn try_fuse(&mut self, next: &BufferOp) -> bool {
        let fused = match (&mut self.kind, &next.kind) {
            (OpKind::Insert { data }, OpKind::Insert { data: next_data }) => {
                let start = self.post_position.unwrap_or(self.pre_position);
                if next.pre_position >= start && next.pre_position <= start + data.len() {
                    let at = next.pre_position - start;
                    data.splice(at..at, next_data.iter().copied());
                    true
                } else {
                    false
                }
            }
            (OpKind::Delete { original }, OpKind::Delete { original: next_original }) => {
                if next.pre_position == self.pre_position {
                    // Forward deletion at a fixed point.
                    original.extend_from_slice(next_original);
                    true
                } else if next.pre_position + next_original.len() == self.pre_position {
                    // Backspacing: the new deletion ends where ours began.
                    let mut combined = next_original.clone();
                    combined.extend_from_slice(original);
                    *original = combined;
                    self.pre_position = next.pre_position;
                    self.post_position = Some(next.pre_position);
                    true
                } else {
                    false
                }
            }
            (
                OpKind::Overwrite { data, original },
                OpKind::Overwrite {
                    data: next_data,
                    original: next_original,
                },
            ) => {
                let start = self.post_position.unwrap_or(self.pre_position);
                if next.pre_position == start + data.len() {
                    data.extend_from_slice(next_data);
                    original.extend_from_slice(next_original);
                    true
                } else {
                    false
                }
            }
            _ => false,
        };
        if fused {
            self.at = next.at;
        }
        fused
    }
}

/// One undoable unit: a run of coalesced operations, reverted newest first.
#[derive(Clone, Debug)]
pub(crate) struct OpGroup {
    ops: Vec<BufferOp>,
}

impl OpGroup {
    fn new(op: BufferOp) -> Self {
        Self { ops: vec![op] }
    }

    pub fn ops(&self) -> &[BufferOp] {
        &self.ops
    }

    fn last(&self) -> &BufferOp {
        // A group is never empty.
        &self.ops[self.ops.len() - 1]
    }

    fn absorb(&mut self, op: BufferOp) {
        let i = self.ops.len() - 1;
        if !self.ops[i].try_fuse(&op) {
            self.ops.push(op);
        }
    }
}

/// Counters reported by [`PagedBuffer::get_undo_stats`](crate::PagedBuffer::get_undo_stats).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct UndoStats {
    /// Undoable units on the undo stack.
    pub undo_groups: usize,
    /// Units on the redo stack.
    pub redo_groups: usize,
    /// Number issued to the most recently recorded operation.
    pub last_op_number: u64,
    /// Operations that were coalesced into an existing unit.
    pub merged_ops: u64,
}

pub(crate) struct UndoLog {
    undo: VecDeque<OpGroup>,
    redo: Vec<OpGroup>,
    enabled: bool,
    max_levels: Option<usize>,
    merge_time_window: Duration,
    merge_distance_window: usize,
    next_seq: u64,
    merged_ops: u64,
}

impl UndoLog {
    pub fn new(
        merge_time_window: Duration,
        merge_distance_window: usize,
        max_levels: Option<usize>,
    ) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            enabled: true,
            max_levels,
            merge_time_window,
            merge_distance_window,
            next_seq: 0,
            merged_ops: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn can_undo(&self) -> bool {
        self.enabled && !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        self.enabled && !self.redo.is_empty()
    }

    /// Forgets redone history; called for every fresh (non-replay) mutation.
    pub fn note_mutation(&mut self) {
        self.redo.clear();
    }

    /// Records a fresh mutation, coalescing it into the top unit when the
    /// merge rules allow.
    pub fn record(&mut self, kind: OpKind, pre_position: usize) {
        if !self.enabled {
            return;
        }
        let op = BufferOp::new(kind, pre_position, self.next_seq);
        self.next_seq += 1;

        let merge = self
            .undo
            .back()
            .map(|group| self.can_merge(group.last(), &op))
            .unwrap_or(false);
        if merge {
            if let Some(group) = self.undo.back_mut() {
                group.absorb(op);
                self.merged_ops += 1;
            }
            return;
        }
        self.undo.push_back(OpGroup::new(op));
        if let Some(max) = self.max_levels {
            while self.undo.len() > max {
                self.undo.pop_front();
            }
        }
    }

    fn can_merge(&self, top: &BufferOp, fresh: &BufferOp) -> bool {
        top.same_kind(fresh)
            && fresh.at.saturating_duration_since(top.at) <= self.merge_time_window
            && top.logical_distance(fresh) <= self.merge_distance_window
    }

    pub fn pop_undo(&mut self) -> Option<OpGroup> {
        if !self.enabled {
            return None;
        }
        self.undo.pop_back()
    }

    pub fn push_redo(&mut self, group: OpGroup) {
        self.redo.push(group);
    }

    pub fn pop_redo(&mut self) -> Option<OpGroup> {
        if !self.enabled {
            return None;
        }
        self.redo.pop()
    }

    pub fn push_undo(&mut self, group: OpGroup) {
        self.undo.push_back(group);
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn stats(&self) -> UndoStats {
        UndoStats {
            undo_groups: self.undo.len(),
            redo_groups: self.redo.len(),
            last_op_number: self.next_seq.saturating_sub(1),
            merged_ops: self.merged_ops,
        }
    }
}

impl Debug for UndoLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoLog")
            .field("undo_groups", &self.undo.len())
            .field("redo_groups", &self.redo.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> UndoLog {
        UndoLog::new(Duration::from_secs(15), 0, None)
    }

    fn insert(data: &[u8], pre: usize, seq: u64) -> BufferOp {
        BufferOp::new(
            OpKind::Insert {
                data: data.to_vec(),
            },
            pre,
            seq,
        )
    }

    #[test]
    fn distance_between_inserts() {
        // insert "A" at 0 executed, then insert "B" at 2: footprint [0, 1],
        // span [2, 3], so the gap is exactly 1.
        let first = insert(b"A", 0, 0);
        let second = insert(b"B", 2, 1);
        assert_eq!(first.logical_distance(&second), 1);
        // Symmetric in call order.
        assert_eq!(second.logical_distance(&first), 1);

        let touching = insert(b"B", 1, 1);
        assert_eq!(first.logical_distance(&touching), 0);
    }

    #[test]
    fn distance_uses_delete_point_footprint() {
        let del = BufferOp::new(
            OpKind::Delete {
                original: b"abc".to_vec(),
            },
            4,
            0,
        );
        // Footprint of the executed delete is the single point 4.
        let next = insert(b"x", 6, 1);
        assert_eq!(del.logical_distance(&next), 2);
        let before = insert(b"x", 2, 1);
        assert_eq!(del.logical_distance(&before), 1);
    }

    #[test]
    fn adjacent_inserts_coalesce() {
        let mut log = log();
        log.record(OpKind::Insert { data: b"a".to_vec() }, 0);
        log.record(OpKind::Insert { data: b"b".to_vec() }, 1);
        log.record(OpKind::Insert { data: b"c".to_vec() }, 2);

        let stats = log.stats();
        assert_eq!(stats.undo_groups, 1);
        assert_eq!(stats.merged_ops, 2);
        // Fused into a single typing-run record.
        let group = log.pop_undo().unwrap();
        assert_eq!(group.ops().len(), 1);
        assert_eq!(
            group.ops()[0].kind(),
            &OpKind::Insert { data: b"abc".to_vec() }
        );
    }

    #[test]
    fn distant_inserts_do_not_coalesce() {
        let mut log = log();
        log.record(OpKind::Insert { data: b"a".to_vec() }, 0);
        log.record(OpKind::Insert { data: b"b".to_vec() }, 5);
        assert_eq!(log.stats().undo_groups, 2);
    }

    #[test]
    fn distance_window_admits_gaps() {
        let mut log = UndoLog::new(Duration::from_secs(15), 1, None);
        log.record(OpKind::Insert { data: b"A".to_vec() }, 0);
        log.record(OpKind::Insert { data: b"B".to_vec() }, 2);
        let stats = log.stats();
        assert_eq!(stats.undo_groups, 1);
        assert_eq!(stats.merged_ops, 1);
        // The gap means the pair cannot fuse into one record; the group
        // keeps both.
        let group = log.pop_undo().unwrap();
        assert_eq!(group.ops().len(), 2);
    }

    #[test]
    fn mixed_kinds_do_not_coalesce() {
        let mut log = log();
        log.record(OpKind::Insert { data: b"a".to_vec() }, 0);
        log.record(
            OpKind::Delete {
                original: b"a".to_vec(),
            },
            0,
        );
        assert_eq!(log.stats().undo_groups, 2);
    }

    #[test]
    fn backspace_deletes_fuse() {
        let mut log = log();
        log.record(
            OpKind::Delete {
                original: b"c".to_vec(),
            },
            2,
        );
        log.record(
            OpKind::Delete {
                original: b"b".to_vec(),
            },
            1,
        );
        log.record(
            OpKind::Delete {
                original: b"a".to_vec(),
            },
            0,
        );
        let group = log.pop_undo().unwrap();
        assert_eq!(group.ops().len(), 1);
        assert_eq!(group.ops()[0].pre_position(), 0);
        assert_eq!(
            group.ops()[0].kind(),
            &OpKind::Delete {
                original: b"abc".to_vec()
            }
        );
    }

    #[test]
    fn level_cap_drops_oldest() {
        let mut log = UndoLog::new(Duration::from_secs(15), 0, Some(2));
        log.record(OpKind::Insert { data: b"a".to_vec() }, 0);
        log.record(OpKind::Insert { data: b"b".to_vec() }, 10);
        log.record(OpKind::Insert { data: b"c".to_vec() }, 20);
        assert_eq!(log.stats().undo_groups, 2);
        // The oldest unit fell off the bottom.
        let newest = log.pop_undo().unwrap();
        assert_eq!(newest.ops()[0].pre_position(), 20);
        let older = log.pop_undo().unwrap();
        assert_eq!(older.ops()[0].pre_position(), 10);
        assert!(log.pop_undo().is_none());
    }

    #[test]
    fn disabled_log_records_nothing() {
        let mut log = log();
        log.set_enabled(false);
        log.record(OpKind::Insert { data: b"a".to_vec() }, 0);
        assert!(!log.can_undo());
        assert!(log.pop_undo().is_none());
    }

    #[test]
    fn redo_cleared_by_fresh_mutation() {
        let mut log = log();
        log.record(OpKind::Insert { data: b"a".to_vec() }, 0);
        let group = log.pop_undo().unwrap();
        log.push_redo(group);
        assert!(log.can_redo());
        log.note_mutation();
        assert!(!log.can_redo());
    }
}
