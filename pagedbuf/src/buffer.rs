// SPDX-License-Identifier: MPL-2.0

//! The buffer facade: byte mutations, marks, line queries and undo behind
//! one surface.
//!
//! Every mutation follows the same discipline: capture the target virtual
//! addresses of the marks the edit can move, run the byte mutation (during
//! which the page manager reports splits and merges straight into the mark
//! registry), then reapply the captured addresses through the updated
//! address index. Capturing before and reapplying after is what keeps a
//! mark from being shifted twice when the same edit also splits its page.

use std::{collections::BTreeMap, time::Duration};

use crate::{
    lines::{self, LineInfo},
    marks::{MarkPos, MarkRegistry},
    prelude::*,
    store::PageStore,
    undo::{OpKind, UndoLog, UndoStats},
    vpm::{MemoryStats, PageManager},
};

/// Construction-time tuning knobs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BufferConfig {
    /// Target page size in bytes.
    pub page_size: usize,
    /// Resident-page bound of the page cache.
    pub max_loaded_pages: usize,
    /// Two operations recorded further apart than this never coalesce.
    pub merge_time_window_ms: u64,
    /// Maximum logical distance at which operations still coalesce.
    pub merge_distance_window: usize,
    /// Cap on undoable units; `None` means unbounded.
    pub max_undo_levels: Option<usize>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            page_size: 65536,
            max_loaded_pages: 32,
            merge_time_window_ms: 15000,
            merge_distance_window: 0,
            max_undo_levels: None,
        }
    }
}

/// A paged byte buffer over an injected page store.
pub struct PagedBuffer<S: PageStore> {
    vpm: PageManager<S>,
    marks: MarkRegistry,
    undo: UndoLog,
    config: BufferConfig,
}

impl<S: PageStore> PagedBuffer<S> {
    /// Creates an empty buffer with the default configuration.
    pub fn new(store: S) -> Result<Self> {
        Self::with_config(store, BufferConfig::default())
    }

    pub fn with_config(store: S, config: BufferConfig) -> Result<Self> {
        Ok(Self {
            vpm: PageManager::new(store, config.page_size, config.max_loaded_pages)?,
            marks: MarkRegistry::new(),
            undo: UndoLog::new(
                Duration::from_millis(config.merge_time_window_ms),
                config.merge_distance_window,
                config.max_undo_levels,
            ),
            config,
        })
    }

    pub fn config(&self) -> BufferConfig {
        self.config
    }

    /// Replaces the whole buffer content. Marks and edit history are reset.
    pub fn load_content(&mut self, bytes: &[u8]) -> Result<()> {
        self.vpm.load_content(bytes)?;
        self.marks.clear();
        self.undo.clear();
        Ok(())
    }

    pub fn get_total_size(&self) -> usize {
        self.vpm.total_size()
    }

    pub fn get_memory_stats(&self) -> MemoryStats {
        self.vpm.get_memory_stats()
    }

    /// Returns the bytes in `[start, end)`, faulting pages in as needed.
    pub fn read_range(&mut self, start: usize, end: usize) -> Result<Vec<u8>> {
        self.vpm.read_range(start, end)
    }

    /// Alias of [`read_range`](Self::read_range).
    pub fn get_bytes(&mut self, start: usize, end: usize) -> Result<Vec<u8>> {
        self.read_range(start, end)
    }

    /// Inserts `data` at `addr`.
    pub fn insert_bytes(&mut self, addr: usize, data: &[u8]) -> Result<()> {
        self.edit_insert(addr, data)?;
        self.undo.note_mutation();
        self.undo.record(
            OpKind::Insert {
                data: data.to_vec(),
            },
            addr,
        );
        Ok(())
    }

    /// Removes and returns the bytes in `[start, end)`.
    pub fn delete_bytes(&mut self, start: usize, end: usize) -> Result<Vec<u8>> {
        let removed = self.edit_delete(start, end)?;
        self.undo.note_mutation();
        self.undo.record(
            OpKind::Delete {
                original: removed.clone(),
            },
            start,
        );
        Ok(removed)
    }

    /// Replaces `[addr, addr + data.len())` with `data`, extending the
    /// buffer when the range reaches past the end. Returns the replaced
    /// bytes.
    pub fn overwrite_bytes(&mut self, addr: usize, data: &[u8]) -> Result<Vec<u8>> {
        let replaced = self.edit_overwrite(addr, data)?;
        self.undo.note_mutation();
        self.undo.record(
            OpKind::Overwrite {
                data: data.to_vec(),
                original: replaced.clone(),
            },
            addr,
        );
        Ok(replaced)
    }

    fn edit_insert(&mut self, addr: usize, data: &[u8]) -> Result<()> {
        let captured = self.capture_marks(addr, addr, data.len());
        self.vpm.insert_at(addr, data, &mut self.marks)?;
        self.reapply_marks(captured);
        Ok(())
    }

    fn edit_delete(&mut self, start: usize, end: usize) -> Result<Vec<u8>> {
        let captured = self.capture_marks(start, end, 0);
        let removed = self.vpm.delete_range(start, end, &mut self.marks)?;
        self.reapply_marks(captured);
        Ok(removed)
    }

    fn edit_overwrite(&mut self, addr: usize, data: &[u8]) -> Result<Vec<u8>> {
        let total = self.vpm.total_size();
        if addr > total {
            return_errno!(OutOfBounds);
        }
        let end = addr + data.len().min(total - addr);
        let captured = self.capture_marks(addr, end, data.len());
        let replaced = self.vpm.overwrite_at(addr, data, &mut self.marks)?;
        self.reapply_marks(captured);
        Ok(replaced)
    }

    /// Computes, for every mark at or past `v_start`, the virtual address it
    /// must end up at after a mutation replacing `[v_start, v_end)` with
    /// `inserted` bytes. Marks strictly below `v_start` are left to the
    /// structural-event bookkeeping alone.
    fn capture_marks(
        &self,
        v_start: usize,
        v_end: usize,
        inserted: usize,
    ) -> Vec<(String, usize)> {
        let removed = v_end - v_start;
        let mut captured = Vec::new();
        for (name, pos) in self.marks.iter() {
            let Some(p) = self.vpm.index().address_of(pos.page, pos.offset) else {
                warn!("mark {:?} references a vanished page", name);
                continue;
            };
            if p < v_start {
                continue;
            }
            let target = if p == v_start {
                p
            } else if p < v_end {
                // Inside the replaced region: consolidate, never drop.
                v_start
            } else {
                p + inserted - removed
            };
            captured.push((name.clone(), target));
        }
        captured
    }

    fn reapply_marks(&mut self, captured: Vec<(String, usize)>) {
        let total = self.vpm.total_size();
        for (name, addr) in captured {
            match self.vpm.index().resolve_address(addr.min(total)) {
                Some((page, offset)) => self.marks.set(&name, MarkPos { page, offset }),
                None => {
                    // Keep the pre-mutation coordinates rather than failing
                    // the whole mutation over one mark.
                    warn!("mark {:?} could not be repositioned to {}", name, addr);
                }
            }
        }
    }

    // === Marks ===

    /// Places (or moves) the named mark at a virtual address.
    pub fn set_mark(&mut self, name: &str, addr: usize) -> Result<()> {
        if name.is_empty() {
            return_errno_with_msg!(InvalidArgs, "empty mark name");
        }
        if addr > self.vpm.total_size() {
            return_errno!(OutOfBounds);
        }
        let Some((page, offset)) = self.vpm.index().resolve_address(addr) else {
            return_errno_with_msg!(OutOfBounds, "address resolves to no page");
        };
        self.marks.set(name, MarkPos { page, offset });
        Ok(())
    }

    /// The mark's current virtual address, or `None` if it does not exist or
    /// its page has vanished (an orphaned mark is reported, not reclaimed).
    pub fn get_mark(&self, name: &str) -> Option<usize> {
        let pos = self.marks.get(name)?;
        let addr = self.vpm.index().address_of(pos.page, pos.offset);
        if addr.is_none() {
            debug!("mark {:?} is orphaned", name);
        }
        addr
    }

    pub fn remove_mark(&mut self, name: &str) -> bool {
        self.marks.remove(name)
    }

    /// All marks with their addresses, sorted by address then name.
    pub fn get_all_marks(&self) -> Vec<(String, usize)> {
        let mut all: Vec<(String, usize)> = self
            .marks
            .iter()
            .filter_map(|(name, pos)| {
                self.vpm
                    .index()
                    .address_of(pos.page, pos.offset)
                    .map(|addr| (name.clone(), addr))
            })
            .collect();
        all.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        all
    }

    /// Marks whose address lies in `[start, end)`.
    pub fn get_marks_in_range(&self, start: usize, end: usize) -> Vec<(String, usize)> {
        self.get_all_marks()
            .into_iter()
            .filter(|(_, addr)| (start..end).contains(addr))
            .collect()
    }

    /// Report form of extraction: `(name, offset relative to start)` for
    /// every mark in `[start, end)`. The marks themselves are untouched.
    pub fn get_marks_in_deleted_content(&self, start: usize, end: usize) -> Vec<(String, usize)> {
        self.get_marks_in_range(start, end)
            .into_iter()
            .map(|(name, addr)| (name, addr - start))
            .collect()
    }

    /// Remove form of extraction: deletes every mark in `[start, end)` from
    /// the registry and returns them as `(name, relative offset)` tuples.
    pub fn remove_marks_from_range(&mut self, start: usize, end: usize) -> Vec<(String, usize)> {
        let extracted = self.get_marks_in_deleted_content(start, end);
        for (name, _) in &extracted {
            self.marks.remove(name);
        }
        extracted
    }

    /// Sets each `name` to `addr + relative`.
    pub fn insert_marks_from_relative(
        &mut self,
        addr: usize,
        relative_marks: &[(String, usize)],
    ) -> Result<()> {
        for (name, rel) in relative_marks {
            self.set_mark(name, addr + rel)?;
        }
        Ok(())
    }

    // === Composite byte+mark operations ===

    /// Reads `[start, end)` along with the contained marks in relative form,
    /// ready to be re-inserted elsewhere.
    pub fn get_bytes_with_marks(
        &mut self,
        start: usize,
        end: usize,
    ) -> Result<(Vec<u8>, Vec<(String, usize)>)> {
        let bytes = self.read_range(start, end)?;
        Ok((bytes, self.get_marks_in_deleted_content(start, end)))
    }

    /// Inserts `data` at `addr` and plants `relative_marks` inside it.
    pub fn insert_bytes_with_marks(
        &mut self,
        addr: usize,
        data: &[u8],
        relative_marks: &[(String, usize)],
    ) -> Result<()> {
        self.insert_bytes(addr, data)?;
        self.insert_marks_from_relative(addr, relative_marks)
    }

    /// Cut: removes `[start, end)` and returns both the bytes and the marks
    /// that lived there (removed from the registry, in relative form).
    pub fn delete_bytes_with_marks(
        &mut self,
        start: usize,
        end: usize,
    ) -> Result<(Vec<u8>, Vec<(String, usize)>)> {
        let extracted = self.remove_marks_from_range(start, end);
        let removed = self.delete_bytes(start, end)?;
        Ok((removed, extracted))
    }

    /// Overwrite variant of [`delete_bytes_with_marks`](Self::delete_bytes_with_marks):
    /// replaces the range, returns what was there, and plants the given
    /// marks into the new content.
    pub fn overwrite_bytes_with_marks(
        &mut self,
        addr: usize,
        data: &[u8],
        relative_marks: &[(String, usize)],
    ) -> Result<(Vec<u8>, Vec<(String, usize)>)> {
        let total = self.vpm.total_size();
        if addr > total {
            return_errno!(OutOfBounds);
        }
        let end = addr + data.len().min(total - addr);
        let extracted = self.remove_marks_from_range(addr, end);
        let replaced = self.overwrite_bytes(addr, data)?;
        self.insert_marks_from_relative(addr, relative_marks)?;
        Ok((replaced, extracted))
    }

    /// Drops marks whose page has vanished and repairs marks whose offset
    /// overruns their page. Returns `(removed, repaired)` counts.
    pub fn validate_and_cleanup_marks(&mut self) -> (usize, usize) {
        let mut removed = 0;
        let mut repaired = 0;
        let snapshot: Vec<(String, MarkPos)> = self
            .marks
            .iter()
            .map(|(name, pos)| (name.clone(), *pos))
            .collect();
        for (name, pos) in snapshot {
            let Some(i) = self.vpm.index().position_of(pos.page) else {
                warn!("dropping mark {:?}: its page vanished", name);
                self.marks.remove(&name);
                removed += 1;
                continue;
            };
            let size = self.vpm.index().get(i).virtual_size;
            if pos.offset > size {
                let fixed = if i + 1 < self.vpm.index().len() {
                    MarkPos {
                        page: self.vpm.index().get(i + 1).key,
                        offset: 0,
                    }
                } else {
                    MarkPos {
                        page: pos.page,
                        offset: size,
                    }
                };
                self.marks.set(&name, fixed);
                repaired += 1;
            }
        }
        (removed, repaired)
    }

    /// Marks as a name-to-address map, for the host to persist.
    pub fn get_all_marks_for_persistence(&self) -> BTreeMap<String, usize> {
        self.get_all_marks().into_iter().collect()
    }

    /// Replaces the registry from persisted data. Negative addresses are
    /// silently dropped; addresses past the end are clamped to it.
    pub fn set_marks_from_persistence<I>(&mut self, persisted: I)
    where
        I: IntoIterator<Item = (String, i64)>,
    {
        self.marks.clear();
        let total = self.vpm.total_size();
        for (name, addr) in persisted {
            if name.is_empty() {
                continue;
            }
            let Ok(addr) = usize::try_from(addr) else {
                debug!("dropping persisted mark {:?} with negative address", name);
                continue;
            };
            let addr = addr.min(total);
            if let Some((page, offset)) = self.vpm.index().resolve_address(addr) {
                self.marks.set(&name, MarkPos { page, offset });
            }
        }
    }

    pub fn clear_all_marks(&mut self) {
        self.marks.clear();
    }

    // === Line queries ===
    //
    // These never fault pages in; `&mut self` is only for rebuilding newline
    // tables of resident pages.

    pub fn get_total_line_count(&mut self) -> usize {
        lines::total_line_count(&mut self.vpm).0
    }

    pub fn get_line_info(&mut self, line: usize) -> Result<LineInfo> {
        lines::line_info(&mut self.vpm, line)
    }

    pub fn get_multiple_lines(&mut self, first: usize, last: usize) -> Result<Vec<LineInfo>> {
        lines::multiple_lines(&mut self.vpm, first, last)
    }

    pub fn get_line_number_from_address(&mut self, addr: usize) -> Result<usize> {
        lines::line_number_from_address(&mut self.vpm, addr).map(|(line, _)| line)
    }

    /// Byte address of the given 1-based line and 0-based byte column,
    /// clamped to the line extent.
    pub fn line_char_to_byte_position(&mut self, line: usize, col: usize) -> Result<usize> {
        lines::line_char_to_byte(&mut self.vpm, line, col)
    }

    pub fn byte_to_line_char_position(&mut self, addr: usize) -> Result<(usize, usize)> {
        lines::byte_to_line_char(&mut self.vpm, addr)
    }

    // === Undo ===

    pub fn enable_undo(&mut self) {
        self.undo.set_enabled(true);
    }

    pub fn disable_undo(&mut self) {
        self.undo.set_enabled(false);
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    pub fn get_undo_stats(&self) -> UndoStats {
        self.undo.stats()
    }

    /// Reverts the most recent undoable unit. `Ok(false)` when there is
    /// nothing to revert or undo is disabled.
    pub fn undo(&mut self) -> Result<bool> {
        let Some(group) = self.undo.pop_undo() else {
            return Ok(false);
        };
        for op in group.ops().iter().rev() {
            match op.kind() {
                OpKind::Insert { data } => {
                    let p = op.post_position();
                    self.edit_delete(p, p + data.len())?;
                }
                OpKind::Delete { original } => {
                    self.edit_insert(op.pre_position(), original)?;
                }
                OpKind::Overwrite { data, original } => {
                    let p = op.post_position();
                    self.edit_delete(p, p + data.len())?;
                    self.edit_insert(p, original)?;
                }
            }
        }
        self.undo.push_redo(group);
        Ok(true)
    }

    /// Reapplies the most recently undone unit. `Ok(false)` when there is
    /// nothing to reapply or undo is disabled.
    pub fn redo(&mut self) -> Result<bool> {
        let Some(group) = self.undo.pop_redo() else {
            return Ok(false);
        };
        for op in group.ops().iter() {
            match op.kind() {
                OpKind::Insert { data } => {
                    self.edit_insert(op.pre_position(), data)?;
                }
                OpKind::Delete { original } => {
                    let p = op.pre_position();
                    self.edit_delete(p, p + original.len())?;
                }
                OpKind::Overwrite { data, original } => {
                    let p = op.pre_position();
                    self.edit_delete(p, p + original.len())?;
                    self.edit_insert(p, data)?;
                }
            }
        }
        self.undo.push_undo(group);
        Ok(true)
    }
}

impl<S: PageStore> Debug for PagedBuffer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedBuffer")
            .field("total_size", &self.get_total_size())
            .field("marks", &self.marks)
            .field("undo", &self.undo)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn buffer(page_size: usize, max_loaded: usize) -> PagedBuffer<MemStore> {
        PagedBuffer::with_config(
            MemStore::new(),
            BufferConfig {
                page_size,
                max_loaded_pages: max_loaded,
                ..BufferConfig::default()
            },
        )
        .unwrap()
    }

    /// The structural invariants that must hold after every public
    /// mutation.
    fn check_invariants(buf: &PagedBuffer<MemStore>) {
        let mut expected_start = 0;
        let mut sum = 0;
        for d in buf.vpm.index().iter() {
            assert_eq!(d.virtual_start, expected_start, "contiguity violated");
            assert!(
                d.virtual_size < 2 * buf.config().page_size,
                "split bound violated"
            );
            expected_start = d.end();
            sum += d.virtual_size;
        }
        assert_eq!(buf.get_total_size(), sum, "size identity violated");
        for (name, pos) in buf.marks.iter() {
            let page = buf.vpm.index().position_of(pos.page);
            assert!(page.is_some(), "mark {:?} lost its page", name);
            let size = page.map(|i| buf.vpm.index().get(i).virtual_size);
            assert!(
                pos.offset <= size.unwrap_or(0),
                "mark {:?} overruns its page",
                name
            );
        }
    }

    #[test]
    fn insert_splits_into_multiple_pages() -> Result<()> {
        // loadContent("START") with P=128, then a 300-byte insert at 2.
        let mut buf = buffer(128, 32);
        buf.load_content(b"START")?;
        buf.insert_bytes(2, &[b'X'; 300])?;

        assert_eq!(buf.get_total_size(), 305);
        let mut expected = b"ST".to_vec();
        expected.extend_from_slice(&[b'X'; 300]);
        expected.extend_from_slice(b"ART");
        assert_eq!(buf.read_range(0, 305)?, expected);
        assert!(buf.vpm.index().len() >= 3);
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn undo_reverts_an_insert() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"ORIGINAL")?;
        buf.insert_bytes(4, b"XXXX")?;
        assert_eq!(buf.read_range(0, 12)?, b"ORIGXXXXINAL");

        assert!(buf.undo()?);
        assert_eq!(buf.get_total_size(), 8);
        assert_eq!(buf.read_range(0, 8)?, b"ORIGINAL");
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn marks_shift_with_edits() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"ABCDEFGH")?;
        buf.set_mark("m", 4)?;

        buf.insert_bytes(2, b"--")?;
        assert_eq!(buf.get_mark("m"), Some(6));

        buf.delete_bytes(0, 3)?;
        assert_eq!(buf.get_mark("m"), Some(3));
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn deleted_region_marks_consolidate() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"Hello World")?;
        buf.set_mark("w", 6)?;
        buf.delete_bytes(5, 7)?;
        assert_eq!(buf.get_mark("w"), Some(5));
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn eviction_bound_holds_under_reads() -> Result<()> {
        let mut buf = buffer(100, 2);
        buf.load_content(&[b'X'; 500])?;
        assert_eq!(buf.vpm.index().len(), 5);
        for pos in [0, 100, 200, 300, 400] {
            buf.read_range(pos, pos + 10)?;
            assert!(buf.get_memory_stats().loaded_pages <= 2);
        }
        assert_eq!(buf.read_range(0, 500)?, [b'X'; 500]);
        Ok(())
    }

    #[test]
    fn round_trip_after_load() -> Result<()> {
        let mut buf = buffer(7, 32);
        let content: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        buf.load_content(&content)?;
        assert_eq!(buf.read_range(0, content.len())?, content);
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn undo_redo_round_trips_bytes_and_marks() -> Result<()> {
        let mut buf = buffer(8, 32);
        buf.load_content(b"abcdefghijklmnop")?;
        buf.set_mark("low", 2)?;
        buf.set_mark("mid", 9)?;
        buf.set_mark("high", 15)?;

        buf.insert_bytes(4, b"0123456789")?;
        buf.delete_bytes(1, 3)?;
        buf.overwrite_bytes(5, b"ZZZZ")?;

        let bytes = buf.read_range(0, buf.get_total_size())?;
        let size = buf.get_total_size();
        let marks = buf.get_all_marks();

        while buf.undo()? {}
        assert_eq!(buf.read_range(0, 16)?, b"abcdefghijklmnop");
        while buf.redo()? {}

        assert_eq!(buf.get_total_size(), size);
        assert_eq!(buf.read_range(0, size)?, bytes);
        assert_eq!(buf.get_all_marks(), marks);
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn marks_below_an_edit_never_move() -> Result<()> {
        let mut buf = buffer(4, 32);
        buf.load_content(b"aaaabbbbccccdddd")?;
        buf.set_mark("m", 14)?;

        // Net-zero size change strictly below the mark.
        buf.overwrite_bytes(5, b"XY")?;
        assert_eq!(buf.get_mark("m"), Some(14));
        buf.delete_bytes(0, 2)?;
        buf.insert_bytes(0, b"12")?;
        assert_eq!(buf.get_mark("m"), Some(14));
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn marks_survive_splits_and_merges() -> Result<()> {
        let mut buf = buffer(8, 32);
        buf.load_content(b"aaaabbbbccccdddd")?;
        buf.set_mark("a", 3)?;
        buf.set_mark("c", 10)?;
        buf.set_mark("end", 16)?;

        // Grow one page past 2*P to force splits.
        buf.insert_bytes(4, &[b'-'; 20])?;
        assert_eq!(buf.get_mark("a"), Some(3));
        assert_eq!(buf.get_mark("c"), Some(30));
        assert_eq!(buf.get_mark("end"), Some(36));
        check_invariants(&buf);

        // Shrink back so merges fire.
        buf.delete_bytes(4, 24)?;
        assert_eq!(buf.get_mark("a"), Some(3));
        assert_eq!(buf.get_mark("c"), Some(10));
        assert_eq!(buf.get_mark("end"), Some(16));
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn mark_at_buffer_end_tracks_growth() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"tail")?;
        buf.set_mark("end", 4)?;
        buf.insert_bytes(4, b"++")?;
        // Insertion at the boundary leaves the mark at the boundary.
        assert_eq!(buf.get_mark("end"), Some(4));
        buf.insert_bytes(2, b"++")?;
        assert_eq!(buf.get_mark("end"), Some(6));
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn cut_and_paste_carries_marks() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"The quick brown fox")?;
        buf.set_mark("q", 4)?;
        buf.set_mark("b", 10)?;
        buf.set_mark("stay", 0)?;

        let (cut, cut_marks) = buf.delete_bytes_with_marks(4, 16)?;
        assert_eq!(cut, b"quick brown ");
        assert_eq!(
            cut_marks,
            vec![("q".to_owned(), 0), ("b".to_owned(), 6)]
        );
        assert_eq!(buf.read_range(0, 7)?, b"The fox");
        assert_eq!(buf.get_mark("q"), None);

        buf.insert_bytes_with_marks(0, &cut, &cut_marks)?;
        assert_eq!(buf.read_range(0, 19)?, b"quick brown The fox");
        assert_eq!(buf.get_mark("q"), Some(0));
        assert_eq!(buf.get_mark("b"), Some(6));
        // A mark exactly at the insertion point stays at the boundary.
        assert_eq!(buf.get_mark("stay"), Some(0));
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn report_extraction_leaves_marks_alone() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"0123456789")?;
        buf.set_mark("m", 5)?;
        let reported = buf.get_marks_in_deleted_content(4, 8);
        assert_eq!(reported, vec![("m".to_owned(), 1)]);
        assert_eq!(buf.get_mark("m"), Some(5));

        let (bytes, marks) = buf.get_bytes_with_marks(4, 8)?;
        assert_eq!(bytes, b"4567");
        assert_eq!(marks, reported);
        assert_eq!(buf.get_mark("m"), Some(5));
        Ok(())
    }

    #[test]
    fn overwrite_with_marks_replaces_them() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"0123456789")?;
        buf.set_mark("old", 4)?;
        let (replaced, extracted) = buf.overwrite_bytes_with_marks(
            3,
            b"abcd",
            &[("new".to_owned(), 2)],
        )?;
        assert_eq!(replaced, b"3456");
        assert_eq!(extracted, vec![("old".to_owned(), 1)]);
        assert_eq!(buf.read_range(0, 10)?, b"012abcd789");
        assert_eq!(buf.get_mark("old"), None);
        assert_eq!(buf.get_mark("new"), Some(5));
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn mark_queries_and_persistence() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"hello world")?;
        buf.set_mark("b", 6)?;
        buf.set_mark("a", 0)?;
        buf.set_mark("c", 11)?;

        assert_eq!(
            buf.get_all_marks(),
            vec![
                ("a".to_owned(), 0),
                ("b".to_owned(), 6),
                ("c".to_owned(), 11)
            ]
        );
        assert_eq!(
            buf.get_marks_in_range(0, 7),
            vec![("a".to_owned(), 0), ("b".to_owned(), 6)]
        );

        let persisted = buf.get_all_marks_for_persistence();
        assert_eq!(persisted.len(), 3);

        buf.set_marks_from_persistence(vec![
            ("x".to_owned(), 3),
            ("bad".to_owned(), -7),
            ("far".to_owned(), 9999),
        ]);
        assert_eq!(buf.get_mark("x"), Some(3));
        assert_eq!(buf.get_mark("bad"), None);
        // Clamped to the buffer end.
        assert_eq!(buf.get_mark("far"), Some(11));

        buf.clear_all_marks();
        assert!(buf.get_all_marks().is_empty());
        Ok(())
    }

    #[test]
    fn set_mark_rejects_bad_input() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"abc")?;
        assert_eq!(buf.set_mark("m", 4).unwrap_err().errno(), OutOfBounds);
        assert_eq!(buf.set_mark("", 0).unwrap_err().errno(), InvalidArgs);
        assert_eq!(buf.get_mark("missing"), None);
        Ok(())
    }

    #[test]
    fn undo_stack_behaviour() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"base")?;
        assert!(!buf.can_undo());
        assert!(!buf.undo()?);

        buf.insert_bytes(4, b"-one")?;
        assert!(buf.can_undo());
        assert!(buf.undo()?);
        assert!(buf.can_redo());

        // A fresh mutation clears the redo stack.
        buf.insert_bytes(0, b"!")?;
        assert!(!buf.can_redo());
        assert!(!buf.redo()?);
        Ok(())
    }

    #[test]
    fn disabled_undo_is_inert() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"base")?;
        buf.disable_undo();
        buf.insert_bytes(4, b"!!")?;
        assert!(!buf.undo()?);
        assert_eq!(buf.read_range(0, 6)?, b"base!!");

        buf.enable_undo();
        buf.delete_bytes(4, 6)?;
        assert!(buf.undo()?);
        assert_eq!(buf.read_range(0, 6)?, b"base!!");
        Ok(())
    }

    #[test]
    fn undo_of_overwrite_restores_both_sides() -> Result<()> {
        let mut buf = buffer(8, 32);
        buf.load_content(b"aaaabbbbcccc")?;
        let replaced = buf.overwrite_bytes(2, b"XXXXXXXX")?;
        assert_eq!(replaced, b"aabbbbcc");
        assert_eq!(buf.read_range(0, 12)?, b"aaXXXXXXXXcc");

        assert!(buf.undo()?);
        assert_eq!(buf.read_range(0, 12)?, b"aaaabbbbcccc");
        assert!(buf.redo()?);
        assert_eq!(buf.read_range(0, 12)?, b"aaXXXXXXXXcc");
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn coalesced_typing_undoes_in_one_step() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"")?;
        for (i, b) in b"hello".iter().enumerate() {
            buf.insert_bytes(i, &[*b])?;
        }
        assert_eq!(buf.read_range(0, 5)?, b"hello");
        assert_eq!(buf.get_undo_stats().undo_groups, 1);

        assert!(buf.undo()?);
        assert_eq!(buf.get_total_size(), 0);
        assert!(buf.redo()?);
        assert_eq!(buf.read_range(0, 5)?, b"hello");
        Ok(())
    }

    #[test]
    fn validate_and_cleanup_repairs_marks() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"0123456789")?;
        buf.set_mark("ok", 3)?;
        assert_eq!(buf.validate_and_cleanup_marks(), (0, 0));
        assert_eq!(buf.get_mark("ok"), Some(3));
        Ok(())
    }

    #[test]
    fn line_queries_span_pages() -> Result<()> {
        let mut buf = buffer(4, 32);
        buf.load_content(b"one\ntwo\nthree\nfour")?;
        assert_eq!(buf.get_total_line_count(), 4);
        let info = buf.get_line_info(3)?;
        assert_eq!((info.start, info.end), (8, 14));
        assert_eq!(buf.get_line_number_from_address(9)?, 3);
        assert_eq!(buf.byte_to_line_char_position(9)?, (3, 1));
        assert_eq!(buf.line_char_to_byte_position(3, 1)?, 9);
        assert_eq!(buf.get_multiple_lines(1, 2)?.len(), 2);

        // Line structure follows edits.
        buf.insert_bytes(3, b"\n")?;
        assert_eq!(buf.get_total_line_count(), 5);
        assert_eq!(buf.get_line_number_from_address(4)?, 2);
        Ok(())
    }

    #[test]
    fn empty_buffer_edge_cases() -> Result<()> {
        let mut buf = buffer(65536, 32);
        buf.load_content(b"")?;
        assert_eq!(buf.get_total_size(), 0);
        assert_eq!(buf.read_range(0, 0)?, b"");
        buf.set_mark("origin", 0)?;
        assert_eq!(buf.get_mark("origin"), Some(0));
        assert_eq!(buf.get_total_line_count(), 1);

        buf.insert_bytes(0, b"first")?;
        assert_eq!(buf.read_range(0, 5)?, b"first");
        assert_eq!(buf.get_mark("origin"), Some(0));

        let removed = buf.delete_bytes(0, 5)?;
        assert_eq!(removed, b"first");
        assert_eq!(buf.get_total_size(), 0);
        assert_eq!(buf.get_mark("origin"), Some(0));
        check_invariants(&buf);
        Ok(())
    }

    #[test]
    fn load_content_resets_everything() -> Result<()> {
        let mut buf = buffer(4, 32);
        buf.load_content(b"old content here")?;
        buf.set_mark("m", 3)?;
        buf.insert_bytes(0, b"x")?;

        buf.load_content(b"new")?;
        assert_eq!(buf.get_total_size(), 3);
        assert_eq!(buf.read_range(0, 3)?, b"new");
        assert_eq!(buf.get_mark("m"), None);
        assert!(!buf.can_undo());
        Ok(())
    }
}
