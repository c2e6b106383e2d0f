// SPDX-License-Identifier: MPL-2.0

//! Line-number queries over the cached per-page newline tables.
//!
//! Lines are 1-based and a line ends just past its `\n` (the last line ends
//! at the buffer end). These queries never fault pages in: a page that is
//! evicted with an invalidated newline table contributes zero newlines, and
//! the answer is flagged inexact.

use crate::{
    prelude::*,
    store::PageStore,
    vpm::PageManager,
};

/// The extent of one line in the flat address space.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LineInfo {
    /// 1-based line number.
    pub line: usize,
    /// Address of the first byte of the line.
    pub start: usize,
    /// Address one past the line's `\n` (buffer end for the last line).
    pub end: usize,
    /// Whether every page consulted had a usable newline table.
    pub is_exact: bool,
}

impl LineInfo {
    /// Line length in bytes, including the terminating newline if any.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Total line count: newlines plus one. An empty buffer has one empty line.
pub(crate) fn total_line_count<S: PageStore>(vpm: &mut PageManager<S>) -> (usize, bool) {
    let mut newlines = 0;
    let mut exact = true;
    for i in 0..vpm.index().len() {
        match vpm.newline_table(i) {
            Some(table) => newlines += table.len(),
            None => exact = false,
        }
    }
    (newlines + 1, exact)
}

pub(crate) fn line_info<S: PageStore>(vpm: &mut PageManager<S>, line: usize) -> Result<LineInfo> {
    if line == 0 {
        return_errno_with_msg!(InvalidArgs, "line numbers are 1-based");
    }
    let total = vpm.total_size();
    let mut exact = true;
    let mut seen = 0;
    let mut start = if line == 1 { Some(0) } else { None };
    let mut end = None;
    for i in 0..vpm.index().len() {
        let page_start = vpm.index().get(i).virtual_start;
        let count = match vpm.newline_table(i) {
            Some(table) => table.len(),
            None => {
                exact = false;
                0
            }
        };
        if start.is_none() && line - 1 > seen && seen + count >= line - 1 {
            if let Some(table) = vpm.newline_table(i) {
                start = Some(page_start + table[line - 2 - seen] + 1);
            }
        }
        if end.is_none() && line > seen && seen + count >= line {
            if let Some(table) = vpm.newline_table(i) {
                end = Some(page_start + table[line - 1 - seen] + 1);
            }
        }
        if start.is_some() && end.is_some() {
            break;
        }
        seen += count;
    }
    let Some(start) = start else {
        return_errno_with_msg!(OutOfBounds, "line past the end of the buffer");
    };
    Ok(LineInfo {
        line,
        start,
        end: end.unwrap_or(total),
        is_exact: exact,
    })
}

pub(crate) fn multiple_lines<S: PageStore>(
    vpm: &mut PageManager<S>,
    first: usize,
    last: usize,
) -> Result<Vec<LineInfo>> {
    if first == 0 || first > last {
        return_errno_with_msg!(InvalidArgs, "bad line range");
    }
    // No capacity hint: `last` may lie far past the end of the buffer (a
    // caller fetching "all remaining lines"), and the loop stops at the
    // last real line anyway.
    let mut lines = Vec::new();
    for n in first..=last {
        match line_info(vpm, n) {
            Ok(info) => lines.push(info),
            Err(err) if err.errno() == OutOfBounds => break,
            Err(err) => return Err(err),
        }
    }
    Ok(lines)
}

/// 1-based line number of the line containing `addr`.
pub(crate) fn line_number_from_address<S: PageStore>(
    vpm: &mut PageManager<S>,
    addr: usize,
) -> Result<(usize, bool)> {
    if addr > vpm.total_size() {
        return_errno!(OutOfBounds);
    }
    let mut newlines_before = 0;
    let mut exact = true;
    for i in 0..vpm.index().len() {
        let (page_start, page_end) = {
            let d = vpm.index().get(i);
            (d.virtual_start, d.end())
        };
        if page_start >= addr {
            break;
        }
        match vpm.newline_table(i) {
            Some(table) if page_end <= addr => newlines_before += table.len(),
            Some(table) => {
                let within = addr - page_start;
                newlines_before += table.partition_point(|&p| p < within);
            }
            None => exact = false,
        }
    }
    Ok((newlines_before + 1, exact))
}

pub(crate) fn line_char_to_byte<S: PageStore>(
    vpm: &mut PageManager<S>,
    line: usize,
    col: usize,
) -> Result<usize> {
    let info = line_info(vpm, line)?;
    Ok((info.start + col).min(info.end))
}

pub(crate) fn byte_to_line_char<S: PageStore>(
    vpm: &mut PageManager<S>,
    addr: usize,
) -> Result<(usize, usize)> {
    let (line, _) = line_number_from_address(vpm, addr)?;
    let info = line_info(vpm, line)?;
    Ok((line, addr - info.start))
}
