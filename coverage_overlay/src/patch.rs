//! Row-level rewriting of genhtml source pages.
//!
//! Each source line is rendered as a table row carrying an anchor named
//! `L<line>`; the row's second cell holds the hit count. Only the inner
//! content of that cell is ever replaced, so every other byte of the page
//! survives a patch unchanged. Pages are handled as raw bytes; source text
//! rendered in a legacy encoding is never re-encoded.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::extract::MissedLines;

/// Inner content written into the hit-count cell of a missed line.
pub const NOT_COVERED_MARKER: &str = r#"<span class="lineNoCov">0</span>"#;

/// Cell contents genhtml emits when it has no count to show.
const PLACEHOLDERS: [&str; 3] = ["&nbsp;", "-", "\u{2014}"];

static ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i-u)<a\b[^>]*?\s(?:name|id)\s*=\s*["']?L(\d+)["']?[^>]*>"#)
        .expect("anchor pattern")
});
static ROW_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i-u)<tr\b").expect("row start pattern"));
static ROW_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i-u)</tr\s*>").expect("row end pattern"));
static CELL_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i-u)<td\b[^>]*>").expect("cell start pattern"));
static CELL_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i-u)</td\s*>").expect("cell end pattern"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)<[^>]*>").expect("tag pattern"));

/// What happened to one requested line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMark {
    /// Hit-count cell rewritten to the marker.
    Marked,
    /// Cell already holds the marker.
    AlreadyMarked,
    /// Cell shows a non-zero count; left alone.
    Covered,
    /// No anchor for the line, e.g. a blank or comment line.
    AnchorMissing,
    /// Anchor found but the surrounding row or cells are not well formed.
    MalformedRow,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineTally {
    pub marked: usize,
    pub already_marked: usize,
    pub covered: usize,
    pub anchor_missing: usize,
    pub malformed: usize,
}

impl LineTally {
    pub fn record(&mut self, mark: LineMark) {
        match mark {
            LineMark::Marked => self.marked += 1,
            LineMark::AlreadyMarked => self.already_marked += 1,
            LineMark::Covered => self.covered += 1,
            LineMark::AnchorMissing => self.anchor_missing += 1,
            LineMark::MalformedRow => self.malformed += 1,
        }
    }

    /// Lines whose row could not be located.
    pub fn not_found(&self) -> usize {
        self.anchor_missing + self.malformed
    }

    pub fn requested(&self) -> usize {
        self.marked + self.already_marked + self.covered + self.not_found()
    }
}

#[derive(Debug)]
pub struct PagePatch {
    pub text: Vec<u8>,
    pub changed: bool,
    pub tally: LineTally,
}

/// Mark every line in `lines` on one page.
pub fn patch_page(mut text: Vec<u8>, lines: &MissedLines) -> PagePatch {
    let mut tally = LineTally::default();
    for &line in lines {
        tally.record(mark_line(&mut text, line));
    }
    PagePatch {
        text,
        changed: tally.marked > 0,
        tally,
    }
}

/// Mark a single line in place.
pub fn mark_line(text: &mut Vec<u8>, line: u32) -> LineMark {
    let Some(anchor) = find_anchor(text, line) else {
        return LineMark::AnchorMissing;
    };
    let Some(cell) = count_cell(text, anchor) else {
        return LineMark::MalformedRow;
    };

    let verdict = classify_cell(&text[cell.clone()]);
    match verdict {
        CellVerdict::AlreadyMarked => LineMark::AlreadyMarked,
        CellVerdict::Covered => LineMark::Covered,
        CellVerdict::NeedsMark => {
            text.splice(cell, NOT_COVERED_MARKER.bytes());
            LineMark::Marked
        }
    }
}

fn find_anchor(text: &[u8], line: u32) -> Option<Range<usize>> {
    ANCHOR.captures_iter(text).find_map(|caps| {
        let digits = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?;
        let declared = digits.parse::<u32>().ok()?;
        if declared == line {
            caps.get(0).map(|m| m.range())
        } else {
            None
        }
    })
}

/// Byte range of the second cell's inner content in the row around `anchor`.
fn count_cell(text: &[u8], anchor: Range<usize>) -> Option<Range<usize>> {
    let row_start = ROW_START.find_iter(&text[..anchor.start]).last()?.start();
    // a closed row between the start tag and the anchor means the anchor
    // sits outside any row
    if ROW_END.is_match(&text[row_start..anchor.start]) {
        return None;
    }
    let row_end = anchor.end + ROW_END.find(&text[anchor.end..])?.end();
    // likewise a row opening before the close: this row's `</tr>` is omitted
    if ROW_START.is_match(&text[anchor.end..row_end]) {
        return None;
    }
    let row = &text[row_start..row_end];

    let second = CELL_START.find_iter(row).nth(1)?;
    let close = CELL_END.find(&row[second.end()..])?;
    let inner_start = row_start + second.end();
    Some(inner_start..inner_start + close.start())
}

#[derive(Debug, PartialEq, Eq)]
enum CellVerdict {
    AlreadyMarked,
    NeedsMark,
    Covered,
}

fn classify_cell(inner: &[u8]) -> CellVerdict {
    let inner = String::from_utf8_lossy(inner);
    let content = inner.trim();
    if content == NOT_COVERED_MARKER {
        return CellVerdict::AlreadyMarked;
    }

    let shown = TAG.replace_all(content.as_bytes(), &b""[..]);
    let shown = String::from_utf8_lossy(&shown);
    let shown = shown.trim();
    if shown.is_empty() || PLACEHOLDERS.contains(&shown) {
        return CellVerdict::NeedsMark;
    }

    let digits: String = shown
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    match digits.parse::<i64>() {
        Ok(0) => CellVerdict::NeedsMark,
        Ok(_) => CellVerdict::Covered,
        // counts past i64 still read as hits
        Err(_) if digits.bytes().any(|b| matches!(b, b'1'..=b'9')) => CellVerdict::Covered,
        Err(_) => CellVerdict::NeedsMark,
    }
}
