//! Zero-hit line extraction from `llvm-cov show` style text dumps.
//!
//! ```text
//! /repo/src/a.c:
//!    10|      0|  int x;
//!    11|      3|  return x;
//! ===== next section =====
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::OverlayResult;
use crate::paths::{normalize_lexically, read_text_lossy};

/// 1-based line numbers reported with a hit count of exactly zero.
pub type MissedLines = BTreeSet<u32>;

/// Source file identity to its missed lines.
///
/// Files that appear in the dump without any miss keep an empty set.
pub type MissMap = BTreeMap<PathBuf, MissedLines>;

const SECTION_SEPARATOR: &str = "===== ";

/// Read and parse a dump from disk. Undecodable bytes are replaced, never fatal.
pub fn read_dump(path: &Path) -> OverlayResult<MissMap> {
    let text = read_text_lossy(path)?;
    Ok(extract_misses(&text))
}

pub fn extract_misses(text: &str) -> MissMap {
    let mut misses = MissMap::new();
    let mut current: Option<PathBuf> = None;

    for line in text.lines() {
        if line.starts_with(SECTION_SEPARATOR) {
            continue;
        }

        if let Some(path) = parse_header(line) {
            let path = normalize_lexically(Path::new(path));
            misses.entry(path.clone()).or_default();
            current = Some(path);
            continue;
        }

        let Some(file) = current.as_ref() else {
            continue;
        };
        let Some((line_no, hits)) = parse_data_line(line) else {
            continue;
        };
        if hits == 0 && line_no > 0 {
            if let Some(lines) = misses.get_mut(file) {
                lines.insert(line_no);
            }
        }
    }

    misses
}

/// `/abs/path/file.c:` with optional trailing whitespace.
fn parse_header(line: &str) -> Option<&str> {
    if !line.starts_with('/') {
        return None;
    }
    let path = line.trim_end().strip_suffix(':')?;
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

/// `<line>|<hits>|<source>`; `None` when either number fails to parse.
fn parse_data_line(line: &str) -> Option<(u32, i64)> {
    let mut fields = line.splitn(3, '|');
    let line_no = fields.next()?.trim().parse::<u32>().ok()?;
    let hits_field = fields.next()?;
    // the third field must exist, otherwise this is not a data line
    fields.next()?;
    let hits = hits_field.trim().parse::<i64>().ok()?;
    Some((line_no, hits))
}
