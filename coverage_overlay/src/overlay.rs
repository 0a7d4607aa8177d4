//! Drives resolution and patching over a whole miss map.
//!
//! Pages are handled one at a time: read, patch, write back if something
//! changed, drop. A page that cannot be read or written is recorded and
//! skipped; it never stops the remaining pages from being patched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{OverlayError, OverlayResult};
use crate::extract::{MissMap, MissedLines};
use crate::patch::{patch_page, LineTally};
use crate::resolve::PageResolver;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Storage for report pages, as raw bytes.
pub trait PageStore {
    fn read(&self, page: &Path) -> OverlayResult<Vec<u8>>;
    fn write(&self, page: &Path, text: &[u8]) -> OverlayResult<()>;
}

/// Pages on the local filesystem, never decoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPageStore;

impl PageStore for FsPageStore {
    fn read(&self, page: &Path) -> OverlayResult<Vec<u8>> {
        fs::read(page).map_err(|err| OverlayError::io(page, err))
    }

    fn write(&self, page: &Path, text: &[u8]) -> OverlayResult<()> {
        fs::write(page, text).map_err(|err| OverlayError::io(page, err))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageFailure {
    pub page: PathBuf,
    pub reason: String,
}

/// Counters for one overlay run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PatchOutcome {
    /// Source files with at least one missed line.
    pub files_with_zeros: usize,
    /// Of those, files whose report page was found.
    pub files_resolved: usize,
    pub pages_examined: usize,
    pub pages_patched: usize,
    pub lines_marked: usize,
    pub lines_not_found: usize,
    pub lines_already_marked: usize,
    pub lines_covered: usize,
    pub malformed_rows: usize,
    /// Pages that failed outright or where every located anchor had a broken row.
    pub pages_unpatchable: usize,
    pub failures: Vec<PageFailure>,
}

impl PatchOutcome {
    fn absorb(&mut self, tally: &LineTally) {
        self.lines_marked += tally.marked;
        self.lines_not_found += tally.not_found();
        self.lines_already_marked += tally.already_marked;
        self.lines_covered += tally.covered;
        self.malformed_rows += tally.malformed;
    }

    /// Conditions worth a look even though the run succeeded.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.failures.is_empty() {
            warnings.push(format!(
                "{} page(s) skipped after I/O errors",
                self.failures.len()
            ));
        }
        if self.malformed_rows > 0 {
            warnings.push(format!(
                "{} line(s) had an anchor but no well-formed row",
                self.malformed_rows
            ));
        }
        if self.pages_examined > 0 && self.pages_unpatchable == self.pages_examined {
            warnings.push(format!(
                "none of the {} examined page(s) could be patched; the report format may not match",
                self.pages_examined
            ));
        }
        warnings
    }
}

#[derive(Debug, Clone)]
pub struct OverlayOptions {
    pub progress_interval: Duration,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

struct ProgressLog {
    interval: Duration,
    last: Instant,
}

impl ProgressLog {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    fn tick(&mut self, done: usize, total: usize) {
        if self.last.elapsed() > self.interval {
            info!(done, total, "Overlay progress");
            self.last = Instant::now();
        }
    }
}

pub fn apply_overlay(
    misses: &MissMap,
    resolver: &PageResolver,
    store: &dyn PageStore,
    options: &OverlayOptions,
) -> PatchOutcome {
    let mut outcome = PatchOutcome::default();

    let with_zeros: Vec<(&PathBuf, &MissedLines)> =
        misses.iter().filter(|(_, lines)| !lines.is_empty()).collect();
    outcome.files_with_zeros = with_zeros.len();

    let targets: Vec<(&PathBuf, PathBuf, &MissedLines)> = with_zeros
        .into_iter()
        .filter_map(|(source, lines)| {
            let page = resolver.resolve(source);
            if page.is_none() {
                debug!(source = %source.display(), "No report page for source");
            }
            page.map(|page| (source, page, lines))
        })
        .collect();
    outcome.files_resolved = targets.len();

    info!(
        strategy = resolver.strategy_name(),
        resolved = outcome.files_resolved,
        files_with_zeros = outcome.files_with_zeros,
        "Resolved report pages"
    );

    let mut progress = ProgressLog::new(options.progress_interval);
    for (idx, (source, page, lines)) in targets.iter().enumerate() {
        progress.tick(idx, targets.len());
        outcome.pages_examined += 1;

        match patch_one(store, page, lines) {
            Ok((tally, written)) => {
                debug!(
                    source = %source.display(),
                    page = %page.display(),
                    requested = tally.requested(),
                    marked = tally.marked,
                    not_found = tally.not_found(),
                    "Patched page"
                );
                if written {
                    outcome.pages_patched += 1;
                }
                let located = tally.marked + tally.already_marked + tally.covered;
                if tally.malformed > 0 && located == 0 {
                    outcome.pages_unpatchable += 1;
                }
                outcome.absorb(&tally);
            }
            Err(err) => {
                warn!(page = %page.display(), error = %err, "Skipping page");
                outcome.pages_unpatchable += 1;
                outcome.failures.push(PageFailure {
                    page: page.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    outcome
}

fn patch_one(
    store: &dyn PageStore,
    page: &Path,
    lines: &MissedLines,
) -> OverlayResult<(LineTally, bool)> {
    let text = store.read(page)?;
    let patched = patch_page(text, lines);
    if patched.changed {
        store.write(page, &patched.text)?;
    }
    Ok((patched.tally, patched.changed))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::patch::NOT_COVERED_MARKER;
    use crate::resolve::DEFAULT_PAGE_SUFFIX;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io;

    /// In-memory pages; reads of paths in `broken` fail.
    #[derive(Default)]
    struct MemoryStore {
        pages: RefCell<HashMap<PathBuf, String>>,
        broken: Vec<PathBuf>,
        writes: RefCell<usize>,
    }

    impl PageStore for MemoryStore {
        fn read(&self, page: &Path) -> OverlayResult<Vec<u8>> {
            if self.broken.iter().any(|p| p == page) {
                return Err(OverlayError::io(
                    page,
                    io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
                ));
            }
            self.pages
                .borrow()
                .get(page)
                .map(|text| text.clone().into_bytes())
                .ok_or_else(|| OverlayError::io(page, io::ErrorKind::NotFound.into()))
        }

        fn write(&self, page: &Path, text: &[u8]) -> OverlayResult<()> {
            *self.writes.borrow_mut() += 1;
            self.pages
                .borrow_mut()
                .insert(page.to_path_buf(), String::from_utf8_lossy(text).into_owned());
            Ok(())
        }
    }

    fn page_html(lines: &[(u32, &str)]) -> String {
        let rows: String = lines
            .iter()
            .map(|(n, count)| {
                format!("<tr><td><a name=\"L{n}\"></a>{n}</td><td>{count}</td><td>src</td></tr>\n")
            })
            .collect();
        format!("<table>\n{rows}</table>\n")
    }

    fn misses(entries: &[(&str, &[u32])]) -> MissMap {
        entries
            .iter()
            .map(|(path, lines)| (PathBuf::from(path), lines.iter().copied().collect()))
            .collect()
    }

    // Pages exist on disk only so the resolver accepts them; content comes
    // from the store.
    fn resolver_with_pages(dir: &Path, names: &[&str]) -> PageResolver {
        for name in names {
            fs::write(dir.join(name), "").expect("write page");
        }
        PageResolver::direct(dir, DEFAULT_PAGE_SUFFIX)
    }

    #[test]
    fn apply_overlay__one_unreadable_page__then_others_still_patched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver_with_pages(
            dir.path(),
            &["_r_a.c.gcov.html", "_r_b.c.gcov.html", "_r_c.c.gcov.html"],
        );
        let a = dir.path().join("_r_a.c.gcov.html");
        let b = dir.path().join("_r_b.c.gcov.html");
        let c = dir.path().join("_r_c.c.gcov.html");

        let store = MemoryStore {
            broken: vec![b.clone()],
            ..Default::default()
        };
        store.pages.borrow_mut().insert(a.clone(), page_html(&[(1, "")]));
        store.pages.borrow_mut().insert(c.clone(), page_html(&[(2, "-")]));

        let map = misses(&[("/r/a.c", &[1]), ("/r/b.c", &[1]), ("/r/c.c", &[2])]);
        let outcome = apply_overlay(&map, &resolver, &store, &OverlayOptions::default());

        assert_eq!(outcome.files_with_zeros, 3);
        assert_eq!(outcome.files_resolved, 3);
        assert_eq!(outcome.pages_examined, 3);
        assert_eq!(outcome.pages_patched, 2);
        assert_eq!(outcome.lines_marked, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].page, b);
        assert!(store.pages.borrow()[&a].contains(NOT_COVERED_MARKER));
        assert!(store.pages.borrow()[&c].contains(NOT_COVERED_MARKER));
        assert_eq!(outcome.warnings().len(), 1);
    }

    #[test]
    fn apply_overlay__nothing_to_change__then_no_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver_with_pages(dir.path(), &["_r_a.c.gcov.html"]);
        let a = dir.path().join("_r_a.c.gcov.html");
        let store = MemoryStore::default();
        store.pages.borrow_mut().insert(a, page_html(&[(1, "4")]));

        let map = misses(&[("/r/a.c", &[1, 2])]);
        let outcome = apply_overlay(&map, &resolver, &store, &OverlayOptions::default());

        assert_eq!(outcome.pages_examined, 1);
        assert_eq!(outcome.pages_patched, 0);
        assert_eq!(outcome.lines_covered, 1);
        assert_eq!(outcome.lines_not_found, 1);
        assert_eq!(*store.writes.borrow(), 0);
        assert!(outcome.warnings().is_empty());
    }

    #[test]
    fn apply_overlay__empty_sets_and_unresolved_files__then_only_counted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver_with_pages(dir.path(), &[]);
        let store = MemoryStore::default();

        let map = misses(&[("/r/clean.c", &[]), ("/r/lost.c", &[3])]);
        let outcome = apply_overlay(&map, &resolver, &store, &OverlayOptions::default());

        assert_eq!(outcome.files_with_zeros, 1);
        assert_eq!(outcome.files_resolved, 0);
        assert_eq!(outcome.pages_examined, 0);
        assert!(outcome.warnings().is_empty());
    }

    #[test]
    fn apply_overlay__every_page_malformed__then_warns_loudly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver_with_pages(dir.path(), &["_r_a.c.gcov.html"]);
        let a = dir.path().join("_r_a.c.gcov.html");
        let store = MemoryStore::default();
        store
            .pages
            .borrow_mut()
            .insert(a, "<pre><a name=\"L1\"></a> 1 : code</pre>".to_string());

        let map = misses(&[("/r/a.c", &[1])]);
        let outcome = apply_overlay(&map, &resolver, &store, &OverlayOptions::default());

        assert_eq!(outcome.malformed_rows, 1);
        assert_eq!(outcome.pages_unpatchable, 1);
        let warnings = outcome.warnings();
        assert!(warnings.iter().any(|w| w.contains("none of the 1 examined")));
    }

    #[test]
    fn fs_page_store__write_then_read__then_round_trips_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let page = dir.path().join("p.html");
        FsPageStore.write(&page, b"<tr></tr>").expect("write");
        assert_eq!(FsPageStore.read(&page).expect("read"), b"<tr></tr>");
    }

    #[test]
    fn apply_overlay__latin1_byte_in_page__then_byte_survives_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let page = dir.path().join("_r_a.c.gcov.html");
        let mut html = b"<table>\n<tr><td><a name=\"L1\"></a>1</td><td></td><td>caf".to_vec();
        html.push(0xE9);
        html.extend_from_slice(b"</td></tr>\n</table>\n");
        fs::write(&page, &html).expect("write page");
        let resolver = PageResolver::direct(dir.path(), DEFAULT_PAGE_SUFFIX);

        let map = misses(&[("/r/a.c", &[1])]);
        let outcome = apply_overlay(&map, &resolver, &FsPageStore, &OverlayOptions::default());

        assert_eq!(outcome.pages_patched, 1);
        let after = fs::read(&page).expect("read page");
        let mut expected =
            format!("<table>\n<tr><td><a name=\"L1\"></a>1</td><td>{NOT_COVERED_MARKER}</td><td>caf")
                .into_bytes();
        expected.push(0xE9);
        expected.extend_from_slice(b"</td></tr>\n</table>\n");
        assert_eq!(after, expected);
    }

    #[test]
    fn patch_outcome__serialized__then_exposes_counters() {
        let outcome = PatchOutcome {
            pages_patched: 2,
            lines_marked: 5,
            ..Default::default()
        };
        let value = serde_json::to_value(&outcome).expect("json");
        assert_eq!(value["pages_patched"], 2);
        assert_eq!(value["lines_marked"], 5);
        assert!(value["failures"].as_array().expect("array").is_empty());
    }
}
