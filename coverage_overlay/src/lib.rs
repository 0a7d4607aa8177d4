//! Overlay "not covered" markers onto genhtml coverage pages.
//!
//! Report generators sometimes render a line that ran zero times with a
//! blank or dash instead of an explicit `0`. This crate reads the zero-hit
//! lines from a textual coverage dump, finds each source file's report page
//! and rewrites just the hit-count cell of those lines.
//!
//! The pipeline is `extract` → `resolve` → `patch`, driven by
//! [`overlay::apply_overlay`].

pub mod app;
pub mod error;
pub mod extract;
pub mod manifest;
pub mod overlay;
pub mod patch;
pub mod paths;
pub mod resolve;

pub use error::{ConfigError, OverlayError, OverlayResult};
pub use extract::{extract_misses, MissMap, MissedLines};
pub use overlay::{apply_overlay, FsPageStore, OverlayOptions, PageStore, PatchOutcome};
pub use patch::{patch_page, LineMark, NOT_COVERED_MARKER};
pub use resolve::PageResolver;
