//! Canonical base directory derived from an lcov tracefile.
//!
//! genhtml lays its pages out relative to the longest directory prefix shared
//! by every `SF:` record, so the same prefix is needed to map a source path
//! back onto the report tree.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::paths::{normalize_lexically, read_text_lossy};

const SOURCE_TAG: &str = "SF:";

/// Every source file declared by the manifest, in declaration order.
pub fn manifest_sources(text: &str) -> Vec<PathBuf> {
    text.lines()
        .filter_map(|line| line.strip_prefix(SOURCE_TAG))
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(|path| normalize_lexically(Path::new(path)))
        .collect()
}

/// Longest component prefix shared by the parent directories of `sources`.
///
/// Falls back to `fallback` when there are no sources or when they only
/// share the filesystem root.
pub fn canonical_base_dir(sources: &[PathBuf], fallback: &Path) -> PathBuf {
    let Some((first, rest)) = sources.split_first() else {
        return fallback.to_path_buf();
    };

    let mut common: Vec<Component<'_>> = parent_components(first);
    for source in rest {
        let shared = common
            .iter()
            .zip(parent_components(source))
            .take_while(|(a, b)| *a == b)
            .count();
        common.truncate(shared);
    }

    if !common.iter().any(|c| matches!(c, Component::Normal(_))) {
        return fallback.to_path_buf();
    }
    common.iter().collect()
}

fn parent_components(path: &Path) -> Vec<Component<'_>> {
    path.parent()
        .map(|parent| parent.components().collect())
        .unwrap_or_default()
}

/// Load the manifest and compute its base directory.
///
/// A manifest that cannot be read is treated like an empty one.
pub fn load_base_dir(manifest: &Path, repo_root: &Path) -> PathBuf {
    let sources = match read_text_lossy(manifest) {
        Ok(text) => manifest_sources(&text),
        Err(err) => {
            warn!(error = %err, "Manifest unreadable, using repository root as base");
            Vec::new()
        }
    };
    let base = canonical_base_dir(&sources, repo_root);
    debug!(
        sources = sources.len(),
        base = %base.display(),
        "Computed canonical base directory"
    );
    base
}
