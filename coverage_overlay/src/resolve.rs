//! Mapping source files onto their generated report pages.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};

use once_cell::unsync::OnceCell;
use tracing::debug;
use walkdir::WalkDir;

pub const DEFAULT_PAGE_SUFFIX: &str = ".gcov.html";

/// Replaces path separators in the direct-transform page name.
pub const SEPARATOR_SUBSTITUTE: &str = "_";

/// Locates the report page for a source file.
///
/// The strategy is fixed at construction; resolving the same source twice
/// against an unchanged report tree always yields the same page.
#[derive(Debug)]
pub enum PageResolver {
    /// Page layout mirrors the source tree below a base directory.
    ContextAware(ContextResolver),
    /// Page name is the whole source path flattened into one file name.
    DirectTransform(DirectResolver),
}

impl PageResolver {
    pub fn context_aware(
        gen_dir: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
        repo_root: impl Into<PathBuf>,
        suffix: impl Into<String>,
    ) -> Self {
        Self::ContextAware(ContextResolver {
            gen_dir: gen_dir.into(),
            base_dir: base_dir.into(),
            repo_root: repo_root.into(),
            suffix: suffix.into(),
            by_name: OnceCell::new(),
        })
    }

    pub fn direct(report_dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self::DirectTransform(DirectResolver {
            report_dir: report_dir.into(),
            suffix: suffix.into(),
        })
    }

    pub fn resolve(&self, source: &Path) -> Option<PathBuf> {
        match self {
            Self::ContextAware(resolver) => resolver.resolve(source),
            Self::DirectTransform(resolver) => resolver.resolve(source),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        match self {
            Self::ContextAware(_) => "context-aware",
            Self::DirectTransform(_) => "direct-transform",
        }
    }
}

#[derive(Debug)]
pub struct ContextResolver {
    gen_dir: PathBuf,
    base_dir: PathBuf,
    repo_root: PathBuf,
    suffix: String,
    // first page seen per file name, in sorted depth-first order
    by_name: OnceCell<HashMap<OsString, PathBuf>>,
}

impl ContextResolver {
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, source: &Path) -> Option<PathBuf> {
        let relative = self.relative_source(source);
        let candidate = with_suffix(&self.gen_dir.join(relative), &self.suffix);
        if candidate.is_file() {
            return Some(candidate);
        }

        // Ambiguous when two sources share a file name: the first page in
        // traversal order wins.
        let target = with_suffix(Path::new(source.file_name()?), &self.suffix);
        let found = self.name_index().get(target.as_os_str()).cloned();
        debug!(
            source = %source.display(),
            found = found.is_some(),
            "Primary page missing, searched report tree by file name"
        );
        found
    }

    fn relative_source<'a>(&self, source: &'a Path) -> &'a Path {
        source
            .strip_prefix(&self.base_dir)
            .or_else(|_| source.strip_prefix(&self.repo_root))
            .unwrap_or(source)
    }

    fn name_index(&self) -> &HashMap<OsString, PathBuf> {
        self.by_name.get_or_init(|| {
            let mut index = HashMap::new();
            for entry in WalkDir::new(&self.gen_dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                index
                    .entry(entry.file_name().to_os_string())
                    .or_insert_with(|| entry.path().to_path_buf());
            }
            index
        })
    }
}

#[derive(Debug)]
pub struct DirectResolver {
    report_dir: PathBuf,
    suffix: String,
}

impl DirectResolver {
    fn resolve(&self, source: &Path) -> Option<PathBuf> {
        let candidate = self.report_dir.join(flattened_page_name(source, &self.suffix));
        candidate.is_file().then_some(candidate)
    }
}

/// `/repo/src/a.c` becomes `_repo_src_a.c<suffix>`.
pub fn flattened_page_name(source: &Path, suffix: &str) -> OsString {
    let mut name = OsString::new();
    let mut separate = false;
    for component in source.components() {
        match component {
            Component::RootDir => {
                name.push(SEPARATOR_SUBSTITUTE);
                separate = false;
            }
            other => {
                if separate {
                    name.push(SEPARATOR_SUBSTITUTE);
                }
                name.push(other.as_os_str());
                separate = true;
            }
        }
    }
    name.push(suffix);
    name
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_os_string();
    raw.push(OsStr::new(suffix));
    PathBuf::from(raw)
}
