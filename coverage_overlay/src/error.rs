use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type OverlayResult<T> = Result<T, OverlayError>;

impl OverlayError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Invocation problems detected before any file is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required arguments: {}", .0.join(", "))]
    MissingArguments(Vec<&'static str>),
    #[error("positional <COVERAGE_DUMP> <REPORT_DIRECTORY> cannot be combined with --report-dir/--fixed-text/--repo-root/--manifest")]
    MixedForms,
    #[error("cannot determine current directory: {0}")]
    CurrentDir(String),
}
