//! Lexical path handling and lossy text loading.
//!
//! Source identities coming out of coverage dumps and manifests are compared
//! as keys, so they are normalized without consulting the filesystem:
//! symlinks are never followed and missing files normalize just the same.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{OverlayError, OverlayResult};

/// Collapse `.`, `..` and repeated separators without touching the disk.
///
/// `..` at the root stays at the root, matching how absolute paths are
/// resolved by the OS.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Make `path` absolute against `base`, then normalize it.
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_lexically(path)
    } else {
        normalize_lexically(&base.join(path))
    }
}

/// Read a file as text, replacing undecodable bytes with U+FFFD.
pub fn read_text_lossy(path: &Path) -> OverlayResult<String> {
    let bytes = fs::read(path).map_err(|err| OverlayError::io(path, err))?;
    Ok(decode_lossy(bytes))
}

pub fn decode_lossy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}
