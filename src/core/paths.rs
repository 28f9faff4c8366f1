//! Path helpers shared by discovery, the history store and the activity log.

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::core::errors::{Result, VicError};

/// Turn a scan root or file path into an absolute, normalized path.
///
/// Existing paths go through `fs::canonicalize`, so symlinks in the root are
/// resolved once up front. Missing paths are joined onto the CWD and cleaned
/// syntactically so the caller can still report them in errors.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        env::current_dir().map_or_else(|_| expanded.clone(), |cwd| cwd.join(&expanded))
    };

    if let Ok(canonical) = fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

/// Replace a leading `~` with `$HOME`. Other paths are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => env::var_os("HOME").map_or_else(
            || path.to_path_buf(),
            |home| PathBuf::from(home).join(components.as_path()),
        ),
        _ => path.to_path_buf(),
    }
}

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| VicError::io(parent, source))
        }
        _ => Ok(()),
    }
}

/// Lowercased extension of `path`, without the dot.
pub fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
