//! Candidate file discovery.
//!
//! A lazy depth-first walk over a stack of open directory handles. Nothing is
//! collected up front, so a run over a large library starts producing tasks
//! as soon as the first matching file is seen.

#![allow(missing_docs)]

use std::collections::{BTreeSet, HashSet};
use std::fs::{self, DirEntry, ReadDir};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::config::normalize_extension;
use crate::core::errors::{Result, VicError};
use crate::core::paths::{extension_lowercase, resolve_absolute_path};
use crate::scanner::model::VideoFile;

/// What to walk and what to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub root: PathBuf,
    pub recursive: bool,
    /// Allowed extensions without the dot. Case-insensitive.
    pub extensions: BTreeSet<String>,
    /// Descend into symlinked directories. Symlinked files are always kept.
    pub follow_symlinks: bool,
}

/// Discovers candidate files under one root.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    options: DiscoveryOptions,
}

impl FileDiscovery {
    pub fn new(mut options: DiscoveryOptions) -> Self {
        options.extensions = options
            .extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { options }
    }

    pub const fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Start a fresh walk.
    ///
    /// Fails only for the root itself: a missing root is `RootNotFound`, an
    /// unreadable one `PermissionDenied`.
    pub fn discover(&self) -> Result<DiscoveredFiles> {
        let root = resolve_absolute_path(&self.options.root);
        let meta = fs::metadata(&root).map_err(|error| root_error(&root, error))?;

        let mut walk = DiscoveredFiles {
            extensions: self.options.extensions.clone(),
            recursive: self.options.recursive,
            follow_symlinks: self.options.follow_symlinks,
            stack: Vec::new(),
            visited: HashSet::new(),
            pending_root_file: None,
            skipped_directories: 0,
        };

        if meta.is_dir() {
            let entries = fs::read_dir(&root).map_err(|error| root_error(&root, error))?;
            walk.visited.insert(dir_identity(&meta, &root));
            walk.stack.push(entries);
        } else if meta.is_file() && walk.extension_allowed(&root) {
            walk.pending_root_file = Some(VideoFile::from_metadata(root, &meta));
        }

        Ok(walk)
    }
}

fn root_error(root: &Path, error: std::io::Error) -> VicError {
    match error.kind() {
        ErrorKind::NotFound => VicError::RootNotFound {
            path: root.to_path_buf(),
        },
        ErrorKind::PermissionDenied => VicError::PermissionDenied {
            path: root.to_path_buf(),
        },
        _ => VicError::io(root, error),
    }
}

/// Identity used to detect directory loops.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DirIdentity {
    #[cfg(unix)]
    Inode { device: u64, inode: u64 },
    #[cfg_attr(unix, allow(dead_code))]
    Path(PathBuf),
}

fn dir_identity(meta: &fs::Metadata, path: &Path) -> DirIdentity {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let _ = path;
        DirIdentity::Inode {
            device: meta.dev(),
            inode: meta.ino(),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        DirIdentity::Path(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
    }
}

/// Iterator over the files of one walk.
pub struct DiscoveredFiles {
    extensions: BTreeSet<String>,
    recursive: bool,
    follow_symlinks: bool,
    stack: Vec<ReadDir>,
    visited: HashSet<DirIdentity>,
    pending_root_file: Option<VideoFile>,
    skipped_directories: usize,
}

impl DiscoveredFiles {
    /// Subdirectories that could not be read so far.
    pub const fn skipped_directories(&self) -> usize {
        self.skipped_directories
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        extension_lowercase(path).is_some_and(|ext| self.extensions.contains(&ext))
    }

    fn descend(&mut self, path: &Path, meta: &fs::Metadata) {
        if !self.visited.insert(dir_identity(meta, path)) {
            tracing::debug!(path = %path.display(), "directory already visited, skipping");
            return;
        }
        match fs::read_dir(path) {
            Ok(entries) => self.stack.push(entries),
            Err(error) => {
                self.skipped_directories += 1;
                tracing::warn!(path = %path.display(), %error, "skipping unreadable directory");
            }
        }
    }

    fn visit(&mut self, entry: &DirEntry) -> Option<VideoFile> {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "cannot determine entry type");
                return None;
            }
        };

        if file_type.is_symlink() {
            let Ok(target) = fs::metadata(&path) else {
                tracing::debug!(path = %path.display(), "dangling symlink");
                return None;
            };
            if target.is_dir() {
                if self.recursive && self.follow_symlinks {
                    self.descend(&path, &target);
                }
                return None;
            }
            if target.is_file() && self.extension_allowed(&path) {
                return Some(VideoFile::from_metadata(path, &target));
            }
            return None;
        }

        if file_type.is_dir() {
            if self.recursive {
                match entry.metadata() {
                    Ok(meta) => self.descend(&path, &meta),
                    Err(error) => {
                        self.skipped_directories += 1;
                        tracing::warn!(path = %path.display(), %error, "skipping unreadable directory");
                    }
                }
            }
            return None;
        }

        if file_type.is_file() && self.extension_allowed(&path) {
            return match entry.metadata() {
                Ok(meta) => Some(VideoFile::from_metadata(path, &meta)),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "cannot stat candidate file");
                    None
                }
            };
        }
        None
    }
}

impl Iterator for DiscoveredFiles {
    type Item = VideoFile;

    fn next(&mut self) -> Option<VideoFile> {
        if let Some(file) = self.pending_root_file.take() {
            return Some(file);
        }
        loop {
            let next_entry = self.stack.last_mut()?.next();
            match next_entry {
                None => {
                    self.stack.pop();
                }
                Some(Err(error)) => {
                    tracing::warn!(%error, "error reading directory entry");
                }
                Some(Ok(entry)) => {
                    if let Some(file) = self.visit(&entry) {
                        return Some(file);
                    }
                }
            }
        }
    }
}
