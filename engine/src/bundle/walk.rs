//! Sorted, short-circuiting directory walk.

use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

use imgpkg_core::error::{PkgError, Result};

/// Kind of filesystem entry, symlinks not followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

/// One entry produced by [`Walk`].
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Path on disk (the root joined with `relative`)
    pub path: PathBuf,
    /// Path relative to the walk root; a file root maps to its file name
    pub relative: PathBuf,
    pub kind: EntryKind,
    pub metadata: Metadata,
}

impl WalkEntry {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

type EntryFilter = Box<dyn FnMut(&WalkEntry) -> bool>;

/// Depth-first walk in file-name order.
///
/// The root directory itself is not yielded. Iteration stops after the
/// first error.
pub struct Walk {
    root: PathBuf,
    pending: Vec<PathBuf>,
    started: bool,
    finished: bool,
    filter: Option<EntryFilter>,
}

impl Walk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending: Vec::new(),
            started: false,
            finished: false,
            filter: None,
        }
    }

    /// Skip entries (and their subtrees) for which `keep` returns false.
    pub fn filter_entry(mut self, keep: impl FnMut(&WalkEntry) -> bool + 'static) -> Self {
        self.filter = Some(Box::new(keep));
        self
    }

    fn start(&mut self) -> Result<Option<WalkEntry>> {
        let metadata = fs::metadata(&self.root).map_err(|e| {
            PkgError::Other(format!("Failed to read {}: {}", self.root.display(), e))
        })?;

        if metadata.is_dir() {
            let root = self.root.clone();
            self.push_children(&root)?;
            return Ok(None);
        }

        let name = self.root.file_name().ok_or_else(|| {
            PkgError::Other(format!("Invalid input path {}", self.root.display()))
        })?;
        Ok(Some(WalkEntry {
            path: self.root.clone(),
            relative: PathBuf::from(name),
            kind: EntryKind::File,
            metadata,
        }))
    }

    fn push_children(&mut self, dir: &Path) -> Result<()> {
        let read_dir = fs::read_dir(dir).map_err(|e| {
            PkgError::Other(format!("Failed to read directory {}: {}", dir.display(), e))
        })?;

        let mut children = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| {
                PkgError::Other(format!("Failed to read directory entry in {}: {}", dir.display(), e))
            })?;
            children.push(entry.path());
        }

        // Popped from the back, so reverse order yields ascending names
        children.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        self.pending.extend(children);
        Ok(())
    }

    fn visit(&mut self, path: PathBuf) -> Result<Option<WalkEntry>> {
        let metadata = fs::symlink_metadata(&path).map_err(|e| {
            PkgError::Other(format!("Failed to read metadata for {}: {}", path.display(), e))
        })?;
        let kind = if metadata.file_type().is_symlink() {
            EntryKind::Symlink
        } else if metadata.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|e| {
                PkgError::Other(format!(
                    "Failed to compute relative path for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .to_path_buf();

        let entry = WalkEntry {
            path,
            relative,
            kind,
            metadata,
        };

        if let Some(keep) = self.filter.as_mut() {
            if !keep(&entry) {
                return Ok(None);
            }
        }

        if entry.kind == EntryKind::Dir {
            self.push_children(&entry.path)?;
        }
        Ok(Some(entry))
    }
}

impl Iterator for Walk {
    type Item = Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.started {
            self.started = true;
            match self.start() {
                Ok(Some(entry)) => {
                    self.finished = true;
                    return Some(Ok(entry));
                }
                Ok(None) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }

        while let Some(path) = self.pending.pop() {
            match self.visit(path) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }

        self.finished = true;
        None
    }
}
