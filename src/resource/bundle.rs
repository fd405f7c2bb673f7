//! Resource bundles, their wire form, and the per-task storage namespace.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A group of files published under one content hash for one task.
///
/// Immutable once created; publishing again for the same task produces a
/// new bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBundle {
    hash: String,
    files: Vec<String>,
    task_id: String,
    path: PathBuf,
}

impl ResourceBundle {
    /// Creates a bundle.
    ///
    /// # Arguments
    ///
    /// * `files` - Paths relative to the task's storage namespace, in order
    /// * `hash` - Content hash returned by the content store
    /// * `task_id` - Owning task
    /// * `path` - Local storage root of the task; never sent over the wire
    pub fn new(
        files: Vec<String>,
        hash: impl Into<String>,
        task_id: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            hash: hash.into(),
            files,
            task_id: task_id.into(),
            path: path.into(),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Each relative path split into its components.
    pub fn files_split(&self) -> Vec<Vec<String>> {
        self.files.iter().map(|f| split_path(f)).collect()
    }
}

/// Over-the-wire reference to a bundle: `[hash, [[segment, ...], ...]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResourceRef(pub String, pub Vec<Vec<String>>);

impl WireResourceRef {
    pub fn hash(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> &[Vec<String>] {
        &self.1
    }

    /// Segment lists rejoined into platform paths.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.1.iter().map(|segments| segments.iter().collect()).collect()
    }

    /// Whether the entry carries a hash and at least one path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty() || self.1.is_empty()
    }
}

impl From<&ResourceBundle> for WireResourceRef {
    fn from(bundle: &ResourceBundle) -> Self {
        WireResourceRef(bundle.hash.clone(), bundle.files_split())
    }
}

/// Splits a relative path into its components.
pub fn split_path(path: &str) -> Vec<String> {
    Path::new(path)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
        })
        .collect()
}

/// Local storage namespace of task resources: `<root>/<task_id>`.
#[derive(Debug, Clone)]
pub struct ResourceStorage {
    root: PathBuf,
}

impl ResourceStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the resources of `task_id`.
    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    /// Path of `path` relative to the namespace of `task_id`.
    ///
    /// Paths outside the namespace fall back to their file name.
    pub fn relative_path(&self, path: &Path, task_id: &str) -> String {
        match path.strip_prefix(self.task_dir(task_id)) {
            Ok(relative) if !relative.as_os_str().is_empty() => {
                relative.to_string_lossy().into_owned()
            }
            _ => file_name(path),
        }
    }
}

/// Base name of `path`, or the whole path when it has none.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
