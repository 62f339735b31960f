use crate::config::EngineConfig;
use crate::data::{ProjectFile, ProjectState};
use crate::error::StorageError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// The authoritative, disk-backed snapshot of a project's source files.
///
/// Every mutation goes through this store so the in-memory view stays equal
/// to what is on disk for all tracked paths.
#[derive(Debug)]
pub struct ProjectStateStore {
    root: PathBuf,
    extensions: Vec<String>,
    tracked_files: Vec<String>,
    ignored_dirs: Vec<String>,
    rescan_after_write: bool,
    state: ProjectState,
}

impl ProjectStateStore {
    /// Opens a store over `root` and performs the initial scan.
    pub fn open(root: impl Into<PathBuf>, config: &EngineConfig) -> Result<Self, StorageError> {
        let mut store = Self {
            root: root.into(),
            extensions: config.source_extensions.clone(),
            tracked_files: config.tracked_files.iter().map(|p| normalize_path(p)).collect(),
            ignored_dirs: config.ignored_dirs.clone(),
            rescan_after_write: config.rescan_after_write,
            state: ProjectState::new(),
        };
        store.rescan()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    /// Resets the tracked set to exactly the qualifying files on disk.
    ///
    /// # Returns
    /// The number of tracked files after the scan.
    pub fn rescan(&mut self) -> Result<usize, StorageError> {
        let mut state = ProjectState::new();
        if self.root.is_dir() {
            self.scan_dir(&self.root, &mut state)?;
        }
        tracing::debug!(root = %self.root.display(), files = state.len(), "project rescanned");
        self.state = state;
        Ok(self.state.len())
    }

    fn scan_dir(&self, dir: &Path, state: &mut ProjectState) -> Result<(), StorageError> {
        let entries = fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(dir, e))?;
            paths.push(entry.path());
        }
        paths.sort();

        for path in paths {
            if path.is_dir() {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                if self.ignored_dirs.iter().any(|d| d == name) {
                    continue;
                }
                self.scan_dir(&path, state)?;
                continue;
            }

            let Some(relative) = self.relative_path(&path) else {
                continue;
            };
            if !self.qualifies(&relative) {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => state.insert(relative, content),
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    tracing::warn!(path = %relative, "skipping file that is not valid UTF-8");
                }
                Err(e) => return Err(StorageError::io(&path, e)),
            }
        }
        Ok(())
    }

    fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    /// Whether `path` (normalized, relative) is a file the store tracks.
    pub fn qualifies(&self, path: &str) -> bool {
        if self.tracked_files.iter().any(|p| p == path) {
            return true;
        }
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x == ext))
    }

    /// Tracked content, or an empty string for untracked paths.
    pub fn get(&self, path: &str) -> &str {
        self.state.get(&normalize_path(path)).unwrap_or_default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.contains(&normalize_path(path))
    }

    pub fn file(&self, path: &str) -> ProjectFile {
        let path = normalize_path(path);
        match self.state.get(&path) {
            Some(content) => ProjectFile {
                content: content.to_string(),
                path,
                exists: true,
            },
            None => ProjectFile {
                path,
                content: String::new(),
                exists: false,
            },
        }
    }

    /// Writes `content` to disk and updates the tracked entry.
    pub fn update(&mut self, path: &str, content: &str) -> Result<(), StorageError> {
        let relative = self.checked_path(path)?;
        let full = self.root.join(&relative);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        fs::write(&full, content).map_err(|e| StorageError::io(&full, e))?;
        tracing::debug!(path = %relative, bytes = content.len(), "file written");

        if self.rescan_after_write {
            self.rescan()?;
        } else if self.qualifies(&relative) {
            self.state.insert(relative, content);
        }
        Ok(())
    }

    /// Removes a file from disk and from the tracked set.
    ///
    /// # Returns
    /// `false` when the file did not exist, which is not an error.
    pub fn delete(&mut self, path: &str) -> Result<bool, StorageError> {
        let relative = self.checked_path(path)?;
        let full = self.root.join(&relative);
        self.state.remove(&relative);

        match fs::remove_file(&full) {
            Ok(()) => {
                tracing::debug!(path = %relative, "file deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %relative, "delete skipped, file does not exist");
                Ok(false)
            }
            Err(e) => Err(StorageError::io(&full, e)),
        }
    }

    /// Sorted path listing plus full contents of every tracked file.
    ///
    /// Two calls without an intervening mutation return identical strings.
    pub fn context_digest(&self) -> String {
        self.state.render()
    }

    fn checked_path(&self, path: &str) -> Result<String, StorageError> {
        let relative = normalize_path(path);
        if !is_safe_relative_path(&relative) {
            return Err(StorageError::OutsideRoot(path.to_string()));
        }
        Ok(relative)
    }
}

/// Forward slashes, no leading `./` or `/`.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized.trim_start_matches('/').to_string()
}

/// Relative, non-empty and never climbing out of the root.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.contains(':') {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
