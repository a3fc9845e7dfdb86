use ignore::WalkBuilder;
use repograph_store::paths::is_data_dir_name;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// A file found under the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Root-relative path with `/` separators; the file's graph id
    pub relative: String,
    pub path: PathBuf,
    pub mtime_ms: Option<u64>,
    pub size: u64,
}

/// Scanner for the files of a project (.gitignore aware)
pub struct FileScanner {
    root: PathBuf,
    max_file_size: u64,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size: MAX_FILE_SIZE_BYTES,
        }
    }

    #[must_use]
    pub const fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    fn walker(&self) -> ignore::Walk {
        let root = self.root.clone();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false);
        builder.filter_entry(move |entry| !Self::is_ignored_scope(entry.path(), &root));
        builder.build()
    }

    /// Every regular file, sorted by relative path
    pub fn scan(&self) -> Vec<ScannedFile> {
        let mut files = Vec::new();

        for result in self.walker() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }
                    let path = entry.path();
                    let Some(relative) = relative_id(&self.root, path) else {
                        continue;
                    };
                    let meta = match entry.metadata() {
                        Ok(meta) => meta,
                        Err(e) => {
                            log::warn!("Failed to stat {}: {e}", path.display());
                            continue;
                        }
                    };
                    if meta.len() > self.max_file_size {
                        log::debug!(
                            "Skipping large file {} ({} bytes > {})",
                            path.display(),
                            meta.len(),
                            self.max_file_size
                        );
                        continue;
                    }
                    files.push(ScannedFile {
                        relative,
                        path: path.to_path_buf(),
                        mtime_ms: mtime_ms(&meta),
                        size: meta.len(),
                    });
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        log::debug!("Found {} files under {}", files.len(), self.root.display());
        files
    }

    /// Newest modification time over the scanned files, in milliseconds
    #[must_use]
    pub fn newest_mtime_ms(&self) -> Option<u64> {
        self.scan().into_iter().filter_map(|file| file.mtime_ms).max()
    }

    fn is_ignored_scope(path: &Path, root: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        relative.components().any(|component| match component {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                is_data_dir_name(&name)
                    || IGNORED_SCOPES
                        .iter()
                        .any(|ignored| name.eq_ignore_ascii_case(ignored))
            }
            _ => false,
        })
    }
}

/// Root-relative, `/`-joined id of `path`
#[must_use]
pub fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

pub(crate) fn mtime_ms(meta: &std::fs::Metadata) -> Option<u64> {
    let modified = meta.modified().ok()?;
    let elapsed = modified.duration_since(UNIX_EPOCH).ok()?;
    u64::try_from(elapsed.as_millis()).ok()
}

const IGNORED_SCOPES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
];

const MAX_FILE_SIZE_BYTES: u64 = 1_048_576; // 1 MB
