//! Content Flattener
//!
//! Walks a checkout, keeps the files a `FileFilter` accepts and turns them
//! into an ordered `FlatDocument`. Order is lexicographic on the relative path
//! (with `/` separators) so identical trees flatten to identical output.
//! Binary, oversized and unreadable files are skipped, never fatal.

use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "target",
];

/// Dependency lock files: large, generated, no review value
pub const LOCK_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "pipfile.lock",
    "composer.lock",
    "gemfile.lock",
    "cargo.lock",
    "packages.lock.json",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tif", "tiff", "pdf", "zip", "gz", "tgz",
    "bz2", "xz", "7z", "tar", "jar", "war", "class", "exe", "dll", "so", "dylib", "o", "a", "bin",
    "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4", "wav", "ogg", "flac", "mov", "avi", "pyc",
    "pyo", "db", "sqlite",
];

const STANDARDS_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

const STANDARDS_EXCLUDED_FILES: &[&str] = &["readme.md", "contributing.md", "changelog.md"];

/// Default per-file size cap for codebase flattening
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Flattening failures (the workspace itself is unusable)
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Workspace path is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Which files a flatten pass includes
#[derive(Debug, Clone)]
pub struct FileFilter {
    /// Lowercase extensions to keep; `None` keeps every non-binary extension
    extensions: Option<Vec<String>>,
    /// Lowercase file names to drop
    excluded_files: Vec<String>,
    /// Lowercase file stems to keep; empty keeps all
    only_stems: Vec<String>,
    max_file_bytes: u64,
}

impl FileFilter {
    /// Markdown / text files that describe standards
    pub fn standards() -> Self {
        Self {
            extensions: Some(STANDARDS_EXTENSIONS.iter().map(|s| s.to_string()).collect()),
            excluded_files: STANDARDS_EXCLUDED_FILES.iter().map(|s| s.to_string()).collect(),
            only_stems: Vec::new(),
            max_file_bytes: u64::MAX,
        }
    }

    /// Source files of a codebase under review
    pub fn codebase() -> Self {
        Self {
            extensions: None,
            excluded_files: LOCK_FILES.iter().map(|s| s.to_string()).collect(),
            only_stems: Vec::new(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    /// Keep only files whose stem is listed (case-insensitive)
    pub fn with_only_stems(mut self, stems: &[String]) -> Self {
        self.only_stems = stems
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    fn accepts_name(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        if self.excluded_files.iter().any(|f| *f == lower) {
            return false;
        }

        let path = Path::new(&lower);
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if BINARY_EXTENSIONS.contains(&extension) {
            return false;
        }
        if let Some(allowed) = &self.extensions {
            if !allowed.iter().any(|a| a == extension) {
                return false;
            }
        }

        if !self.only_stems.is_empty() {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if !self.only_stems.iter().any(|s| s == stem) {
                return false;
            }
        }

        true
    }
}

/// One file's content with its provenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    /// Path relative to the workspace, `/`-separated
    pub source_path: String,
    pub content: String,
}

/// Ordered sequence of flattened files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatDocument {
    pub entries: Vec<FlatEntry>,
}

impl FlatDocument {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Single text with a `# File: <path>` heading per entry
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str("\n# File: ");
            out.push_str(&entry.source_path);
            out.push('\n');
            out.push_str(&entry.content);
            out.push('\n');
        }
        out
    }
}

/// List files the filter accepts, as sorted `/`-separated relative paths
pub fn discover(root: &Path, filter: &FileFilter) -> Result<Vec<String>, WorkspaceError> {
    if !root.exists() {
        return Err(WorkspaceError::PathNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(WorkspaceError::NotADirectory(root.to_path_buf()));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error accessing entry: {}", e);
                continue;
            }
        };

        // Symlinks are not followed out of the workspace
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        if !filter.accepts_name(&file_name) {
            tracing::trace!(path = %entry.path().display(), "Skipping filtered file");
            continue;
        }

        if let Some(relative) = relative_path(root, entry.path()) {
            files.push(relative);
        }
    }

    files.sort();
    Ok(files)
}

/// Read one discovered file; `None` if it is oversized, binary or unreadable
pub fn read_entry(root: &Path, relative: &str, filter: &FileFilter) -> Option<FlatEntry> {
    let path = root.join(relative);

    let metadata = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(path = %relative, error = %e, "Skipping unreadable file");
            return None;
        }
    };
    if metadata.len() > filter.max_file_bytes {
        tracing::debug!(
            path = %relative,
            size = metadata.len(),
            max = filter.max_file_bytes,
            "Skipping oversized file"
        );
        return None;
    }

    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(path = %relative, error = %e, "Skipping unreadable file");
            return None;
        }
    };
    if bytes.contains(&0) {
        tracing::debug!(path = %relative, "Skipping binary file");
        return None;
    }

    match String::from_utf8(bytes) {
        Ok(content) => Some(FlatEntry {
            source_path: relative.to_string(),
            content,
        }),
        Err(_) => {
            tracing::debug!(path = %relative, "Skipping non-UTF-8 file");
            None
        }
    }
}

/// Flatten every accepted file under `root`
pub fn flatten(root: &Path, filter: &FileFilter) -> Result<FlatDocument, WorkspaceError> {
    let files = discover(root, filter)?;
    let entries: Vec<FlatEntry> = files
        .iter()
        .filter_map(|relative| read_entry(root, relative, filter))
        .collect();

    tracing::debug!(
        root = %root.display(),
        discovered = files.len(),
        flattened = entries.len(),
        "Flattened workspace"
    );
    Ok(FlatDocument { entries })
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && EXCLUDED_DIRS
            .iter()
            .any(|d| entry.file_name().to_string_lossy() == *d)
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn sample_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "src/main.py", b"print('hi')\n");
        write(root, "src/util.py", b"def f(): pass\n");
        write(root, "a-b/z.txt", b"dash dir\n");
        write(root, "a/z.txt", b"plain dir\n");
        write(root, "README.md", b"# Readme\n");
        write(root, "package-lock.json", b"{}");
        write(root, "logo.png", b"\x89PNG");
        write(root, "data.raw", b"abc\x00def");
        write(root, "latin1.txt", b"caf\xe9");
        write(root, "node_modules/lib/index.js", b"module.exports = 1;");
        write(root, ".git/config", b"[core]");
        temp_dir
    }

    #[test]
    fn test_codebase_filter_skips_noise() {
        let temp_dir = sample_tree();
        let doc = flatten(temp_dir.path(), &FileFilter::codebase()).unwrap();

        let paths: Vec<&str> = doc.entries.iter().map(|e| e.source_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["README.md", "a-b/z.txt", "a/z.txt", "src/main.py", "src/util.py"]
        );
    }

    #[test]
    fn test_standards_filter_keeps_markdown_and_text() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "README.md", b"# Readme");
        write(root, "CONTRIBUTING.md", b"# Contributing");
        write(root, "changelog.md", b"# Changes");
        write(root, "python/type_hints.md", b"Use type hints");
        write(root, "security.markdown", b"No secrets");
        write(root, "notes.txt", b"Plain");
        write(root, "script.py", b"print(1)");

        let files = discover(root, &FileFilter::standards()).unwrap();
        assert_eq!(files, vec!["notes.txt", "python/type_hints.md", "security.markdown"]);
    }

    #[test]
    fn test_only_stems_restricts_standards() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "python.md", b"a");
        write(root, "security.md", b"b");
        write(root, "docker.md", b"c");

        let filter = FileFilter::standards().with_only_stems(&["Security".to_string()]);
        assert_eq!(discover(root, &filter).unwrap(), vec!["security.md"]);
    }

    #[test]
    fn test_flatten_is_deterministic() {
        let temp_dir = sample_tree();
        let first = flatten(temp_dir.path(), &FileFilter::codebase()).unwrap().render();
        let second = flatten(temp_dir.path(), &FileFilter::codebase()).unwrap().render();
        assert_eq!(first, second);
        assert!(first.contains("\n# File: src/main.py\nprint('hi')\n"));
    }

    #[test]
    fn test_empty_workspace_is_empty_document() {
        let temp_dir = TempDir::new().unwrap();
        let doc = flatten(temp_dir.path(), &FileFilter::standards()).unwrap();
        assert!(doc.is_empty());
        assert_eq!(doc.render(), "");
    }

    #[test]
    fn test_oversized_file_skipped() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "big.py", &vec![b'x'; 64]);
        write(temp_dir.path(), "small.py", b"x");

        let filter = FileFilter::codebase().with_max_file_bytes(16);
        let doc = flatten(temp_dir.path(), &filter).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.entries[0].source_path, "small.py");
    }

    #[test]
    fn test_missing_root_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = flatten(&temp_dir.path().join("gone"), &FileFilter::codebase());
        assert!(matches!(result, Err(WorkspaceError::PathNotFound(_))));
    }
}
