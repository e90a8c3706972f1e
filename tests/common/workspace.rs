//! Temporary local build trees for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Reuse this module via:
//!
//! ```rust
//! #[path = "common/workspace.rs"]
//! mod workspace;
//! ```

use std::fs::{create_dir_all, write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

/// Temporary directory holding a `dist` build tree, cleaned up on drop.
pub struct Workspace {
    pub root: Utf8PathBuf,
    _tmp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("create temp directory: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be UTF-8: {}", path.display()));
        Self { root, _tmp: tmp }
    }

    /// Path of the `dist` build directory.
    pub fn dist(&self) -> Utf8PathBuf {
        self.root.join("dist")
    }

    /// Writes a file relative to the workspace root, creating parents.
    pub fn write_file(&self, relative: &str, contents: &str) -> Utf8PathBuf {
        let path = self.root.join(relative);
        write_file(&path, contents);
        path
    }

    /// Populates `dist` with a small site plus directories a deploy would
    /// normally exclude.
    pub fn with_site(self) -> Self {
        self.write_file("dist/index.html", "<html>v1</html>");
        self.write_file("dist/assets/app.js", "console.log('v1');");
        self.write_file("dist/node_modules/left-pad/index.js", "module.exports = 0;");
        self.write_file("dist/.git/HEAD", "ref: refs/heads/main");
        self
    }
}

pub fn write_file(path: &Utf8Path, contents: &str) {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .unwrap_or_else(|err| panic!("create parent directories for {path}: {err}"));
    }
    write(path, contents).unwrap_or_else(|err| panic!("write {path}: {err}"));
}
