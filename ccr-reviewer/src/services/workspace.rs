//! Ephemeral per-operation workspace
//!
//! A `Workspace` owns a uniquely named directory `<workspace_root>/<label>-XXXXXX`
//! for exactly one processor run, so two runs with the same label never see
//! each other's files. `cleanup()` removes it off the async worker threads;
//! if the guard is dropped instead (error, panic unwinding, task
//! cancellation) `TempDir` removes it on drop.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CHECKOUT_DIR: &str = "checkout";

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh workspace directory under `workspace_root`
    pub fn prepare(workspace_root: &Path, label: &str) -> io::Result<Self> {
        std::fs::create_dir_all(workspace_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", label))
            .tempdir_in(workspace_root)?;

        tracing::debug!(path = %dir.path().display(), "Workspace created");
        Ok(Self { dir })
    }

    /// Directory owned by this workspace
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Where the repository contents live
    pub fn checkout_dir(&self) -> PathBuf {
        self.dir.path().join(CHECKOUT_DIR)
    }

    /// Delete the workspace now
    pub async fn cleanup(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        let dir = self.dir;

        let result = tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(io::Error::other)?;

        match result {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove every directory left under `workspace_root` by a previous process
    ///
    /// Only safe while no processor is running, i.e. at startup.
    pub fn sweep_stale(workspace_root: &Path) -> io::Result<usize> {
        let entries = match std::fs::read_dir(workspace_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                tracing::warn!(path = %entry.path().display(), "Removing stale workspace");
                std::fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
