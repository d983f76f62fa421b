//! Ephemeral workspace a bundle is unpacked into for one run.

use crate::bundle::FileMap;
use crate::error::{RuntimeError, RuntimeResult};
use std::path::{Component, Path};
use tempfile::TempDir;
use tracing::debug;

/// Temporary directory holding every file of a bundle. Removed on
/// [`Workspace::close`] or when dropped.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Write every file of `files` under a fresh temporary directory. Entry
    /// paths are all checked before anything is written.
    pub async fn materialize(files: &FileMap) -> RuntimeResult<Self> {
        if let Some(bad) = files.keys().find(|path| !is_safe_relative(path)) {
            return Err(RuntimeError::corrupt_bundle(format!(
                "entry '{}' escapes the workspace",
                bad
            )));
        }

        let dir = tempfile::Builder::new().prefix("tontoo-run-").tempdir()?;
        for (relative, content) in files {
            let target = dir.path().join(relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, content).await?;
        }

        debug!("Materialized {} files into {:?}", files.len(), dir.path());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the workspace directory
    pub async fn close(self) -> RuntimeResult<()> {
        let path = self.dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || self.dir.close())
            .await
            .map_err(std::io::Error::other)??;
        debug!("Removed workspace {:?}", path);
        Ok(())
    }
}

fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
