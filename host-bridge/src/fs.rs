use crate::error::{BridgeError, BridgeResult};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Filesystem bridge scoped to a sandbox root.
///
/// Every path handed to the bridge is interpreted relative to the root, the
/// same way a project's directives see their workspace. Leading slashes are
/// ignored and `..` components may not climb above the root.
#[derive(Debug, Clone)]
pub struct FsBridge {
	sandbox_root: PathBuf,
}

impl FsBridge {
	/// Create a new FsBridge rooted at `sandbox_root`
	pub fn with_sandbox(sandbox_root: impl Into<PathBuf>) -> Self {
		Self {
			sandbox_root: sandbox_root.into(),
		}
	}

	pub fn root(&self) -> &Path {
		&self.sandbox_root
	}

	/// Resolve a workspace-relative path to an absolute path inside the sandbox
	pub fn resolve(&self, relative: &str) -> BridgeResult<PathBuf> {
		let mut normalized = PathBuf::new();
		for component in Path::new(relative).components() {
			match component {
				Component::Normal(part) => normalized.push(part),
				Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
				Component::ParentDir => {
					if !normalized.pop() {
						return Err(BridgeError::Sandbox(PathBuf::from(relative)));
					}
				}
			}
		}
		Ok(self.sandbox_root.join(normalized))
	}

	/// Copy a file, creating the destination's parent directories
	pub async fn copy_file(&self, from: &str, to: &str) -> BridgeResult<()> {
		let from_path = self.resolve(from)?;
		let to_path = self.resolve(to)?;
		if let Some(parent) = to_path.parent() {
			fs::create_dir_all(parent).await?;
		}
		debug!("copy {:?} -> {:?}", from_path, to_path);
		fs::copy(&from_path, &to_path).await?;
		Ok(())
	}

	/// Move (rename) a file or directory
	pub async fn move_file(&self, from: &str, to: &str) -> BridgeResult<()> {
		let from_path = self.resolve(from)?;
		let to_path = self.resolve(to)?;
		fs::rename(&from_path, &to_path).await?;
		Ok(())
	}

	pub async fn delete_file(&self, path: &str) -> BridgeResult<()> {
		fs::remove_file(self.resolve(path)?).await?;
		Ok(())
	}

	/// Remove a directory tree. A missing directory is not an error.
	pub async fn delete_dir(&self, path: &str) -> BridgeResult<()> {
		let dir = self.resolve(path)?;
		match fs::remove_dir_all(&dir).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	/// Create a directory (and parents) if it does not exist yet
	pub async fn create_dir(&self, path: &str) -> BridgeResult<()> {
		fs::create_dir_all(self.resolve(path)?).await?;
		Ok(())
	}

	/// Create an empty file if nothing exists at `path`
	pub async fn create_file(&self, path: &str) -> BridgeResult<()> {
		let file = self.resolve(path)?;
		if !fs::try_exists(&file).await? {
			fs::write(&file, b"").await?;
		}
		Ok(())
	}

	/// Write `content` to `path`, replacing any existing file
	pub async fn write_file(&self, path: &str, content: &str) -> BridgeResult<()> {
		let file = self.resolve(path)?;
		if let Some(parent) = file.parent() {
			fs::create_dir_all(parent).await?;
		}
		fs::write(&file, content).await?;
		Ok(())
	}

	pub async fn read(&self, path: &str) -> BridgeResult<Vec<u8>> {
		Ok(fs::read(self.resolve(path)?).await?)
	}

	pub async fn read_to_string(&self, path: &str) -> BridgeResult<String> {
		Ok(fs::read_to_string(self.resolve(path)?).await?)
	}

	/// True if `path` names an existing regular file
	pub async fn is_file(&self, path: &str) -> bool {
		match self.resolve(path) {
			Ok(p) => fs::metadata(&p).await.map(|m| m.is_file()).unwrap_or(false),
			Err(_) => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_resolve_strips_root_and_rejects_escape() {
		let bridge = FsBridge::with_sandbox("/work");
		assert_eq!(bridge.resolve("/public/index.html").unwrap(), PathBuf::from("/work/public/index.html"));
		assert_eq!(bridge.resolve("a/../b.txt").unwrap(), PathBuf::from("/work/b.txt"));
		assert!(bridge.resolve("../etc/passwd").is_err());
	}

	#[tokio::test]
	async fn test_copy_creates_parent_dirs() {
		let dir = TempDir::new().unwrap();
		let bridge = FsBridge::with_sandbox(dir.path());
		bridge.write_file("index.html", "<h1>hi</h1>").await.unwrap();

		bridge.copy_file("index.html", "public/deep/index.html").await.unwrap();

		let copied = bridge.read_to_string("public/deep/index.html").await.unwrap();
		assert_eq!(copied, "<h1>hi</h1>");
	}

	#[tokio::test]
	async fn test_create_file_keeps_existing_content() {
		let dir = TempDir::new().unwrap();
		let bridge = FsBridge::with_sandbox(dir.path());
		bridge.write_file("notes.txt", "keep me").await.unwrap();

		bridge.create_file("notes.txt").await.unwrap();
		assert_eq!(bridge.read_to_string("notes.txt").await.unwrap(), "keep me");
	}

	#[tokio::test]
	async fn test_move_and_delete() {
		let dir = TempDir::new().unwrap();
		let bridge = FsBridge::with_sandbox(dir.path());
		bridge.write_file("a.txt", "x").await.unwrap();

		bridge.move_file("a.txt", "b.txt").await.unwrap();
		assert!(!bridge.is_file("a.txt").await);
		assert!(bridge.is_file("b.txt").await);

		bridge.delete_file("b.txt").await.unwrap();
		assert!(!bridge.is_file("b.txt").await);
		assert!(bridge.delete_file("b.txt").await.is_err());
	}

	#[tokio::test]
	async fn test_delete_missing_dir_is_ok() {
		let dir = TempDir::new().unwrap();
		let bridge = FsBridge::with_sandbox(dir.path());
		bridge.delete_dir("nothing/here").await.unwrap();
	}
}
