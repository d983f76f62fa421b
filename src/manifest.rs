//! `tontoo.json` project manifest

use crate::error::{RuntimeError, RuntimeResult};
use host_bridge::FsBridge;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Manifest file name at the project (and bundle) root
pub const MANIFEST_FILE: &str = "tontoo.json";

/// Entry file used when the manifest names none
pub const DEFAULT_MAIN: &str = "Main.tont";

fn default_main() -> String {
    DEFAULT_MAIN.to_string()
}

/// Installed package: either the source URL it was installed from, or a
/// version pin with an optional source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dependency {
    Source(String),
    Pinned {
        version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
}

impl Dependency {
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Source(_) => None,
            Self::Pinned { version, .. } => Some(version),
        }
    }

    pub fn source(&self) -> Option<&str> {
        match self {
            Self::Source(source) => Some(source),
            Self::Pinned { source, .. } => source.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_main")]
    pub main: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Dependency>,
}

impl ProjectManifest {
    pub fn from_json(text: &str) -> RuntimeResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| RuntimeError::config(format!("{} is invalid: {}", MANIFEST_FILE, e)))
    }

    /// Read the manifest inside a workspace; `None` if there is none
    pub async fn load(fs: &FsBridge) -> RuntimeResult<Option<Self>> {
        if !fs.is_file(MANIFEST_FILE).await {
            return Ok(None);
        }
        let text = fs.read_to_string(MANIFEST_FILE).await?;
        Self::from_json(&text).map(Some)
    }

    /// Read the manifest of a project directory. Missing or empty is an error.
    pub fn read_project(root: &Path) -> RuntimeResult<Self> {
        let path = root.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path).map_err(|_| {
            RuntimeError::config(format!("{} not found or empty in {:?}", MANIFEST_FILE, root))
        })?;
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "{}" {
            return Err(RuntimeError::config(format!(
                "{} not found or empty in {:?}",
                MANIFEST_FILE, root
            )));
        }
        Self::from_json(&text)
    }

    /// Project name, falling back to the directory name
    pub fn project_name(&self, root: &Path) -> String {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| {
                root.canonicalize()
                    .ok()
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            })
            .unwrap_or_else(|| "project".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let manifest = ProjectManifest::from_json(r#"{"name": "demo"}"#).unwrap();
        assert_eq!(manifest.main, DEFAULT_MAIN);
        assert!(manifest.dependencies.is_empty());
        assert!(ProjectManifest::from_json("[1]").is_err());
    }

    #[test]
    fn test_dependencies() {
        let manifest = ProjectManifest::from_json(
            r#"{"name": "demo", "main": "App.tont", "dependencies": {"db": {"version": "1.2.0"}}}"#,
        )
        .unwrap();
        assert_eq!(manifest.main, "App.tont");
        assert_eq!(manifest.dependencies["db"].version(), Some("1.2.0"));
        assert_eq!(manifest.dependencies["db"].source(), None);
    }

    #[test]
    fn test_dependency_as_source_url() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"main": "App.tont", "dependencies": {"db": "https://github.com/arlomu/tontoo-packet/tree/main/db"}}"#,
        )
        .unwrap();

        let manifest = ProjectManifest::read_project(dir.path()).unwrap();
        assert_eq!(manifest.main, "App.tont");
        let db = &manifest.dependencies["db"];
        assert_eq!(db.source(), Some("https://github.com/arlomu/tontoo-packet/tree/main/db"));
        assert_eq!(db.version(), None);
    }

    #[test]
    fn test_dependency_shapes_mixed() {
        let manifest = ProjectManifest::from_json(
            r#"{"dependencies": {"db": "https://example.org/db", "ui": {"version": "2.0.0", "source": "https://example.org/ui"}}}"#,
        )
        .unwrap();
        assert_eq!(manifest.dependencies["db"], Dependency::Source("https://example.org/db".into()));
        assert_eq!(manifest.dependencies["ui"].version(), Some("2.0.0"));
        assert_eq!(manifest.dependencies["ui"].source(), Some("https://example.org/ui"));
        assert!(ProjectManifest::from_json(r#"{"dependencies": {"db": 3}}"#).is_err());
    }

    #[test]
    fn test_read_project_requires_content() {
        let dir = TempDir::new().unwrap();
        assert!(ProjectManifest::read_project(dir.path()).is_err());

        std::fs::write(dir.path().join(MANIFEST_FILE), "{}").unwrap();
        assert!(ProjectManifest::read_project(dir.path()).is_err());

        std::fs::write(dir.path().join(MANIFEST_FILE), r#"{"version": "1.0.0"}"#).unwrap();
        let manifest = ProjectManifest::read_project(dir.path()).unwrap();
        assert!(!manifest.project_name(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_load_from_workspace() {
        let dir = TempDir::new().unwrap();
        let fs = FsBridge::with_sandbox(dir.path());
        assert!(ProjectManifest::load(&fs).await.unwrap().is_none());

        fs.write_file(MANIFEST_FILE, r#"{"main": "Start.tont"}"#).await.unwrap();
        assert_eq!(ProjectManifest::load(&fs).await.unwrap().unwrap().main, "Start.tont");
    }
}
