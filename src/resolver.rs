//! Module Resolver
//!
//! `load: { NAME }` first looks for an installed package, every source file
//! under `<packages-dir>/NAME/`, and otherwise for `NAME.tont` at the bundle
//! root. The loaded-file set makes repeated and cyclic loads parse each file
//! once.

use crate::bundle::SOURCE_EXTENSION;
use crate::runtime::RuntimeContext;
use std::sync::Arc;
use tracing::{error, info};

/// Where a module name resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Source files of an installed package, in bundle order
    Package(Vec<String>),
    /// A single root-level source file
    File(String),
    NotFound,
}

impl RuntimeContext {
    /// Find the files `name` refers to without loading them
    pub fn resolve(&self, name: &str) -> Resolution {
        let prefix = format!("{}/{}/", self.config.packages_dir, name);
        let suffix = format!(".{}", SOURCE_EXTENSION);

        let package: Vec<String> = self
            .source_paths()
            .filter(|path| path.starts_with(&prefix) && path.ends_with(&suffix))
            .map(str::to_string)
            .collect();
        if !package.is_empty() {
            return Resolution::Package(package);
        }

        let file = format!("{}.{}", name, SOURCE_EXTENSION);
        if self.has_source(&file) {
            Resolution::File(file)
        } else {
            Resolution::NotFound
        }
    }

    /// Resolve `name` and parse what it names. A miss is logged, not fatal.
    pub async fn resolve_module(self: &Arc<Self>, name: &str) {
        match self.resolve(name) {
            Resolution::Package(files) => {
                for file in &files {
                    if !self.is_loaded(file) {
                        info!("Loading package file: {}", file);
                    }
                    self.load_source(file).await;
                }
            }
            Resolution::File(file) => {
                if !self.is_loaded(&file) {
                    info!("Loading single file: {}", file);
                }
                self.load_source(&file).await;
            }
            Resolution::NotFound => {
                error!("Could not find file or package \"{}\".", name);
            }
        }
    }
}
