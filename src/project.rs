//! Project Build
//!
//! Collects a project directory into a [`FileMap`], checks the syntax of
//! every source file and writes the two bundle flavours:
//!
//! - `build/<name>.tontoo`
//! - `build/<name>_no_comments.tontoo` (full-line comments stripped)
//! - `build/<name>_source.zip` (plain sources, for sharing the project)
//!
//! Nothing is written when any check fails.

use crate::bundle::{self, FileMap};
use crate::error::{RuntimeError, RuntimeResult};
use crate::manifest::ProjectManifest;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Output directory inside the project
pub const BUILD_DIR: &str = "build";

const SKIPPED_DIRS: &[&str] = &[BUILD_DIR, ".git", "node_modules"];
const NESTED_SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// Paths of a finished build
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub bundle: PathBuf,
    pub distributable: PathBuf,
    pub archive: PathBuf,
    pub files: usize,
}

/// Gather every UTF-8 file below `root`, keyed by `/`-separated relative path
pub fn collect_sources(root: &Path) -> RuntimeResult<FileMap> {
    let mut files = FileMap::new();
    collect_dir(root, root, &mut files)?;
    Ok(files)
}

fn collect_dir(root: &Path, dir: &Path, files: &mut FileMap) -> RuntimeResult<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let skipped = if dir == root {
                SKIPPED_DIRS.iter().any(|s| name == *s)
            } else {
                NESTED_SKIPPED_DIRS.iter().any(|s| name == *s)
            };
            if skipped {
                continue;
            }
            collect_dir(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = relative_key(root, &path);
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    files.insert(relative, text);
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    warn!("Skipping {}: not UTF-8 text", relative);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Pre-build check: braces must balance and a `keyword:` line needs a value
/// or a `{` on the next line.
pub fn check_syntax(code: &str, file: &str) -> RuntimeResult<()> {
    let lines: Vec<&str> = code.split('\n').collect();
    let mut depth: i64 = 0;

    for (i, line) in lines.iter().enumerate() {
        if line.contains('{') {
            depth += 1;
        }
        if line.contains('}') {
            depth -= 1;
        }
        if depth < 0 {
            return Err(RuntimeError::build_syntax(file, i + 1, "Mismatched curly braces {}."));
        }

        if let Some((keyword, value)) = leading_keyword(line.trim()) {
            let next_opens = lines
                .get(i + 1)
                .is_some_and(|next| next.trim().starts_with('{'));
            if value.is_empty() && !next_opens {
                return Err(RuntimeError::build_syntax(
                    file,
                    i + 1,
                    format!("Keyword '{}' is not followed by a value or a block.", keyword),
                ));
            }
        }
    }

    if depth != 0 {
        return Err(RuntimeError::build_syntax(file, lines.len(), "Mismatched curly braces {}."));
    }
    Ok(())
}

/// `word: rest` where `word` is made of word characters
fn leading_keyword(line: &str) -> Option<(&str, &str)> {
    let (keyword, rest) = line.split_once(':')?;
    let is_word = !keyword.is_empty() && keyword.chars().all(|c| c.is_alphanumeric() || c == '_');
    is_word.then(|| (keyword, rest.trim()))
}

/// Collect and check a project without writing anything
pub fn build_in_memory(root: &Path) -> RuntimeResult<(ProjectManifest, FileMap)> {
    let manifest = ProjectManifest::read_project(root)?;
    let files = collect_sources(root)?;
    if files.is_empty() {
        return Err(RuntimeError::config("No data found to build"));
    }

    info!("Checking syntax...");
    for (path, code) in files.iter().filter(|(p, _)| bundle::is_source_path(p)) {
        check_syntax(code, path)?;
    }
    info!("Syntax check successful.");

    Ok((manifest, files))
}

/// Build `root` into `<root>/build`
pub fn build_project(root: &Path) -> RuntimeResult<BuildOutput> {
    let (manifest, files) = build_in_memory(root)?;
    let name = manifest.project_name(root);

    let bundle_bytes = bundle::encode(&files)?;
    let distributable_bytes = bundle::encode_distributable(&files)?;
    let archive_bytes = source_archive(&files)?;

    let out_dir = root.join(BUILD_DIR);
    std::fs::create_dir_all(&out_dir)?;
    let bundle = out_dir.join(format!("{}.tontoo", name));
    let distributable = out_dir.join(format!("{}_no_comments.tontoo", name));
    let archive = out_dir.join(format!("{}_source.zip", name));
    std::fs::write(&bundle, bundle_bytes)?;
    std::fs::write(&distributable, distributable_bytes)?;
    std::fs::write(&archive, archive_bytes)?;

    info!("Build successful: {:?}", bundle);
    Ok(BuildOutput {
        bundle,
        distributable,
        archive,
        files: files.len(),
    })
}

/// Deflated zip of the plain project files
pub fn source_archive(files: &FileMap) -> RuntimeResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (path, content) in files {
        zip.start_file(path.as_str(), options).map_err(std::io::Error::from)?;
        zip.write_all(content.as_bytes())?;
    }

    let cursor = zip.finish().map_err(std::io::Error::from)?;
    Ok(cursor.into_inner())
}
