use crate::config::VaultConfig;
use crate::error::IndexError;
use crate::models::SourceType;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// A file found on disk inside a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub root: PathBuf,
    pub vault: String,
    pub source_type: SourceType,
}

impl SourceFile {
    /// The key under which the file's chunks are stored.
    pub fn key(&self) -> String {
        path_key(&self.path)
    }
}

pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn is_excluded(path: &Path, excluded_folders: &[String]) -> bool {
    let path = path.to_string_lossy();
    excluded_folders
        .iter()
        .filter(|folder| !folder.is_empty())
        .any(|folder| path.contains(folder.as_str()))
}

/// A path the walk could not read. Indexed files below it are left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadablePath {
    pub path: PathBuf,
    pub reason: String,
}

/// Files found in one vault, plus the places the walk could not enter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub files: Vec<SourceFile>,
    pub unreadable: Vec<UnreadablePath>,
}

impl Discovery {
    pub fn is_under_unreadable(&self, path: &Path) -> bool {
        self.unreadable
            .iter()
            .any(|unreadable| path.starts_with(&unreadable.path))
    }
}

/// Walks the vault's notes root and, when enabled, its PDF root.
///
/// A configured root that is missing or not a directory fails the whole
/// vault. Errors below the root are collected rather than dropped, so a
/// directory that could not be listed is never mistaken for an empty one.
pub fn discover_vault_files(
    vault: &VaultConfig,
    excluded_folders: &[String],
    pdf_enabled: bool,
) -> Result<Discovery, IndexError> {
    let mut discovery = Discovery::default();
    walk_root(
        vault,
        &vault.notes_root,
        SourceType::Markdown,
        excluded_folders,
        &mut discovery,
    )?;

    if let Some(pdf_root) = vault.pdf_root.as_ref().filter(|_| pdf_enabled) {
        walk_root(vault, pdf_root, SourceType::Pdf, excluded_folders, &mut discovery)?;
    }

    discovery.files.sort_by(|left, right| left.path.cmp(&right.path));
    discovery.files.dedup_by(|left, right| left.path == right.path);
    discovery.unreadable.sort_by(|left, right| left.path.cmp(&right.path));
    Ok(discovery)
}

fn walk_root(
    vault: &VaultConfig,
    root: &Path,
    source_type: SourceType,
    excluded_folders: &[String],
    discovery: &mut Discovery,
) -> Result<(), IndexError> {
    if !root.is_dir() {
        return Err(IndexError::MissingRoot {
            vault: vault.name.clone(),
            path: root.to_path_buf(),
        });
    }

    let extension = match source_type {
        SourceType::Markdown => "md",
        SourceType::Pdf => "pdf",
    };

    for item in WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
    {
        let entry = match item {
            Ok(entry) => entry,
            Err(error) => {
                let path = error.path().unwrap_or(root).to_path_buf();
                if is_excluded(&path, excluded_folders) {
                    continue;
                }
                warn!(
                    vault = %vault.name,
                    path = %path.display(),
                    error = %error,
                    "cannot read path during discovery"
                );
                discovery.unreadable.push(UnreadablePath {
                    path,
                    reason: error.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));

        if matches && !is_excluded(entry.path(), excluded_folders) {
            discovery.files.push(SourceFile {
                path: entry.path().to_path_buf(),
                root: root.to_path_buf(),
                vault: vault.name.clone(),
                source_type,
            });
        }
    }
    Ok(())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn digest_file(path: &Path) -> Result<String, IndexError> {
    let bytes = fs::read(path)?;
    Ok(digest_bytes(&bytes))
}

/// Modification time in fractional seconds since the unix epoch.
pub fn modified_seconds(path: &Path) -> Result<f64, IndexError> {
    let modified = fs::metadata(path)?.modified()?;
    let seconds = modified
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default();
    Ok(seconds)
}
