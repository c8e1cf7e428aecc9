use crate::error::IndexError;
use crate::models::IndexedFile;
use crate::sources::{digest_file, modified_seconds, Discovery, SourceFile, UnreadablePath};
use crate::traits::{KeywordIndex, VectorIndex};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

/// A file whose mtime moved without a content change.
#[derive(Debug, Clone, PartialEq)]
pub struct TouchedFile {
    pub file_path: String,
    pub mtime: f64,
}

/// Disjoint work sets for one indexing pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub to_index: Vec<SourceFile>,
    pub unchanged: Vec<SourceFile>,
    pub to_delete: Vec<String>,
    /// Subset of `unchanged` whose stored mtime needs refreshing.
    pub touched: Vec<TouchedFile>,
    /// Indexed paths below an unreadable directory, left untouched.
    pub kept: Vec<String>,
    /// Directories and files that could not be read this pass.
    pub unreadable: Vec<UnreadablePath>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.to_index.is_empty() && self.to_delete.is_empty() && self.touched.is_empty()
    }

    pub fn total(&self) -> usize {
        self.to_index.len() + self.to_delete.len()
    }

    /// Files counted as unchanged, including those kept under unreadable
    /// directories.
    pub fn unchanged_count(&self) -> usize {
        self.unchanged.len() + self.kept.len()
    }

    fn keep_unreadable(&mut self, file: &SourceFile, error: &IndexError) {
        self.unchanged.push(file.clone());
        self.unreadable.push(UnreadablePath {
            path: file.path.clone(),
            reason: error.to_string(),
        });
    }
}

/// Previously indexed state per path, as agreed by both stores.
#[derive(Debug, Default)]
pub struct IndexedState {
    files: BTreeMap<String, IndexedFile>,
    /// Paths the two stores disagree about.
    inconsistent: BTreeSet<String>,
}

impl IndexedState {
    pub fn from_stores(keyword: Vec<IndexedFile>, vector: Vec<IndexedFile>) -> Self {
        let mut vector = vector
            .into_iter()
            .map(|file| (file.file_path.clone(), file))
            .collect::<BTreeMap<_, _>>();
        let mut state = Self::default();

        for file in keyword {
            match vector.remove(&file.file_path) {
                Some(other)
                    if other.file_hash == file.file_hash
                        && other.mtime == file.mtime
                        && other.chunk_count == file.chunk_count => {}
                _ => {
                    state.inconsistent.insert(file.file_path.clone());
                }
            }
            state.files.insert(file.file_path.clone(), file);
        }
        for (path, file) in vector {
            state.inconsistent.insert(path.clone());
            state.files.insert(path, file);
        }
        state
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn is_consistent(&self, file_path: &str) -> bool {
        !self.inconsistent.contains(file_path)
    }
}

/// Two-tier comparison of the on-disk set against indexed state: mtime
/// first, content hash only when mtime moved.
///
/// Indexed paths missing from disk are deleted unless they sit below a
/// directory the walk could not read.
pub fn detect_changes(disk: Discovery, indexed: &IndexedState, full: bool) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let on_disk = disk.files.iter().map(SourceFile::key).collect::<HashSet<_>>();

    for file in &disk.files {
        let key = file.key();
        let previous = match indexed.files.get(&key) {
            Some(previous) if !full && indexed.is_consistent(&key) => previous,
            Some(_) if !full => {
                warn!(path = %key, "stores disagree about file, forcing re-index");
                changes.to_index.push(file.clone());
                continue;
            }
            _ => {
                changes.to_index.push(file.clone());
                continue;
            }
        };

        let mtime = match modified_seconds(&file.path) {
            Ok(mtime) => mtime,
            Err(IndexError::Io(error)) if error.kind() == ErrorKind::NotFound => {
                changes.to_delete.push(key);
                continue;
            }
            Err(error) => {
                warn!(path = %key, error = %error, "cannot stat file, keeping existing entries");
                changes.keep_unreadable(file, &error);
                continue;
            }
        };
        if mtime == previous.mtime {
            changes.unchanged.push(file.clone());
            continue;
        }

        match digest_file(&file.path) {
            Ok(hash) if hash == previous.file_hash => {
                debug!(path = %key, "mtime changed but content did not");
                changes.touched.push(TouchedFile {
                    file_path: key,
                    mtime,
                });
                changes.unchanged.push(file.clone());
            }
            Ok(_) => changes.to_index.push(file.clone()),
            Err(error) => {
                warn!(path = %key, error = %error, "cannot read file, keeping existing entries");
                changes.keep_unreadable(file, &error);
            }
        }
    }

    for path in indexed.files.keys().filter(|path| !on_disk.contains(*path)) {
        if disk.is_under_unreadable(Path::new(path)) {
            debug!(path = %path, "parent directory unreadable, keeping entries");
            changes.kept.push(path.clone());
        } else {
            changes.to_delete.push(path.clone());
        }
    }
    changes.to_delete.sort();
    changes.to_delete.dedup();
    changes.unreadable.extend(disk.unreadable);
    changes
}

/// Loads indexed state for `vault` from both stores and compares it with
/// `disk` off the async runtime.
pub async fn plan_vault<K, V>(
    keyword: &K,
    vector: &V,
    vault: &str,
    disk: Discovery,
    full: bool,
) -> Result<ChangeSet, IndexError>
where
    K: KeywordIndex + ?Sized,
    V: VectorIndex + ?Sized,
{
    let (keyword_files, vector_files) =
        tokio::try_join!(keyword.keyword_files(vault), vector.vector_files(vault))?;
    let indexed = IndexedState::from_stores(keyword_files, vector_files);
    debug!(
        vault,
        indexed = indexed.len(),
        on_disk = disk.files.len(),
        unreadable = disk.unreadable.len(),
        full,
        "planning index pass"
    );

    tokio::task::spawn_blocking(move || detect_changes(disk, &indexed, full))
        .await
        .map_err(|error| IndexError::Io(std::io::Error::other(error.to_string())))
}
