//! Background indexing jobs.
//!
//! A job plans every requested vault up front, then deletes and re-indexes
//! file by file, checking its cancellation token between files. At most one
//! job holds a given vault at a time.

use crate::cancel::CancellationToken;
use crate::change::{plan_vault, ChangeSet};
use crate::config::{RecallConfig, VaultConfig};
use crate::error::IndexError;
use crate::models::VaultFilter;
use crate::sources::discover_vault_files;
use crate::traits::{KeywordIndex, VectorIndex};
use crate::writer::IndexWriter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobProgress {
    pub processed: usize,
    pub total: usize,
    pub percent: f64,
    pub current_file: Option<String>,
}

impl JobProgress {
    fn advance(&mut self) {
        self.processed += 1;
        self.percent = if self.total == 0 {
            100.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub file_path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub indexed_files: usize,
    pub indexed_chunks: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub touched: usize,
    pub failed: Vec<FileFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub vault: String,
    pub full: bool,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub summary: JobSummary,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What a poller sees: the running job's progress, or idle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexProgress {
    pub running: bool,
    pub job_id: Option<Uuid>,
    pub processed: usize,
    pub total: usize,
    pub percent: f64,
    pub current_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultStatus {
    pub vault: String,
    pub files: usize,
    pub chunks: usize,
}

struct JobEntry {
    info: JobInfo,
    cancel: CancellationToken,
}

struct JobsInner<K: ?Sized, V: ?Sized> {
    writer: IndexWriter<K, V>,
    config: RecallConfig,
    jobs: Mutex<Vec<JobEntry>>,
    busy: Mutex<Vec<(Uuid, VaultFilter)>>,
    finished: Notify,
}

impl<K: ?Sized, V: ?Sized> JobsInner<K, V> {
    fn jobs(&self) -> MutexGuard<'_, Vec<JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn busy(&self) -> MutexGuard<'_, Vec<(Uuid, VaultFilter)>> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, id: Uuid, apply: impl FnOnce(&mut JobInfo)) {
        if let Some(entry) = self.jobs().iter_mut().find(|entry| entry.info.id == id) {
            apply(&mut entry.info);
        }
    }
}

/// Starts, tracks and cancels indexing jobs over one pair of stores.
pub struct IndexJobs<K: ?Sized, V: ?Sized> {
    inner: Arc<JobsInner<K, V>>,
}

impl<K: ?Sized, V: ?Sized> Clone for IndexJobs<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> IndexJobs<K, V>
where
    K: KeywordIndex + ?Sized + 'static,
    V: VectorIndex + ?Sized + 'static,
{
    pub fn new(writer: IndexWriter<K, V>, config: RecallConfig) -> Self {
        Self {
            inner: Arc::new(JobsInner {
                writer,
                config,
                jobs: Mutex::new(Vec::new()),
                busy: Mutex::new(Vec::new()),
                finished: Notify::new(),
            }),
        }
    }

    /// Starts a background job and returns its id without waiting.
    ///
    /// Fails with `VaultBusy` if a running job already covers any of the
    /// requested vaults.
    pub fn start_index(&self, vault: VaultFilter, full: bool) -> Result<Uuid, IndexError> {
        let vaults = self.resolve(&vault)?;
        let id = Uuid::new_v4();
        {
            let mut busy = self.inner.busy();
            if busy.iter().any(|(_, held)| held.overlaps(&vault)) {
                return Err(IndexError::VaultBusy(vault.to_string()));
            }
            busy.push((id, vault.clone()));
        }

        let cancel = CancellationToken::new();
        self.inner.jobs().push(JobEntry {
            info: JobInfo {
                id,
                vault: vault.to_string(),
                full,
                status: JobStatus::Pending,
                progress: JobProgress::default(),
                summary: JobSummary::default(),
                error: None,
                started_at: Utc::now(),
                finished_at: None,
            },
            cancel: cancel.clone(),
        });

        info!(job = %id, vault = %vault, full, "indexing job queued");
        tokio::spawn(run_job(Arc::clone(&self.inner), id, vaults, full, cancel));
        Ok(id)
    }

    /// Requests cancellation; the job stops before its next file.
    pub fn cancel(&self, id: Uuid) -> Result<JobInfo, IndexError> {
        let jobs = self.inner.jobs();
        let entry = jobs
            .iter()
            .find(|entry| entry.info.id == id)
            .ok_or_else(|| IndexError::UnknownJob(id.to_string()))?;
        if !entry.info.status.is_finished() {
            entry.cancel.cancel();
            info!(job = %id, "cancellation requested");
        }
        Ok(entry.info.clone())
    }

    pub fn job(&self, id: Uuid) -> Option<JobInfo> {
        self.inner
            .jobs()
            .iter()
            .find(|entry| entry.info.id == id)
            .map(|entry| entry.info.clone())
    }

    /// All jobs, most recent first.
    pub fn jobs(&self) -> Vec<JobInfo> {
        self.inner
            .jobs()
            .iter()
            .rev()
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub fn index_progress(&self) -> IndexProgress {
        let jobs = self.inner.jobs();
        let Some(active) = jobs
            .iter()
            .rev()
            .find(|entry| !entry.info.status.is_finished())
        else {
            return IndexProgress::default();
        };
        let progress = &active.info.progress;
        IndexProgress {
            running: true,
            job_id: Some(active.info.id),
            processed: progress.processed,
            total: progress.total,
            percent: progress.percent,
            current_file: progress.current_file.clone(),
        }
    }

    /// Resolves once the job has finished.
    pub async fn wait(&self, id: Uuid) -> Result<JobInfo, IndexError> {
        loop {
            let finished = self.inner.finished.notified();
            let info = self
                .job(id)
                .ok_or_else(|| IndexError::UnknownJob(id.to_string()))?;
            if info.status.is_finished() {
                return Ok(info);
            }
            finished.await;
        }
    }

    /// Indexed file and chunk counts per configured vault.
    pub async fn status(&self) -> Result<Vec<VaultStatus>, IndexError> {
        let keyword = self.inner.writer.keyword();
        let mut statuses = Vec::with_capacity(self.inner.config.vaults.len());
        for vault in &self.inner.config.vaults {
            let files = keyword.keyword_files(&vault.name).await?;
            statuses.push(VaultStatus {
                vault: vault.name.clone(),
                files: files.len(),
                chunks: files.iter().map(|file| file.chunk_count).sum(),
            });
        }
        Ok(statuses)
    }

    fn resolve(&self, vault: &VaultFilter) -> Result<Vec<VaultConfig>, IndexError> {
        match vault {
            VaultFilter::All => Ok(self.inner.config.vaults.clone()),
            VaultFilter::Only(name) => self
                .inner
                .config
                .vault(name)
                .cloned()
                .map(|vault| vec![vault])
                .ok_or_else(|| IndexError::UnknownVault(name.clone())),
        }
    }
}

async fn run_job<K, V>(
    inner: Arc<JobsInner<K, V>>,
    id: Uuid,
    vaults: Vec<VaultConfig>,
    full: bool,
    cancel: CancellationToken,
) where
    K: KeywordIndex + ?Sized,
    V: VectorIndex + ?Sized,
{
    inner.update(id, |info| info.status = JobStatus::Running);
    let outcome = index_vaults(&inner, id, &vaults, full, &cancel).await;
    let flushed = inner.writer.flush().await;

    let (status, error) = match (outcome, flushed) {
        (Err(IndexError::Cancelled), _) => (JobStatus::Cancelled, None),
        (Err(error), _) | (Ok(()), Err(error)) => (JobStatus::Failed, Some(error.to_string())),
        (Ok(()), Ok(())) => (JobStatus::Completed, None),
    };

    inner.update(id, |info| {
        info.status = status;
        info.error = error.clone();
        info.progress.current_file = None;
        info.finished_at = Some(Utc::now());
        if status == JobStatus::Completed {
            info.progress.percent = 100.0;
        }
        match &error {
            Some(error) => warn!(job = %id, error = %error, "indexing job failed"),
            None => info!(
                job = %id,
                status = %status,
                indexed = info.summary.indexed_files,
                deleted = info.summary.deleted,
                unchanged = info.summary.unchanged,
                failed = info.summary.failed.len(),
                "indexing job finished"
            ),
        }
    });
    inner.busy().retain(|(holder, _)| *holder != id);
    inner.finished.notify_waiters();
}

async fn index_vaults<K, V>(
    inner: &JobsInner<K, V>,
    id: Uuid,
    vaults: &[VaultConfig],
    full: bool,
    cancel: &CancellationToken,
) -> Result<(), IndexError>
where
    K: KeywordIndex + ?Sized,
    V: VectorIndex + ?Sized,
{
    let writer = &inner.writer;
    let mut plans = Vec::<(String, ChangeSet)>::with_capacity(vaults.len());
    for vault in vaults {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        let discovered = {
            let vault = vault.clone();
            let excluded = inner.config.excluded_folders.clone();
            let pdf_enabled = inner.config.pdf_enabled;
            tokio::task::spawn_blocking(move || discover_vault_files(&vault, &excluded, pdf_enabled))
                .await
                .map_err(|error| IndexError::Io(std::io::Error::other(error.to_string())))?
        };
        let disk = match discovered {
            Ok(disk) => disk,
            Err(IndexError::MissingRoot { vault: name, path }) => {
                warn!(job = %id, vault = %name, root = %path.display(), "vault root missing, skipping vault");
                inner.update(id, |info| {
                    info.summary.failed.push(FileFailure {
                        file_path: path.display().to_string(),
                        reason: "vault root is missing or not a directory".to_string(),
                    })
                });
                continue;
            }
            Err(error) => return Err(error),
        };
        let changes = plan_vault(
            writer.keyword().as_ref(),
            writer.vector().as_ref(),
            &vault.name,
            disk,
            full,
        )
        .await?;
        info!(
            job = %id,
            vault = %vault.name,
            to_index = changes.to_index.len(),
            to_delete = changes.to_delete.len(),
            unchanged = changes.unchanged_count(),
            unreadable = changes.unreadable.len(),
            "planned vault"
        );
        plans.push((vault.name.clone(), changes));
    }

    let total = plans.iter().map(|(_, changes)| changes.total()).sum();
    inner.update(id, |info| {
        info.progress.total = total;
        info.progress.percent = if total == 0 { 100.0 } else { 0.0 };
    });

    for (vault, changes) in plans {
        inner.update(id, |info| {
            info.summary.unchanged += changes.unchanged_count();
            info.summary.failed.extend(changes.unreadable.iter().map(|unreadable| FileFailure {
                file_path: unreadable.path.display().to_string(),
                reason: unreadable.reason.clone(),
            }));
        });

        for touched in &changes.touched {
            match writer.touch_file(&vault, touched).await {
                Ok(()) => inner.update(id, |info| info.summary.touched += 1),
                Err(error) => warn!(path = %touched.file_path, error = %error, "could not refresh mtime"),
            }
        }

        for path in &changes.to_delete {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            inner.update(id, |info| info.progress.current_file = Some(path.clone()));
            let deleted = writer.delete_file(&vault, path).await;
            inner.update(id, |info| {
                match deleted {
                    Ok(()) => info.summary.deleted += 1,
                    Err(error) => {
                        warn!(path = %path, error = %error, "could not delete file from index");
                        info.summary.failed.push(FileFailure {
                            file_path: path.clone(),
                            reason: error.to_string(),
                        });
                    }
                }
                info.progress.advance();
            });
        }

        for file in &changes.to_index {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let key = file.key();
            inner.update(id, |info| info.progress.current_file = Some(key.clone()));
            let indexed = writer.index_file(file, cancel).await;
            if matches!(indexed, Err(IndexError::Cancelled)) {
                return Err(IndexError::Cancelled);
            }
            inner.update(id, |info| {
                match indexed {
                    Ok(chunks) => {
                        info.summary.indexed_files += 1;
                        info.summary.indexed_chunks += chunks;
                    }
                    Err(error) => {
                        warn!(path = %key, error = %error, "skipping file");
                        info.summary.failed.push(FileFailure {
                            file_path: key.clone(),
                            reason: error.to_string(),
                        });
                    }
                }
                info.progress.advance();
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::EmbedError;
    use crate::models::StoreQuery;
    use crate::stores::{MemoryKeywordIndex, MemoryVectorIndex};
    use crate::traits::Embedder;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    type MemoryJobs = IndexJobs<MemoryKeywordIndex, MemoryVectorIndex>;

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn name(&self) -> &str {
            "slow"
        }

        fn dimensions(&self) -> usize {
            32
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            CharacterNgramEmbedder { dimensions: 32 }.embed(texts).await
        }
    }

    /// Fails for any batch mentioning "broken".
    struct PickyEmbedder;

    #[async_trait]
    impl Embedder for PickyEmbedder {
        fn name(&self) -> &str {
            "picky"
        }

        fn dimensions(&self) -> usize {
            32
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            if texts.iter().any(|text| text.contains("broken")) {
                return Err(EmbedError::Response {
                    provider: "picky".to_string(),
                    details: "model crashed".to_string(),
                });
            }
            CharacterNgramEmbedder { dimensions: 32 }.embed(texts).await
        }
    }

    fn jobs_for(root: &Path, embedder: Arc<dyn Embedder>) -> MemoryJobs {
        let writer = IndexWriter::new(
            Arc::new(MemoryKeywordIndex::new()),
            Arc::new(MemoryVectorIndex::new()),
            embedder,
        );
        let config = RecallConfig {
            vaults: vec![
                VaultConfig::new("work", root.join("work")),
                VaultConfig::new("personal", root.join("personal")),
            ],
            ..RecallConfig::default()
        };
        IndexJobs::new(writer, config)
    }

    fn write_note(root: &Path, relative: &str, body: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn work() -> VaultFilter {
        VaultFilter::Only("work".to_string())
    }

    #[tokio::test]
    async fn incremental_runs_are_idempotent() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "work/meetings/a.md", "pricing review with Jordan");
        write_note(dir.path(), "work/b.md", "hiring plan");
        let jobs = jobs_for(dir.path(), Arc::new(CharacterNgramEmbedder { dimensions: 32 }));

        let first = jobs.wait(jobs.start_index(work(), false).unwrap()).await.unwrap();
        assert_eq!(first.status, JobStatus::Completed);
        assert_eq!(first.summary.indexed_files, 2);
        assert_eq!(first.progress.processed, 2);
        assert_eq!(first.progress.percent, 100.0);

        let second = jobs.wait(jobs.start_index(work(), false).unwrap()).await.unwrap();
        assert_eq!(second.summary.indexed_files, 0);
        assert_eq!(second.summary.unchanged, 2);
        assert_eq!(second.progress.total, 0);

        let listed = jobs.jobs();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn notes_without_text_are_not_reindexed() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "work/empty.md", "");
        write_note(dir.path(), "work/draft.md", "---\ntitle: Draft\npeople: [Jordan]\n---\n");
        write_note(dir.path(), "work/blank.md", "\n   \n\t\n");
        write_note(dir.path(), "work/a.md", "pricing review");
        let jobs = jobs_for(dir.path(), Arc::new(CharacterNgramEmbedder { dimensions: 32 }));

        let first = jobs.wait(jobs.start_index(work(), false).unwrap()).await.unwrap();
        assert_eq!(first.summary.indexed_files, 4);
        assert_eq!(first.summary.indexed_chunks, 1);

        let second = jobs.wait(jobs.start_index(work(), false).unwrap()).await.unwrap();
        assert_eq!(second.progress.total, 0);
        assert_eq!(second.summary.indexed_files, 0);
        assert_eq!(second.summary.unchanged, 4);

        let status = jobs.status().await.unwrap();
        assert_eq!(status[0].files, 4);
        assert_eq!(status[0].chunks, 1);

        write_note(dir.path(), "work/empty.md", "now it has text");
        let third = jobs.wait(jobs.start_index(work(), false).unwrap()).await.unwrap();
        assert_eq!(third.summary.indexed_files, 1);
        assert_eq!(third.summary.indexed_chunks, 1);
    }

    #[tokio::test]
    async fn missing_vault_root_keeps_its_index_and_spares_other_vaults() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "work/a.md", "alpha");
        write_note(dir.path(), "personal/b.md", "beta");
        let jobs = jobs_for(dir.path(), Arc::new(CharacterNgramEmbedder { dimensions: 32 }));
        jobs.wait(jobs.start_index(VaultFilter::All, false).unwrap())
            .await
            .unwrap();

        fs::rename(dir.path().join("work"), dir.path().join("unmounted")).unwrap();
        write_note(dir.path(), "personal/c.md", "gamma");
        let rerun = jobs
            .wait(jobs.start_index(VaultFilter::All, false).unwrap())
            .await
            .unwrap();

        assert_eq!(rerun.status, JobStatus::Completed);
        assert_eq!(rerun.summary.deleted, 0);
        assert_eq!(rerun.summary.indexed_files, 1);
        assert_eq!(rerun.summary.failed.len(), 1);
        assert!(rerun.summary.failed[0].file_path.ends_with("work"));

        let writer = &jobs.inner.writer;
        assert_eq!(writer.keyword().keyword_files("work").await.unwrap().len(), 1);
        assert_eq!(writer.vector().vector_files("work").await.unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_folder_keeps_its_indexed_files() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        write_note(dir.path(), "work/meetings/a.md", "pricing review with Jordan");
        write_note(dir.path(), "work/b.md", "hiring plan");
        let jobs = jobs_for(dir.path(), Arc::new(CharacterNgramEmbedder { dimensions: 32 }));
        jobs.wait(jobs.start_index(work(), false).unwrap()).await.unwrap();

        let meetings = dir.path().join("work/meetings");
        fs::set_permissions(&meetings, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&meetings).is_ok() {
            // permission bits are not enforced for this user
            fs::set_permissions(&meetings, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }
        let rerun = jobs.wait(jobs.start_index(work(), false).unwrap()).await;
        fs::set_permissions(&meetings, fs::Permissions::from_mode(0o755)).unwrap();
        let rerun = rerun.unwrap();

        assert_eq!(rerun.status, JobStatus::Completed);
        assert_eq!(rerun.summary.deleted, 0);
        assert_eq!(rerun.summary.unchanged, 2);
        assert_eq!(rerun.summary.failed.len(), 1);
        assert!(rerun.summary.failed[0].file_path.ends_with("meetings"));
        let writer = &jobs.inner.writer;
        assert_eq!(writer.keyword().keyword_files("work").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn removed_files_disappear_from_search() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "work/a.md", "zeppelin logistics");
        write_note(dir.path(), "work/b.md", "hiring plan");
        let jobs = jobs_for(dir.path(), Arc::new(CharacterNgramEmbedder { dimensions: 32 }));
        jobs.wait(jobs.start_index(work(), false).unwrap()).await.unwrap();

        fs::remove_file(dir.path().join("work/a.md")).unwrap();
        let rerun = jobs.wait(jobs.start_index(work(), false).unwrap()).await.unwrap();
        assert_eq!(rerun.summary.deleted, 1);

        let query = StoreQuery {
            text: "zeppelin".to_string(),
            vaults: VaultFilter::All,
            date_from: None,
            date_to: None,
            person: None,
            limit: 10,
        };
        let writer = &jobs.inner.writer;
        assert!(writer.keyword().search_keyword(&query).await.unwrap().is_empty());
        assert_eq!(writer.vector().vector_files("work").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_is_reported_per_file() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "work/good.md", "fine content");
        write_note(dir.path(), "work/bad.md", "broken content");
        let jobs = jobs_for(dir.path(), Arc::new(PickyEmbedder));

        let info = jobs.wait(jobs.start_index(work(), false).unwrap()).await.unwrap();
        assert_eq!(info.status, JobStatus::Completed);
        assert_eq!(info.summary.indexed_files, 1);
        assert_eq!(info.summary.failed.len(), 1);
        assert!(info.summary.failed[0].file_path.ends_with("bad.md"));
    }

    #[tokio::test]
    async fn second_job_for_busy_vault_is_rejected() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "work/a.md", "alpha");
        write_note(dir.path(), "work/b.md", "beta");
        write_note(dir.path(), "personal/c.md", "gamma");
        let jobs = jobs_for(dir.path(), Arc::new(SlowEmbedder));

        let running = jobs.start_index(work(), false).unwrap();
        assert!(matches!(jobs.start_index(work(), false), Err(IndexError::VaultBusy(_))));
        assert!(matches!(
            jobs.start_index(VaultFilter::All, false),
            Err(IndexError::VaultBusy(_))
        ));
        let personal = jobs
            .start_index(VaultFilter::Only("personal".to_string()), false)
            .unwrap();

        jobs.cancel(running).unwrap();
        assert_eq!(jobs.wait(running).await.unwrap().status, JobStatus::Cancelled);
        jobs.wait(personal).await.unwrap();

        let restarted = jobs.start_index(VaultFilter::All, false).unwrap();
        assert_eq!(jobs.wait(restarted).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn progress_reports_running_job_then_idle() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "work/a.md", "alpha");
        let jobs = jobs_for(dir.path(), Arc::new(SlowEmbedder));

        let id = jobs.start_index(work(), true).unwrap();
        let progress = jobs.index_progress();
        assert!(progress.running);
        assert_eq!(progress.job_id, Some(id));

        jobs.wait(id).await.unwrap();
        assert_eq!(jobs.index_progress(), IndexProgress::default());
    }

    #[tokio::test]
    async fn unknown_vaults_and_jobs_are_errors() {
        let dir = tempdir().unwrap();
        let jobs = jobs_for(dir.path(), Arc::new(CharacterNgramEmbedder { dimensions: 32 }));
        assert!(matches!(
            jobs.start_index(VaultFilter::Only("archive".to_string()), false),
            Err(IndexError::UnknownVault(_))
        ));
        assert!(matches!(jobs.cancel(Uuid::new_v4()), Err(IndexError::UnknownJob(_))));
        assert!(jobs.job(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn status_counts_files_and_chunks() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "work/a.md", "alpha");
        write_note(dir.path(), "personal/b.md", "beta");
        let jobs = jobs_for(dir.path(), Arc::new(CharacterNgramEmbedder { dimensions: 32 }));
        jobs.wait(jobs.start_index(VaultFilter::All, false).unwrap())
            .await
            .unwrap();

        let status = jobs.status().await.unwrap();
        assert_eq!(
            status,
            vec![
                VaultStatus {
                    vault: "work".to_string(),
                    files: 1,
                    chunks: 1
                },
                VaultStatus {
                    vault: "personal".to_string(),
                    files: 1,
                    chunks: 1
                },
            ]
        );
    }
}
