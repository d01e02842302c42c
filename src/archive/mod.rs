// Archive module - asynchronous bulk-download packaging
mod error;
mod handlers;

pub use error::ArchiveError;
pub use handlers::{fetch_archive_handler, start_archive_handler};

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

pub type SharedArchiveStore = Arc<ArchiveStore>;

/// Where a polled job stands. The in-progress marker file is the only
/// coordination signal between the detached packaging task and later
/// downloads: marker present means packing, artifact present without a marker
/// means ready.
#[derive(Debug)]
pub enum ArchiveStatus {
    Ready(PathBuf),
    InProgress,
    NotFound,
}

pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn archives_dir(&self, principal: &str) -> PathBuf {
        self.root.join(principal).join("archives")
    }

    fn originals_dir(&self, principal: &str) -> PathBuf {
        self.root.join(principal).join("originals")
    }

    fn artifact_path(&self, principal: &str, job_id: &str) -> PathBuf {
        self.archives_dir(principal).join(format!("{}.zip", job_id))
    }

    fn marker_path(&self, principal: &str, job_id: &str) -> PathBuf {
        self.archives_dir(principal)
            .join(format!("{}.zip.packing", job_id))
    }

    /// Starts a packaging job and returns its id without waiting for the ZIP
    /// to be written. The in-progress marker exists before this returns, so a
    /// poll arriving right after the response can never see "not found".
    /// Member files missing from disk are skipped, not errors.
    pub async fn start(
        &self,
        principal: &str,
        filenames: Vec<String>,
    ) -> Result<String, ArchiveError> {
        if filenames.is_empty() {
            return Err(ArchiveError::EmptySelection);
        }

        let job_id = Utc::now().timestamp_millis().to_string();
        let artifact = self.artifact_path(principal, &job_id);
        let marker = self.marker_path(principal, &job_id);
        let tmp = self.archives_dir(principal).join(format!("{}.zip.tmp", job_id));
        let originals = self.originals_dir(principal);

        tokio::fs::create_dir_all(self.archives_dir(principal)).await?;
        tokio::fs::write(&marker, b"").await?;

        info!(
            "Archive job {} started for {} ({} files selected)",
            job_id,
            principal,
            filenames.len()
        );

        let job = job_id.clone();
        tokio::spawn(async move {
            let tmp_clone = tmp.clone();
            let packed = tokio::task::spawn_blocking(move || {
                pack_archive(&originals, &filenames, &tmp_clone)
            })
            .await;

            let outcome = match packed {
                Ok(Ok(count)) => tokio::fs::rename(&tmp, &artifact)
                    .await
                    .map(|_| count)
                    .map_err(ArchiveError::from),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(ArchiveError::IoError(std::io::Error::other(e))),
            };

            match outcome {
                Ok(count) => {
                    // The artifact is flushed and in place; only now may the
                    // marker disappear.
                    if let Err(e) = tokio::fs::remove_file(&marker).await {
                        error!("Archive job {} could not remove its marker: {}", job, e);
                    } else {
                        info!("Archive job {} ready with {} files", job, count);
                    }
                }
                Err(e) => {
                    error!("Archive job {} failed: {}", job, e);
                    if let Err(e) = tokio::fs::remove_file(&tmp).await
                        && e.kind() != std::io::ErrorKind::NotFound
                    {
                        error!("Archive job {} could not remove partial artifact: {}", job, e);
                    }
                    if let Err(e) = tokio::fs::remove_file(&marker).await {
                        error!("Archive job {} could not remove its marker: {}", job, e);
                    }
                }
            }
        });

        Ok(job_id)
    }

    pub async fn status(&self, principal: &str, job_id: &str) -> ArchiveStatus {
        if job_id.is_empty() || !job_id.bytes().all(|b| b.is_ascii_digit()) {
            return ArchiveStatus::NotFound;
        }

        if tokio::fs::try_exists(self.marker_path(principal, job_id))
            .await
            .unwrap_or(false)
        {
            return ArchiveStatus::InProgress;
        }

        let artifact = self.artifact_path(principal, job_id);
        if tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            return ArchiveStatus::Ready(artifact);
        }

        ArchiveStatus::NotFound
    }
}

fn pack_archive(
    originals_dir: &Path,
    filenames: &[String],
    tmp: &Path,
) -> Result<usize, ArchiveError> {
    let file = std::fs::File::create(tmp)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut count = 0;
    for filename in filenames {
        if filename.contains('/') || filename.contains('\\') || filename.starts_with('.') {
            debug!("Skipping invalid archive member name {:?}", filename);
            continue;
        }

        let source_path = originals_dir.join(filename);
        let mut source = match std::fs::File::open(&source_path) {
            Ok(file) => file,
            Err(_) => {
                debug!("Skipping missing archive member {}", filename);
                continue;
            }
        };

        writer.start_file(filename.as_str(), options)?;
        std::io::copy(&mut source, &mut writer)?;
        count += 1;
    }

    writer.finish()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn wait_until_ready(store: &ArchiveStore, principal: &str, job_id: &str) -> PathBuf {
        for _ in 0..200 {
            if let ArchiveStatus::Ready(path) = store.status(principal, job_id).await {
                return path;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        }
        panic!("archive job {} never became ready", job_id);
    }

    #[tokio::test]
    async fn test_empty_selection_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(temp_dir.path().to_path_buf());

        let err = store.start("alice", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::EmptySelection));
    }

    #[tokio::test]
    async fn test_missing_members_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(temp_dir.path().to_path_buf());

        let originals = temp_dir.path().join("alice").join("originals");
        std::fs::create_dir_all(&originals).unwrap();
        std::fs::write(originals.join("x.jpg"), b"pretend jpeg bytes").unwrap();

        let job_id = store
            .start(
                "alice",
                vec!["x.jpg".to_string(), "missing.jpg".to_string()],
            )
            .await
            .unwrap();

        // The marker is written before start() returns, so the job is
        // immediately visible
        assert!(!matches!(
            store.status("alice", &job_id).await,
            ArchiveStatus::NotFound
        ));

        let artifact = wait_until_ready(&store, "alice", &job_id).await;

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&artifact).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
        assert!(archive.by_name("x.jpg").is_ok());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(temp_dir.path().to_path_buf());

        assert!(matches!(
            store.status("alice", "170000000000").await,
            ArchiveStatus::NotFound
        ));
        assert!(matches!(
            store.status("alice", "../escape").await,
            ArchiveStatus::NotFound
        ));
    }
}
