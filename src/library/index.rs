use super::{ImagePage, ImageRecord, Library, LibraryError};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

impl Library {
    pub(crate) fn shard_key(shot_date: &DateTime<Utc>) -> String {
        shot_date.date_naive().format("%Y-%m-%d").to_string()
    }

    pub(crate) fn shard_path(&self, principal: &str, day: &str) -> PathBuf {
        self.index_dir(principal).join(format!("{}.json", day))
    }

    /// Inserts a record into its day shard. A filename already present in the
    /// shard makes this a no-op. The whole shard is re-sorted descending by
    /// shot date and rewritten atomically, so readers never observe a partial
    /// shard.
    pub async fn append_record(
        &self,
        principal: &str,
        record: ImageRecord,
    ) -> Result<bool, LibraryError> {
        let _guard = self.locks.acquire(principal).await;

        let day = Self::shard_key(&record.shot_date);
        let path = self.shard_path(principal, &day);
        let mut records = load_shard(&path).await?;

        if records.iter().any(|r| r.filename == record.filename) {
            debug!(
                "Record {} already indexed in shard {} for {}",
                record.filename, day, principal
            );
            return Ok(false);
        }

        records.push(record);
        records.sort_by(|a, b| b.shot_date.cmp(&a.shot_date));

        tokio::fs::create_dir_all(self.index_dir(principal)).await?;
        write_shard(&path, &records).await?;

        Ok(true)
    }

    /// Removes a filename from the index. With a known shot date the shard is
    /// addressed directly; without one every shard for the principal is
    /// scanned in turn. Removing the last record deletes the shard file.
    pub async fn remove_record(
        &self,
        principal: &str,
        filename: &str,
        shot_date: Option<DateTime<Utc>>,
    ) -> Result<bool, LibraryError> {
        let _guard = self.locks.acquire(principal).await;

        if let Some(shot_date) = shot_date {
            let day = Self::shard_key(&shot_date);
            let path = self.shard_path(principal, &day);
            return remove_from_shard(&path, filename).await;
        }

        for (day, path) in self.list_shards(principal).await? {
            if remove_from_shard(&path, filename).await? {
                debug!("Removed {} from shard {} for {}", filename, day, principal);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// One page of day groups, newest day first. The page unit is a day, not
    /// an image: `page_size` day shards are fully materialized per page. The
    /// global image count is summed only for page 1; later pages return
    /// `None` rather than paying the full scan again.
    pub async fn list_page(
        &self,
        principal: &str,
        page: usize,
        page_size: usize,
    ) -> Result<ImagePage, LibraryError> {
        let page = page.max(1);
        let page_size = page_size.max(1);

        let shards = self.list_shards(principal).await?;

        let start = (page - 1) * page_size;
        let end = (start + page_size).min(shards.len());
        let has_more = end < shards.len();

        let mut days = Vec::new();
        if start < shards.len() {
            for (day, path) in &shards[start..end] {
                let images = load_shard(path).await?;
                days.push(super::DayGroup {
                    date: day.clone(),
                    images,
                });
            }
        }

        let total = if page == 1 {
            let mut count = 0;
            for (_, path) in &shards {
                count += load_shard(path).await?.len();
            }
            Some(count)
        } else {
            None
        };

        Ok(ImagePage {
            days,
            total,
            page,
            page_size,
            has_more,
        })
    }

    /// Day shards for a principal, newest first. An absent index directory is
    /// an empty index.
    pub(crate) async fn list_shards(
        &self,
        principal: &str,
    ) -> Result<Vec<(String, PathBuf)>, LibraryError> {
        let dir = self.index_dir(principal);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut shards: Vec<(NaiveDate, String, PathBuf)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d")
            {
                shards.push((date, stem.to_string(), path));
            }
        }

        shards.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(shards.into_iter().map(|(_, day, path)| (day, path)).collect())
    }

    pub(crate) async fn index_is_empty(&self, principal: &str) -> Result<bool, LibraryError> {
        Ok(self.list_shards(principal).await?.is_empty())
    }
}

pub(crate) async fn load_shard(path: &Path) -> Result<Vec<ImageRecord>, LibraryError> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(Vec::new());
    }
    let json = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&json)?)
}

/// Write-then-rename so a crashed or concurrent writer never leaves a
/// half-written shard visible.
async fn write_shard(path: &Path, records: &[ImageRecord]) -> Result<(), LibraryError> {
    let json = serde_json::to_string_pretty(records)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_from_shard(path: &Path, filename: &str) -> Result<bool, LibraryError> {
    let mut records = load_shard(path).await?;
    let len_before = records.len();
    records.retain(|r| r.filename != filename);

    if records.len() == len_before {
        return Ok(false);
    }

    if records.is_empty() {
        tokio::fs::remove_file(path).await?;
    } else {
        write_shard(path, &records).await?;
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::super::Library;
    use super::*;
    use chrono::DateTime;
    use tempfile::TempDir;

    fn test_library(temp_dir: &TempDir) -> Library {
        let mut config = crate::Config::default();
        config.storage.root_directory = temp_dir.path().to_path_buf();
        Library::new(config.storage, config.thumbnails)
    }

    fn record(filename: &str, shot: &str) -> ImageRecord {
        let shot_date: DateTime<Utc> = shot.parse().unwrap();
        ImageRecord {
            filename: filename.to_string(),
            shot_date,
            upload_date: shot_date,
            original_path: format!("/images/alice/{}", filename),
            thumbnail_path: format!("/thumbnails/alice/{}", filename),
        }
    }

    #[tokio::test]
    async fn test_append_sorts_descending_and_rejects_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        assert!(
            library
                .append_record("alice", record("a.jpg", "2024-01-15T10:00:00Z"))
                .await
                .unwrap()
        );
        assert!(
            library
                .append_record("alice", record("b.jpg", "2024-01-15T09:00:00Z"))
                .await
                .unwrap()
        );
        // Duplicate filename in the same shard is a no-op
        assert!(
            !library
                .append_record("alice", record("a.jpg", "2024-01-15T11:00:00Z"))
                .await
                .unwrap()
        );

        let path = library.shard_path("alice", "2024-01-15");
        let records = load_shard(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].filename, "a.jpg");
        assert_eq!(records[1].filename, "b.jpg");
    }

    #[tokio::test]
    async fn test_shard_deleted_when_last_record_removed() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        library
            .append_record("alice", record("a.jpg", "2024-01-15T10:00:00Z"))
            .await
            .unwrap();

        let path = library.shard_path("alice", "2024-01-15");
        assert!(path.exists());

        let shot_date: DateTime<Utc> = "2024-01-15T10:00:00Z".parse().unwrap();
        assert!(
            library
                .remove_record("alice", "a.jpg", Some(shot_date))
                .await
                .unwrap()
        );
        assert!(!path.exists());

        // A fresh append recreates the shard
        library
            .append_record("alice", record("a.jpg", "2024-01-15T10:00:00Z"))
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_remove_without_date_scans_all_shards() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        library
            .append_record("alice", record("a.jpg", "2024-01-15T10:00:00Z"))
            .await
            .unwrap();
        library
            .append_record("alice", record("b.jpg", "2024-02-20T10:00:00Z"))
            .await
            .unwrap();

        assert!(library.remove_record("alice", "a.jpg", None).await.unwrap());
        assert!(!library.shard_path("alice", "2024-01-15").exists());
        assert!(library.shard_path("alice", "2024-02-20").exists());

        // Unknown filename removes nothing
        assert!(!library.remove_record("alice", "c.jpg", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_page_paginates_by_day() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        library
            .append_record("alice", record("a.jpg", "2024-01-15T10:00:00Z"))
            .await
            .unwrap();
        library
            .append_record("alice", record("b.jpg", "2024-01-16T10:00:00Z"))
            .await
            .unwrap();

        let page = library.list_page("alice", 1, 1).await.unwrap();
        assert_eq!(page.days.len(), 1);
        assert_eq!(page.days[0].date, "2024-01-16");
        assert!(page.has_more);
        assert_eq!(page.total, Some(2));

        let page = library.list_page("alice", 2, 1).await.unwrap();
        assert_eq!(page.days.len(), 1);
        assert_eq!(page.days[0].date, "2024-01-15");
        assert!(!page.has_more);
        assert_eq!(page.total, None);

        let page = library.list_page("alice", 3, 1).await.unwrap();
        assert!(page.days.is_empty());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_list_page_empty_index() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        let page = library.list_page("nobody", 1, 10).await.unwrap();
        assert!(page.days.is_empty());
        assert_eq!(page.total, Some(0));
        assert!(!page.has_more);
    }
}
