use super::{ImageRecord, Library, LibraryError, SharedLibrary};
use tracing::{debug, error, info, warn};

impl Library {
    /// One-time backfill of a principal whose originals predate the index.
    /// Runs only when the index holds no shards; a populated index makes this
    /// a no-op even if unindexed files exist.
    pub async fn migrate(&self, principal: &str) -> Result<usize, LibraryError> {
        if !self.index_is_empty(principal).await? {
            debug!("Index for {} already populated, skipping migration", principal);
            return Ok(0);
        }

        info!("Migrating unindexed originals for {}", principal);
        let start_time = std::time::Instant::now();
        let mut count = 0;

        for filename in self.scan_originals(principal) {
            let path = self.original_path(principal, &filename);
            let shot_date = match self.extract_shot_date(&path).await {
                Ok(date) => date,
                Err(e) => {
                    warn!("Skipping {} during migration: {}", filename, e);
                    continue;
                }
            };
            let upload_date = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata
                    .modified()
                    .map(chrono::DateTime::from)
                    .unwrap_or_else(|_| chrono::Utc::now()),
                Err(e) => {
                    warn!("Skipping {} during migration: {}", filename, e);
                    continue;
                }
            };

            let record = ImageRecord {
                original_path: self.original_ref(principal, &filename),
                thumbnail_path: self.thumbnail_ref(principal, &filename),
                filename,
                shot_date,
                upload_date,
            };

            if self.append_record(principal, record).await? {
                count += 1;
            }
        }

        let elapsed = start_time.elapsed();
        info!(
            "Migration for {} completed: {} images in {:.2}s",
            principal,
            count,
            elapsed.as_secs_f64()
        );

        Ok(count)
    }

    /// Kicks off migration for a principal in the background the first time
    /// their index is read. The in-flight set keeps a busy principal from
    /// being migrated twice concurrently; the empty-index check inside
    /// `migrate` keeps it from ever running again once shards exist.
    pub fn ensure_migrated(library: &SharedLibrary, principal: &str) {
        {
            let mut in_flight = library.migrations_in_flight.lock().unwrap();
            if !in_flight.insert(principal.to_string()) {
                return;
            }
        }

        let library = library.clone();
        let principal = principal.to_string();
        tokio::spawn(async move {
            if let Err(e) = library.migrate(&principal).await {
                error!("Migration for {} failed: {}", principal, e);
            }

            let mut in_flight = library.migrations_in_flight.lock().unwrap();
            in_flight.remove(&principal);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::Library;
    use tempfile::TempDir;

    fn test_library(temp_dir: &TempDir) -> Library {
        let mut config = crate::Config::default();
        config.storage.root_directory = temp_dir.path().to_path_buf();
        Library::new(config.storage, config.thumbnails)
    }

    fn create_test_image(path: &std::path::Path) {
        use image::{ImageBuffer, Rgb};

        let img = ImageBuffer::from_fn(16, 16, |x, y| Rgb([x as u8, y as u8, 0u8]));
        img.save(path).unwrap();
    }

    #[tokio::test]
    async fn test_migrate_backfills_unindexed_originals() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        let originals = library.originals_dir("alice");
        std::fs::create_dir_all(&originals).unwrap();
        create_test_image(&originals.join("old_a.jpg"));
        create_test_image(&originals.join("old_b.jpg"));

        let migrated = library.migrate("alice").await.unwrap();
        assert_eq!(migrated, 2);

        let page = library.list_page("alice", 1, 10).await.unwrap();
        assert_eq!(page.total, Some(2));
    }

    #[tokio::test]
    async fn test_migrate_is_noop_once_index_is_populated() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        let originals = library.originals_dir("alice");
        std::fs::create_dir_all(&originals).unwrap();
        create_test_image(&originals.join("old_a.jpg"));

        assert_eq!(library.migrate("alice").await.unwrap(), 1);

        // New unindexed files do not trigger a second migration
        create_test_image(&originals.join("later.jpg"));
        assert_eq!(library.migrate("alice").await.unwrap(), 0);

        let page = library.list_page("alice", 1, 10).await.unwrap();
        assert_eq!(page.total, Some(1));
    }
}
