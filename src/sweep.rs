use crate::library::SharedLibrary;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub type SharedSweeper = Arc<Sweeper>;

/// Background reconciliation: regenerates any thumbnail missing for a stored
/// original. Single-flight: a trigger arriving while a sweep is still running
/// is skipped outright, never queued.
pub struct Sweeper {
    library: SharedLibrary,
    running: AtomicBool,
}

impl Sweeper {
    pub fn new(library: SharedLibrary) -> Self {
        Self {
            library,
            running: AtomicBool::new(false),
        }
    }

    fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Runs one sweep cycle. Returns false when another cycle is already in
    /// progress. Per-file failures are logged and skipped; one unreadable
    /// image never aborts the rest of the batch or the remaining principals.
    pub async fn run_once(&self) -> bool {
        if !self.try_begin() {
            info!("Sweep already in progress, skipping this trigger");
            return false;
        }

        let start_time = std::time::Instant::now();
        let mut repaired = 0;
        let mut failed = 0;

        for principal in self.library.list_principals() {
            for filename in self.library.scan_originals(&principal) {
                let thumbnail = self.library.thumbnail_path(&principal, &filename);
                if tokio::fs::try_exists(&thumbnail).await.unwrap_or(false) {
                    continue;
                }

                match self.library.generate_thumbnail(&principal, &filename).await {
                    Ok(_) => {
                        debug!("Sweep regenerated thumbnail for {}/{}", principal, filename);
                        repaired += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Sweep could not generate thumbnail for {}/{}: {}",
                            principal, filename, e
                        );
                        failed += 1;
                    }
                }
            }
        }

        let elapsed = start_time.elapsed();
        info!(
            "Sweep completed: {} thumbnails repaired, {} failed, in {:.2}s",
            repaired,
            failed,
            elapsed.as_secs_f64()
        );

        self.finish();
        true
    }

    /// Runs a sweep at startup, then on a fixed interval for the life of the
    /// process.
    pub fn start_background(sweeper: SharedSweeper, interval_minutes: u64) {
        tokio::spawn(async move {
            sweeper.run_once().await;

            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_minutes * 60));
            interval.tick().await; // Skip the first immediate tick

            loop {
                interval.tick().await;
                sweeper.run_once().await;
            }
        });
    }
}
