// Library module - per-principal artifact store and date index
mod error;
pub(crate) mod handlers;
mod index;
mod migrate;
mod thumbnails;
mod types;

pub use error::LibraryError;
pub use handlers::{
    check_image_handler, delete_image_handler, list_images_handler, serve_image_handler,
    serve_thumbnail_handler, upload_image_handler,
};
pub use types::*;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

pub type SharedLibrary = Arc<Library>;

/// Lazily-created per-principal mutexes serializing read-modify-write cycles
/// on shard and album files.
#[derive(Default)]
pub struct PrincipalLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PrincipalLocks {
    pub async fn acquire(&self, principal: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(principal.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct Library {
    pub(crate) storage: crate::StorageConfig,
    pub(crate) thumbnails: crate::ThumbnailConfig,
    pub(crate) locks: PrincipalLocks,
    pub(crate) migrations_in_flight: std::sync::Mutex<HashSet<String>>,
}

impl Library {
    pub fn new(storage: crate::StorageConfig, thumbnails: crate::ThumbnailConfig) -> Self {
        Self {
            storage,
            thumbnails,
            locks: PrincipalLocks::default(),
            migrations_in_flight: std::sync::Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.storage.root_directory
    }

    pub(crate) fn originals_dir(&self, principal: &str) -> PathBuf {
        self.storage.root_directory.join(principal).join("originals")
    }

    pub(crate) fn thumbnails_dir(&self, principal: &str) -> PathBuf {
        self.storage
            .root_directory
            .join(principal)
            .join("thumbnails")
    }

    pub(crate) fn index_dir(&self, principal: &str) -> PathBuf {
        self.storage.root_directory.join(principal).join("index")
    }

    pub fn original_path(&self, principal: &str, filename: &str) -> PathBuf {
        self.originals_dir(principal).join(filename)
    }

    pub fn thumbnail_path(&self, principal: &str, filename: &str) -> PathBuf {
        self.thumbnails_dir(principal).join(filename)
    }

    /// URL-style path reference stored in records and album member lists.
    pub(crate) fn original_ref(&self, principal: &str, filename: &str) -> String {
        format!("/images/{}/{}", principal, urlencoding::encode(filename))
    }

    pub(crate) fn thumbnail_ref(&self, principal: &str, filename: &str) -> String {
        format!("/thumbnails/{}/{}", principal, urlencoding::encode(filename))
    }

    pub(crate) fn is_image(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        lower.ends_with(".jpg")
            || lower.ends_with(".jpeg")
            || lower.ends_with(".png")
            || lower.ends_with(".gif")
            || lower.ends_with(".nef")
    }

    /// Filenames live in a flat per-principal namespace and become path
    /// components, so anything that could escape the directory is rejected.
    pub(crate) fn is_valid_filename(&self, filename: &str) -> bool {
        !filename.is_empty()
            && !filename.starts_with('.')
            && !filename.contains('/')
            && !filename.contains('\\')
            && !filename.contains("..")
            && filename.len() <= 255
    }

    /// Principal ids taken from the URL path get the same path-component
    /// rules; ids resolved from the token database are trusted as-is.
    pub(crate) fn is_valid_principal(&self, principal: &str) -> bool {
        self.is_valid_filename(principal)
    }

    pub async fn original_exists(&self, principal: &str, filename: &str) -> bool {
        tokio::fs::try_exists(self.original_path(principal, filename))
            .await
            .unwrap_or(false)
    }

    /// Writes an uploaded original. The filename is the identity key: a
    /// pre-existing file is never overwritten through this path.
    pub async fn save_original(
        &self,
        principal: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<PathBuf, LibraryError> {
        if !self.is_valid_filename(filename) || !self.is_image(filename) {
            return Err(LibraryError::InvalidPath);
        }

        let path = self.original_path(principal, filename);
        if tokio::fs::try_exists(&path).await? {
            return Err(LibraryError::AlreadyExists);
        }

        tokio::fs::create_dir_all(self.originals_dir(principal)).await?;
        tokio::fs::write(&path, data).await?;

        debug!("Stored original {} for {}", filename, principal);
        Ok(path)
    }

    /// Removes the original and its thumbnail. The thumbnail is a disposable
    /// derivative, so a missing one is not an error.
    pub async fn remove_artifacts(
        &self,
        principal: &str,
        filename: &str,
    ) -> Result<(), LibraryError> {
        if !self.is_valid_filename(filename) {
            return Err(LibraryError::InvalidPath);
        }

        let original = self.original_path(principal, filename);
        if !tokio::fs::try_exists(&original).await? {
            return Err(LibraryError::NotFound);
        }
        tokio::fs::remove_file(&original).await?;

        let thumbnail = self.thumbnail_path(principal, filename);
        if let Err(e) = tokio::fs::remove_file(&thumbnail).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }

        Ok(())
    }

    /// Lists original image filenames for a principal, flat namespace.
    pub fn scan_originals(&self, principal: &str) -> Vec<String> {
        use walkdir::WalkDir;

        let dir = self.originals_dir(principal);
        let mut names = Vec::new();

        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .flatten()
        {
            if entry.file_type().is_file()
                && let Some(name) = entry.file_name().to_str()
                && self.is_image(name)
                && !name.starts_with('.')
            {
                names.push(name.to_string());
            }
        }

        names.sort();
        names
    }

    /// All principals known to the store, i.e. top-level directories under the
    /// storage root.
    pub fn list_principals(&self) -> Vec<String> {
        use walkdir::WalkDir;

        let mut principals = Vec::new();

        for entry in WalkDir::new(&self.storage.root_directory)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .flatten()
        {
            if entry.file_type().is_dir()
                && let Some(name) = entry.file_name().to_str()
                && !name.starts_with('.')
            {
                principals.push(name.to_string());
            }
        }

        principals.sort();
        principals
    }
}
