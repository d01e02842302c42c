// Albums module - per-principal named collections of image path references
mod error;
mod handlers;

pub use error::AlbumError;
pub use handlers::{
    add_album_member_handler, create_album_handler, delete_album_handler, list_album_handler,
    list_albums_handler, remove_album_member_handler,
};

use crate::library::PrincipalLocks;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub type SharedAlbumStore = Arc<AlbumStore>;

#[derive(Debug, Clone, Serialize)]
pub struct AlbumSummary {
    pub name: String,
    pub count: usize,
}

/// Named, ordered collections of image path references. Members are weak
/// references into the artifact store: an album never owns the images it
/// lists, and pruning on image delete is driven from the delete operation,
/// not from here.
pub struct AlbumStore {
    root: PathBuf,
    locks: PrincipalLocks,
}

impl AlbumStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: PrincipalLocks::default(),
        }
    }

    fn albums_dir(&self, principal: &str) -> PathBuf {
        self.root.join(principal).join("albums")
    }

    fn album_path(&self, principal: &str, name: &str) -> Result<PathBuf, AlbumError> {
        if !is_valid_album_name(name) {
            return Err(AlbumError::InvalidName);
        }
        Ok(self.albums_dir(principal).join(format!("{}.json", name)))
    }

    pub async fn create(&self, principal: &str, name: &str) -> Result<(), AlbumError> {
        let path = self.album_path(principal, name)?;
        let _guard = self.locks.acquire(principal).await;

        if tokio::fs::try_exists(&path).await? {
            return Err(AlbumError::AlreadyExists);
        }

        tokio::fs::create_dir_all(self.albums_dir(principal)).await?;
        write_album(&path, &[]).await?;

        debug!("Created album {} for {}", name, principal);
        Ok(())
    }

    /// Deletes the collection. Its members are forgotten; the referenced
    /// images are untouched.
    pub async fn delete(&self, principal: &str, name: &str) -> Result<(), AlbumError> {
        let path = self.album_path(principal, name)?;
        let _guard = self.locks.acquire(principal).await;

        if !tokio::fs::try_exists(&path).await? {
            return Err(AlbumError::NotFound);
        }

        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    pub async fn add_member(
        &self,
        principal: &str,
        name: &str,
        image_ref: &str,
    ) -> Result<(), AlbumError> {
        let path = self.album_path(principal, name)?;
        let _guard = self.locks.acquire(principal).await;

        let mut members = load_album(&path).await?.ok_or(AlbumError::NotFound)?;

        if members.iter().any(|m| m == image_ref) {
            return Err(AlbumError::AlreadyMember);
        }

        members.push(image_ref.to_string());
        write_album(&path, &members).await?;
        Ok(())
    }

    /// Removing a reference that is not a member succeeds as a no-op.
    pub async fn remove_member(
        &self,
        principal: &str,
        name: &str,
        image_ref: &str,
    ) -> Result<(), AlbumError> {
        let path = self.album_path(principal, name)?;
        let _guard = self.locks.acquire(principal).await;

        let mut members = load_album(&path).await?.ok_or(AlbumError::NotFound)?;

        let len_before = members.len();
        members.retain(|m| m != image_ref);

        if members.len() != len_before {
            write_album(&path, &members).await?;
        }

        Ok(())
    }

    pub async fn list_members(
        &self,
        principal: &str,
        name: &str,
    ) -> Result<Vec<String>, AlbumError> {
        let path = self.album_path(principal, name)?;
        load_album(&path).await?.ok_or(AlbumError::NotFound)
    }

    pub async fn list_albums(&self, principal: &str) -> Result<Vec<AlbumSummary>, AlbumError> {
        let dir = self.albums_dir(principal);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut albums = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                let count = load_album(&path).await?.map(|m| m.len()).unwrap_or(0);
                albums.push(AlbumSummary {
                    name: name.to_string(),
                    count,
                });
            }
        }

        albums.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(albums)
    }

    /// Drops every reference to a deleted image from every album the
    /// principal owns, matching on the exact filename segment of the stored
    /// reference. Albums left empty are kept.
    pub async fn prune_image(&self, principal: &str, filename: &str) -> Result<usize, AlbumError> {
        let dir = self.albums_dir(principal);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(0);
        }

        let _guard = self.locks.acquire(principal).await;

        let mut pruned = 0;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let Some(mut members) = load_album(&path).await? else {
                continue;
            };

            let len_before = members.len();
            members.retain(|m| ref_filename(m) != filename);

            if members.len() != len_before {
                pruned += len_before - members.len();
                write_album(&path, &members).await?;
                debug!(
                    "Pruned {} from album {:?} for {}",
                    filename,
                    path.file_stem().unwrap_or_default(),
                    principal
                );
            }
        }

        Ok(pruned)
    }
}

/// Album names become file names, so anything that could traverse out of the
/// albums directory is rejected up front.
fn is_valid_album_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && name.len() <= 255
}

/// The filename a stored path reference points at: its final segment, URL
/// decoded.
fn ref_filename(image_ref: &str) -> String {
    let segment = image_ref.rsplit('/').next().unwrap_or(image_ref);
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

async fn load_album(path: &Path) -> Result<Option<Vec<String>>, AlbumError> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let json = tokio::fs::read_to_string(path).await?;
    Ok(Some(serde_json::from_str(&json)?))
}

async fn write_album(path: &Path, members: &[String]) -> Result<(), AlbumError> {
    let json = serde_json::to_string_pretty(members)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(temp_dir: &TempDir) -> AlbumStore {
        AlbumStore::new(temp_dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn test_create_duplicate_album_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.create("alice", "holiday").await.unwrap();
        let err = store.create("alice", "holiday").await.unwrap_err();
        assert!(matches!(err, AlbumError::AlreadyExists));

        // Same name under another principal is independent
        store.create("bob", "holiday").await.unwrap();
    }

    #[tokio::test]
    async fn test_album_names_are_validated() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        for name in ["", "../escape", "a/b", ".hidden"] {
            let err = store.create("alice", name).await.unwrap_err();
            assert!(matches!(err, AlbumError::InvalidName), "name: {:?}", name);
        }
    }

    #[tokio::test]
    async fn test_membership_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.create("alice", "holiday").await.unwrap();
        store
            .add_member("alice", "holiday", "/images/alice/a.jpg")
            .await
            .unwrap();

        let err = store
            .add_member("alice", "holiday", "/images/alice/a.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, AlbumError::AlreadyMember));

        // Removing a non-member is a successful no-op
        store
            .remove_member("alice", "holiday", "/images/alice/other.jpg")
            .await
            .unwrap();

        let members = store.list_members("alice", "holiday").await.unwrap();
        assert_eq!(members, vec!["/images/alice/a.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_album_operations_fail() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        assert!(matches!(
            store.delete("alice", "gone").await.unwrap_err(),
            AlbumError::NotFound
        ));
        assert!(matches!(
            store.add_member("alice", "gone", "/images/alice/a.jpg").await.unwrap_err(),
            AlbumError::NotFound
        ));
        assert!(matches!(
            store.list_members("alice", "gone").await.unwrap_err(),
            AlbumError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_prune_matches_exact_filename_only() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.create("alice", "holiday").await.unwrap();
        store.create("alice", "pets").await.unwrap();
        store
            .add_member("alice", "holiday", "/images/alice/a.jpg")
            .await
            .unwrap();
        store
            .add_member("alice", "holiday", "/images/alice/aa.jpg")
            .await
            .unwrap();
        store
            .add_member("alice", "pets", "/images/alice/a.jpg")
            .await
            .unwrap();

        let pruned = store.prune_image("alice", "a.jpg").await.unwrap();
        assert_eq!(pruned, 2);

        // "aa.jpg" embeds "a.jpg" as a substring but must survive
        let members = store.list_members("alice", "holiday").await.unwrap();
        assert_eq!(members, vec!["/images/alice/aa.jpg".to_string()]);

        // An emptied album persists
        let members = store.list_members("alice", "pets").await.unwrap();
        assert!(members.is_empty());
    }

    #[tokio::test]
    async fn test_prune_decodes_encoded_references() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.create("alice", "holiday").await.unwrap();
        store
            .add_member("alice", "holiday", "/images/alice/my%20photo.jpg")
            .await
            .unwrap();

        let pruned = store.prune_image("alice", "my photo.jpg").await.unwrap();
        assert_eq!(pruned, 1);
    }

    #[tokio::test]
    async fn test_list_albums_reports_counts() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        assert!(store.list_albums("alice").await.unwrap().is_empty());

        store.create("alice", "holiday").await.unwrap();
        store.create("alice", "pets").await.unwrap();
        store
            .add_member("alice", "holiday", "/images/alice/a.jpg")
            .await
            .unwrap();

        let albums = store.list_albums("alice").await.unwrap();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].name, "holiday");
        assert_eq!(albums[0].count, 1);
        assert_eq!(albums[1].name, "pets");
        assert_eq!(albums[1].count, 0);
    }
}
