use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlbumError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Album not found")]
    NotFound,

    #[error("Album already exists")]
    AlreadyExists,

    #[error("Image is already in the album")]
    AlreadyMember,

    #[error("Invalid album name")]
    InvalidName,
}
