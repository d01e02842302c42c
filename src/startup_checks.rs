use crate::Config;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StartupCheckError {
    #[error("Failed to create storage root: {0}")]
    StorageRootCreationFailed(#[from] std::io::Error),

    #[error("Storage root is not accessible: {0}")]
    StorageRootNotAccessible(String),

    #[error("Token database missing: {0}")]
    TokenDatabaseMissing(String),
}

pub async fn perform_startup_checks(config: &Config) -> Result<(), Vec<StartupCheckError>> {
    let mut errors = Vec::new();

    info!("Performing startup checks...");

    let root = &config.storage.root_directory;
    if !root.exists() {
        info!("Storage root does not exist, creating: {:?}", root);
        if let Err(e) = tokio::fs::create_dir_all(root).await {
            error!("Failed to create storage root: {}", e);
            errors.push(StartupCheckError::StorageRootCreationFailed(e));
        } else {
            info!("Storage root created successfully");
        }
    } else {
        match tokio::fs::read_dir(root).await {
            Ok(_) => info!("Storage root exists and is accessible: {:?}", root),
            Err(e) => {
                error!("Storage root is not accessible: {}", e);
                errors.push(StartupCheckError::StorageRootNotAccessible(e.to_string()));
            }
        }
    }

    let token_db = &config.app.token_database;
    if !token_db.exists() {
        warn!(
            "Token database does not exist: {:?} - all API requests will be rejected",
            token_db
        );
        warn!("Create one with: kura token add <principal>");
        errors.push(StartupCheckError::TokenDatabaseMissing(
            token_db.display().to_string(),
        ));
    } else {
        info!("Token database exists: {:?}", token_db);
    }

    if errors.is_empty() {
        info!("All startup checks passed");
        Ok(())
    } else {
        error!("Startup checks failed with {} errors", errors.len());
        Err(errors)
    }
}
