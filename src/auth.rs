use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Token expired")]
    TokenExpired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub principal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Bearer tokens mapped to principal ids, persisted as TOML. Issuance and any
/// login UI live outside this server; the `token` CLI subcommand manages the
/// file directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenDatabase {
    pub tokens: HashMap<String, TokenEntry>,
}

impl TokenDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let contents = fs::read_to_string(path).await?;
        let doc = contents
            .parse::<toml_edit::DocumentMut>()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let db: TokenDatabase = toml_edit::de::from_document(doc)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(db)
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let value = toml_edit::ser::to_document(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        fs::write(path, value.to_string()).await?;
        Ok(())
    }

    pub fn add_token(&mut self, token: String, entry: TokenEntry) {
        self.tokens.insert(token, entry);
    }

    pub fn remove_token(&mut self, token: &str) -> Option<TokenEntry> {
        self.tokens.remove(token)
    }
}

/// Generates a fresh random bearer token for the CLI.
pub fn generate_token() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    (0..32)
        .map(|_| rng.sample(rand::distr::Alphanumeric) as char)
        .collect()
}

pub type SharedAuthenticator = Arc<Authenticator>;

pub struct Authenticator {
    database: TokenDatabase,
}

impl Authenticator {
    pub fn new(database: TokenDatabase) -> Self {
        Self { database }
    }

    /// Loads the token database, falling back to an empty one (every request
    /// rejected) when the file is absent.
    pub async fn load(path: &Path) -> Self {
        let database = match TokenDatabase::load_from_file(path).await {
            Ok(db) => db,
            Err(e) => {
                warn!(
                    "Token database {:?} not loaded ({}), all requests will be rejected",
                    path, e
                );
                TokenDatabase::new()
            }
        };

        Self::new(database)
    }

    /// Resolves the request's bearer token to a principal id.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let token = bearer_token(headers).ok_or(AuthError::Unauthenticated)?;

        let entry = self
            .database
            .tokens
            .get(token)
            .ok_or(AuthError::Unauthenticated)?;

        if let Some(expires_at) = entry.expires_at
            && chrono::Utc::now().timestamp() >= expires_at
        {
            return Err(AuthError::TokenExpired);
        }

        Ok(entry.principal.clone())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_token(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        headers
    }

    fn authenticator_with(token: &str, entry: TokenEntry) -> Authenticator {
        let mut db = TokenDatabase::new();
        db.add_token(token.to_string(), entry);
        Authenticator::new(db)
    }

    #[test]
    fn test_valid_token_resolves_principal() {
        let auth = authenticator_with(
            "secret",
            TokenEntry {
                principal: "alice".to_string(),
                expires_at: None,
            },
        );

        let principal = auth.authenticate(&headers_with_token("secret")).unwrap();
        assert_eq!(principal, "alice");
    }

    #[test]
    fn test_missing_or_unknown_token_is_unauthenticated() {
        let auth = authenticator_with(
            "secret",
            TokenEntry {
                principal: "alice".to_string(),
                expires_at: None,
            },
        );

        assert!(matches!(
            auth.authenticate(&HeaderMap::new()).unwrap_err(),
            AuthError::Unauthenticated
        ));
        assert!(matches!(
            auth.authenticate(&headers_with_token("wrong")).unwrap_err(),
            AuthError::Unauthenticated
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let auth = authenticator_with(
            "secret",
            TokenEntry {
                principal: "alice".to_string(),
                expires_at: Some(chrono::Utc::now().timestamp() - 60),
            },
        );

        assert!(matches!(
            auth.authenticate(&headers_with_token("secret")).unwrap_err(),
            AuthError::TokenExpired
        ));
    }

    #[tokio::test]
    async fn test_database_round_trips_through_toml() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("tokens.toml");

        let mut db = TokenDatabase::new();
        db.add_token(
            "secret".to_string(),
            TokenEntry {
                principal: "alice".to_string(),
                expires_at: Some(4102444800),
            },
        );
        db.save_to_file(&path).await.unwrap();

        let loaded = TokenDatabase::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.tokens.len(), 1);
        assert_eq!(loaded.tokens["secret"].principal, "alice");
        assert_eq!(loaded.tokens["secret"].expires_at, Some(4102444800));
    }
}
