use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod albums;
pub mod archive;
pub mod auth;
pub mod library;
pub mod startup_checks;
pub mod sweep;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    pub storage: StorageConfig,
    pub thumbnails: ThumbnailConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
    pub token_database: PathBuf,
    pub max_upload_mb: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub root_directory: PathBuf,
    pub days_per_page: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepConfig {
    pub interval_minutes: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            app: AppConfig {
                name: "Kura".to_string(),
                log_level: "info".to_string(),
                token_database: PathBuf::from("tokens.toml"),
                max_upload_mb: 50,
            },
            storage: StorageConfig {
                root_directory: PathBuf::from("uploads"),
                days_per_page: 10,
            },
            thumbnails: ThumbnailConfig {
                width: 300,
                height: 300,
                quality: 80,
            },
            sweep: SweepConfig {
                interval_minutes: Some(60),
            },
        }
    }
}

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub library: library::SharedLibrary,
    pub albums: albums::SharedAlbumStore,
    pub archives: archive::SharedArchiveStore,
    pub auth: auth::SharedAuthenticator,
    pub config: Config,
}

pub async fn create_app(config: Config) -> Router {
    let auth = Arc::new(auth::Authenticator::load(&config.app.token_database).await);

    let library = Arc::new(library::Library::new(
        config.storage.clone(),
        config.thumbnails.clone(),
    ));

    let albums = Arc::new(albums::AlbumStore::new(
        config.storage.root_directory.clone(),
    ));

    let archives = Arc::new(archive::ArchiveStore::new(
        config.storage.root_directory.clone(),
    ));

    let app_state = AppState {
        library,
        albums,
        archives,
        auth,
        config: config.clone(),
    };

    Router::new()
        .route(
            "/api/images",
            axum::routing::get(library::list_images_handler),
        )
        .route(
            "/api/images/check/{filename}",
            axum::routing::get(library::check_image_handler),
        )
        .route(
            "/api/images/upload",
            axum::routing::post(library::upload_image_handler),
        )
        .route(
            "/api/images/delete",
            axum::routing::post(library::delete_image_handler),
        )
        .route(
            "/api/images/{principal}/{filename}",
            axum::routing::get(library::serve_image_handler),
        )
        .route(
            "/api/thumbnails/{principal}/{filename}",
            axum::routing::get(library::serve_thumbnail_handler),
        )
        .route(
            "/api/albums",
            axum::routing::get(albums::list_albums_handler).post(albums::create_album_handler),
        )
        .route(
            "/api/albums/{name}",
            axum::routing::get(albums::list_album_handler).delete(albums::delete_album_handler),
        )
        .route(
            "/api/albums/{name}/images",
            axum::routing::post(albums::add_album_member_handler),
        )
        .route(
            "/api/albums/{name}/images/remove",
            axum::routing::post(albums::remove_album_member_handler),
        )
        .route(
            "/api/archives",
            axum::routing::post(archive::start_archive_handler),
        )
        .route(
            "/api/archives/{job_id}",
            axum::routing::get(archive::fetch_archive_handler),
        )
        .layer(axum::extract::DefaultBodyLimit::max(
            config.app.max_upload_mb * 1024 * 1024,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let method = request.method();
                    let uri = request.uri();
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::info_span!(
                        "http_request",
                        method = %method,
                        uri = %uri,
                        matched_path,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    let method = request.method();
                    let uri = request.uri();
                    let headers = request.headers();
                    let user_agent = headers
                        .get("user-agent")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");

                    tracing::info!(
                        target: "access_log",
                        method = %method,
                        path = %uri.path(),
                        query = ?uri.query(),
                        user_agent = %user_agent,
                        "request"
                    );
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let status = response.status();
                        let size = response
                            .headers()
                            .get("content-length")
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or("-");

                        tracing::info!(
                            target: "access_log",
                            status = %status,
                            size = %size,
                            latency_ms = %latency.as_millis(),
                            "response"
                        );
                    },
                ),
        )
        .with_state(app_state)
}
