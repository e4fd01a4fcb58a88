//! Desert Zen Favorites Server
//!
//! Stores one favorites document per user and pushes every change to
//! subscribed clients over WebSocket.
//!
//! # Configuration
//!
//! Environment variables:
//! - `DESERTZEN_PORT`: Port to listen on (default: 8080)
//! - `DESERTZEN_DATA_DIR`: Directory to store documents (default: ~/.local/share/desertzen-server)
//! - `DESERTZEN_CONFIG`: Path to config file (default: ~/.config/desertzen-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "alice"
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /favorites/{user_id}`: Read a document
//! - `PUT /favorites/{user_id}`: Create an empty document if absent
//! - `POST /favorites/{user_id}/items`: Union `{"ids": [...]}` into a document
//! - `DELETE /favorites/{user_id}/items/{id}`: Remove one id
//! - `GET /favorites/{user_id}/subscribe`: WebSocket receiving the document on
//!   connect and after every change
//!
//! Requests authenticate with `Authorization: Bearer <key>` or a `key` query
//! parameter. A key only grants access to its own user's document.

mod hub;
mod storage;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, Request, State,
    },
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use desertzen_core::{FavoritesDocument, ItemsRequest};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hub::FavoritesHub;
use storage::{ServerStorage, ServerStorageError};

// ============================================================================
// Configuration
// ============================================================================

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    user_id: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Directory to store favorites documents
    data_dir: PathBuf,
    /// Path to config file
    config_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("DESERTZEN_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = std::env::var("DESERTZEN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("desertzen-server")
            });

        let config_path = std::env::var("DESERTZEN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("desertzen-server")
                    .join("config.yaml")
            });

        Self {
            port,
            data_dir,
            config_path,
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Authenticated user info, added to request extensions after auth
#[derive(Debug, Clone)]
struct AuthUser {
    user_id: String,
}

/// API key store - maps key -> AuthUser
#[derive(Debug, Clone, Default)]
struct ApiKeyStore {
    keys: HashMap<String, AuthUser>,
}

impl ApiKeyStore {
    fn from_entries(entries: Vec<ApiKeyEntry>) -> Self {
        let keys = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.key,
                    AuthUser {
                        user_id: entry.user_id,
                    },
                )
            })
            .collect();
        Self { keys }
    }

    /// Load API keys from config file
    fn load(config_path: &FsPath) -> Self {
        match std::fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<ConfigFile>(&contents) {
                Ok(config) => {
                    let store = Self::from_entries(config.api_keys);
                    tracing::info!("Loaded {} API key(s)", store.keys.len());
                    store
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                Self::default()
            }
        }
    }

    /// Validate an API key and return the associated user
    fn validate(&self, key: &str) -> Option<AuthUser> {
        self.keys.get(key).cloned()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    api_keys: Arc<ApiKeyStore>,
    storage: Arc<RwLock<ServerStorage>>,
    hub: Arc<FavoritesHub>,
}

impl AppState {
    fn new(api_keys: ApiKeyStore, storage: ServerStorage) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
            storage: Arc::new(RwLock::new(storage)),
            hub: Arc::new(FavoritesHub::new()),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

/// WebSocket clients cannot set headers, so the key may also come as `?key=`.
#[derive(Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

/// Authentication middleware
async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    // Extract Authorization header
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) if h.starts_with("Bearer ") => h[7..].to_string(),
        Some(_) => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_auth",
                "Authorization header must use Bearer scheme",
            );
        }
        None => match Query::<KeyQuery>::try_from_uri(request.uri()) {
            Ok(Query(KeyQuery { key: Some(key) })) => key,
            _ => {
                return error_response(
                    StatusCode::UNAUTHORIZED,
                    "missing_auth",
                    "Authorization header required",
                );
            }
        },
    };

    // Validate API key
    match state.api_keys.validate(&api_key) {
        Some(user) => {
            // Add user info to request extensions
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => error_response(StatusCode::UNAUTHORIZED, "invalid_key", "Invalid API key"),
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by the favorites handlers
#[derive(Debug)]
enum ApiError {
    Forbidden(String),
    NotFound(String),
    InvalidRequest(String),
    Internal(String),
}

impl From<ServerStorageError> for ApiError {
    fn from(e: ServerStorageError) -> Self {
        match e {
            ServerStorageError::InvalidUserId(_) => ApiError::InvalidRequest(e.to_string()),
            _ => {
                tracing::error!("Storage error: {}", e);
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Forbidden(message) => {
                error_response(StatusCode::FORBIDDEN, "forbidden", message)
            }
            ApiError::NotFound(message) => {
                error_response(StatusCode::NOT_FOUND, "not_found", message)
            }
            ApiError::InvalidRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
            }
            ApiError::Internal(message) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

/// A key may only touch its own user's document.
fn authorize(user: &AuthUser, user_id: &str) -> Result<(), ApiError> {
    if user.user_id == user_id {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "{} may not access favorites of {}",
            user.user_id, user_id
        )))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_favorites(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<String>,
) -> Result<Json<FavoritesDocument>, ApiError> {
    authorize(&user, &user_id)?;

    let storage = state.storage.read().await;
    storage
        .load(&user_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No favorites document for {}", user_id)))
}

async fn ensure_favorites(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<String>,
) -> Result<Json<FavoritesDocument>, ApiError> {
    authorize(&user, &user_id)?;

    let storage = state.storage.write().await;
    let change = storage.ensure(&user_id)?;
    if change.changed {
        tracing::info!("Created favorites document for {}", user_id);
        state.hub.broadcast(&change.document).await;
    }
    Ok(Json(change.document))
}

async fn add_items(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<String>,
    Json(request): Json<ItemsRequest>,
) -> Result<Json<FavoritesDocument>, ApiError> {
    authorize(&user, &user_id)?;

    let storage = state.storage.write().await;
    let change = storage.add(&user_id, &request.ids)?;
    if change.changed {
        tracing::debug!("Added {} id(s) to favorites of {}", request.ids.len(), user_id);
        state.hub.broadcast(&change.document).await;
    }
    Ok(Json(change.document))
}

async fn remove_item(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((user_id, id)): Path<(String, String)>,
) -> Result<Json<FavoritesDocument>, ApiError> {
    authorize(&user, &user_id)?;

    let storage = state.storage.write().await;
    let change = storage.remove(&user_id, &id)?;
    if change.changed {
        tracing::debug!("Removed {} from favorites of {}", id, user_id);
        state.hub.broadcast(&change.document).await;
    }
    Ok(Json(change.document))
}

async fn subscribe(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    authorize(&user, &user_id)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

/// Streams a user's document to one WebSocket client until it disconnects.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    // Subscribe before reading so no change between the read and the loop is lost
    let mut updates = state.hub.subscribe(&user_id).await;

    let initial = {
        let storage = state.storage.write().await;
        match storage.ensure(&user_id) {
            Ok(change) => change.document,
            Err(e) => {
                tracing::error!("Failed to load favorites of {}: {}", user_id, e);
                return;
            }
        }
    };

    let (mut sender, mut receiver) = socket.split();
    if send_document(&mut sender, &initial).await.is_err() {
        return;
    }
    tracing::info!("Subscriber connected for {}", user_id);

    loop {
        tokio::select! {
            update = updates.recv() => {
                let document = match update {
                    Ok(document) => document,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Subscriber for {} skipped {} update(s)", user_id, skipped);
                        match state.storage.read().await.load(&user_id) {
                            Ok(Some(document)) => document,
                            _ => continue,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if send_document(&mut sender, &document).await.is_err() {
                    break;
                }
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {
                    // Clients only listen; pings are answered by axum
                }
            }
        }
    }

    drop(updates);
    tracing::info!(
        "Subscriber disconnected for {} ({} active channel(s))",
        user_id,
        state.hub.channel_count().await
    );
}

async fn send_document(
    sender: &mut SplitSink<WebSocket, Message>,
    document: &FavoritesDocument,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(document).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}

// ============================================================================
// Main
// ============================================================================

fn app(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/favorites/{user_id}",
            get(get_favorites).put(ensure_favorites),
        )
        .route("/favorites/{user_id}/items", post(add_items))
        .route("/favorites/{user_id}/items/{id}", delete(remove_item))
        .route("/favorites/{user_id}/subscribe", get(subscribe))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "desertzen_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir).map_err(|e| {
        format!(
            "Failed to create data directory {}: {}",
            config.data_dir.display(),
            e
        )
    })?;

    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let state = AppState::new(
        ApiKeyStore::load(&config.config_path),
        ServerStorage::new(&config.data_dir),
    );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
