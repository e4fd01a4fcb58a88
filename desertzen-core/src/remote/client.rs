//! HTTP client for the Desert Zen favorites document server.
//!
//! Point operations are plain JSON requests. Subscriptions open a WebSocket on
//! which the server sends the whole document after every change; a background
//! task keeps the socket alive and reconnects after connectivity loss.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};

use super::{
    FavoritesDocument, ItemsRequest, RemoteError, RemoteEvent, RemoteFavoritesStore,
    Subscription, SubscriptionHandle,
};
use crate::favorites::FavoriteSet;

/// Timeout for a single HTTP request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for the health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);
/// Delay between subscription reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Error body returned by the document server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Remote favorites store backed by `desertzen-server`.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    server_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpRemoteStore {
    /// Creates a new client with explicit parameters.
    pub fn new(server_url: impl Into<String>, api_key: Option<String>) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Backend(e.to_string()))?;

        Ok(Self {
            server_url: server_url.into(),
            api_key,
            http,
        })
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn document_path(user_id: &str) -> String {
        format!("/favorites/{}", urlencoding::encode(user_id))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.http.request(method, build_http_url(&self.server_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Sends a request that answers with a favorites document.
    async fn send(&self, request: RequestBuilder) -> Result<FavoritesDocument, RemoteError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.message,
                Err(_) => status.to_string(),
            };
            return Err(status_error(status, message));
        }

        response
            .json()
            .await
            .map_err(|e| RemoteError::Backend(format!("invalid document: {}", e)))
    }

    /// Builds the WebSocket URL for a user's subscription.
    fn build_ws_url(&self, user_id: &str) -> String {
        let base_url = if self.server_url.starts_with("http://") {
            self.server_url.replacen("http://", "ws://", 1)
        } else if self.server_url.starts_with("https://") {
            self.server_url.replacen("https://", "wss://", 1)
        } else if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            format!("ws://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        let mut url = format!(
            "{}{}/subscribe",
            base_url.trim_end_matches('/'),
            Self::document_path(user_id)
        );
        if let Some(key) = &self.api_key {
            url.push_str(&format!("?key={}", urlencoding::encode(key)));
        }
        url
    }
}

#[async_trait]
impl RemoteFavoritesStore for HttpRemoteStore {
    async fn ensure_document(&self, user_id: &str) -> Result<(), RemoteError> {
        let request = self.request(Method::PUT, &Self::document_path(user_id));
        self.send(request).await.map(|_| ())
    }

    async fn read_favorites(&self, user_id: &str) -> Result<FavoriteSet, RemoteError> {
        let request = self.request(Method::GET, &Self::document_path(user_id));
        self.send(request).await.map(|doc| doc.favorites)
    }

    async fn add_favorite(&self, user_id: &str, id: &str) -> Result<(), RemoteError> {
        let path = format!("{}/items", Self::document_path(user_id));
        let request = self.request(Method::POST, &path).json(&ItemsRequest {
            ids: vec![id.to_string()],
        });
        self.send(request).await.map(|_| ())
    }

    async fn remove_favorite(&self, user_id: &str, id: &str) -> Result<(), RemoteError> {
        let path = format!(
            "{}/items/{}",
            Self::document_path(user_id),
            urlencoding::encode(id)
        );
        let request = self.request(Method::DELETE, &path);
        self.send(request).await.map(|_| ())
    }

    async fn merge_favorites(&self, user_id: &str, ids: &FavoriteSet) -> Result<(), RemoteError> {
        let path = format!("{}/items", Self::document_path(user_id));
        let request = self
            .request(Method::POST, &path)
            .json(&ItemsRequest { ids: ids.to_vec() });
        self.send(request).await.map(|_| ())
    }

    async fn subscribe(&self, user_id: &str) -> Result<Subscription, RemoteError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let url = self.build_ws_url(user_id);

        let task = tokio::spawn(run_subscription(url, sender));
        let abort = task.abort_handle();

        Ok(Subscription::new(
            receiver,
            SubscriptionHandle::new(move || abort.abort()),
        ))
    }
}

/// Keeps a subscription socket open until the receiver goes away.
///
/// Every lost or refused connection is reported as an error event, then the
/// task retries after [`RECONNECT_DELAY`]. A rejected key ends the task.
async fn run_subscription(url: String, events: mpsc::UnboundedSender<RemoteEvent>) {
    loop {
        if events.is_closed() {
            return;
        }

        let error = match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                tracing::debug!("Favorites subscription connected");
                let (mut sender, mut receiver) = ws_stream.split();

                loop {
                    match receiver.next().await {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<FavoritesDocument>(text.as_str()) {
                                Ok(doc) => {
                                    if events.send(RemoteEvent::Snapshot(doc.favorites)).is_err() {
                                        let _ = sender.send(Message::Close(None)).await;
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("Ignoring malformed favorites push: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sender.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {
                            // Ignore other message types
                        }
                        Some(Err(e)) => {
                            tracing::debug!("Favorites subscription error: {}", e);
                            break;
                        }
                    }
                }

                RemoteError::Unavailable("subscription connection lost".to_string())
            }
            Err(e) => connect_error(e),
        };

        let fatal = !error.is_unavailable();
        if events.send(RemoteEvent::Error(error)).is_err() || fatal {
            return;
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Checks whether the document server answers its health endpoint.
pub async fn check_server(server_url: &str) -> bool {
    let client = match reqwest::Client::builder().timeout(HEALTH_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return false,
    };

    match client.get(build_http_url(server_url, "/health")).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Builds an HTTP URL for a given path.
fn build_http_url(server_url: &str, path: &str) -> String {
    // Convert ws(s) to http(s) if needed
    let base_url = if server_url.starts_with("ws://") {
        server_url.replacen("ws://", "http://", 1)
    } else if server_url.starts_with("wss://") {
        server_url.replacen("wss://", "https://", 1)
    } else if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
        format!("http://{}", server_url)
    } else {
        server_url.to_string()
    };

    format!("{}{}", base_url.trim_end_matches('/'), path)
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        RemoteError::Unavailable(e.to_string())
    } else {
        RemoteError::Backend(e.to_string())
    }
}

fn status_error(status: StatusCode, message: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::PermissionDenied(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            RemoteError::Unavailable(message)
        }
        _ => RemoteError::Backend(format!("server returned {}: {}", status, message)),
    }
}

fn connect_error(e: tungstenite::Error) -> RemoteError {
    match e {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            match status {
                401 | 403 => RemoteError::PermissionDenied(format!(
                    "subscription rejected with status {}",
                    status
                )),
                _ => RemoteError::Unavailable(format!(
                    "subscription rejected with status {}",
                    status
                )),
            }
        }
        other => RemoteError::Unavailable(other.to_string()),
    }
}
