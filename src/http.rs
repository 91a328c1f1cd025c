//! Static page and JSON endpoints for the browser front end.
//!
//! - `GET /files` lists the tracked files with their display color.
//! - `GET /ws` tells the page where the WebSocket server is reachable.
//! - Anything else is served from the configured html folder.

use crate::config::{Config, WatchedFile};
use crate::error::{Error, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

const COMPONENT: &str = "HttpServer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub color: String,
}

impl From<&WatchedFile> for FileEntry {
    fn from(file: &WatchedFile) -> Self {
        // Pushed records carry absolute paths; list the same form.
        let path = std::path::absolute(&file.path).unwrap_or_else(|_| file.path.clone());
        Self {
            path: path.display().to_string(),
            color: file.color.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebSocketInfo {
    url: String,
}

#[derive(Clone)]
struct AppState {
    files: Arc<Vec<FileEntry>>,
    websocket_url: Arc<str>,
}

/// Builds the router serving the page and its endpoints.
pub fn router(files: Vec<FileEntry>, websocket_url: &str, html: impl Into<PathBuf>) -> Router {
    let state = AppState {
        files: Arc::new(files),
        websocket_url: Arc::from(websocket_url),
    };

    Router::new()
        .route("/files", get(list_files))
        .route("/ws", get(websocket_info))
        .fallback_service(ServeDir::new(html.into()))
        .with_state(state)
}

async fn list_files(State(state): State<AppState>) -> Json<Vec<FileEntry>> {
    Json(state.files.as_ref().clone())
}

async fn websocket_info(State(state): State<AppState>) -> Json<WebSocketInfo> {
    Json(WebSocketInfo {
        url: state.websocket_url.to_string(),
    })
}

struct Listener {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

/// Serves [`router`] on the configured address. Start and stop follow the
/// same rules as the WebSocket server.
pub struct HttpServer {
    host: String,
    port: u16,
    router: Router,
    listener: tokio::sync::Mutex<Option<Listener>>,
}

impl HttpServer {
    pub fn new(host: impl Into<String>, port: u16, router: Router) -> Self {
        Self {
            host: host.into(),
            port,
            router,
            listener: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let http = &config.server.http;
        let files = config.files.iter().map(FileEntry::from).collect();
        let router = router(files, &config.server.websocket.public_url(), &http.html);
        Self::new(http.host.clone(), http.port, router)
    }

    pub async fn start(&self) -> Result<SocketAddr> {
        let mut slot = self.listener.lock().await;
        if slot.is_some() {
            tracing::error!("http server already started");
            return Err(Error::AlreadyStarted {
                component: COMPONENT,
            });
        }

        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(host = %self.host, port = local_addr.port(), "http server listening");

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let router = self.router.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(Error::from)
        });

        *slot = Some(Listener {
            local_addr,
            shutdown,
            task,
        });
        Ok(local_addr)
    }

    pub async fn stop(&self) -> Result<()> {
        let Some(listener) = self.listener.lock().await.take() else {
            tracing::error!("http server not started");
            return Err(Error::NotStarted {
                component: COMPONENT,
            });
        };

        tracing::info!("stopping http server");
        let _ = listener.shutdown.send(());
        listener.task.await?
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().await.as_ref().map(|l| l.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get_request(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn entries() -> Vec<FileEntry> {
        vec![
            FileEntry {
                path: "/var/log/syslog".to_string(),
                color: "auto".to_string(),
            },
            FileEntry {
                path: "/var/log/app.log".to_string(),
                color: "#ff0000".to_string(),
            },
        ]
    }

    async fn started(html: PathBuf) -> (HttpServer, SocketAddr) {
        let server = HttpServer::new("127.0.0.1", 0, router(entries(), "ws://example:9906", html));
        let addr = server.start().await.unwrap();
        (server, addr)
    }

    #[test]
    fn test_file_entry_from_watched_file() {
        let file = WatchedFile::new("/var/log/app.log", "\n").with_color("blue");
        let entry = FileEntry::from(&file);

        assert_eq!(entry.path, "/var/log/app.log");
        assert_eq!(entry.color, "blue");
    }

    #[tokio::test]
    async fn test_files_endpoint_lists_tracked_files() {
        let html = tempfile::tempdir().unwrap();
        let (server, addr) = started(html.path().to_path_buf()).await;

        let response = get_request(addr, "/files").await;

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(
            r##"[{"path":"/var/log/syslog","color":"auto"},{"path":"/var/log/app.log","color":"#ff0000"}]"##
        ));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ws_endpoint_returns_public_url() {
        let html = tempfile::tempdir().unwrap();
        let (server, addr) = started(html.path().to_path_buf()).await;

        let response = get_request(addr, "/ws").await;

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#"{"url":"ws://example:9906"}"#));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_static_files_are_served() {
        let html = tempfile::tempdir().unwrap();
        std::fs::write(html.path().join("index.html"), "<h1>tracker</h1>").unwrap();
        let (server, addr) = started(html.path().to_path_buf()).await;

        let index = get_request(addr, "/").await;
        let missing = get_request(addr, "/nope.js").await;

        assert!(index.starts_with("HTTP/1.1 200"));
        assert!(index.contains("<h1>tracker</h1>"));
        assert!(missing.starts_with("HTTP/1.1 404"));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_before_start() {
        let html = tempfile::tempdir().unwrap();
        let server = HttpServer::new("127.0.0.1", 0, router(Vec::new(), "ws://localhost:9906", html.path()));

        assert!(matches!(
            server.stop().await,
            Err(Error::NotStarted { component: "HttpServer" })
        ));

        server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(Error::AlreadyStarted { component: "HttpServer" })
        ));

        server.stop().await.unwrap();
        assert!(server.local_addr().await.is_none());
        server.start().await.unwrap();
        server.stop().await.unwrap();
    }

    #[test]
    fn test_from_config_uses_public_websocket_url() {
        let config = Config::parse(
            r#"
server:
  http:
    host: 127.0.0.1
    port: 0
  websocket:
    url: ws://tracker.local
    port: 9000
files:
  - path: /var/log/app.log
"#,
        )
        .unwrap();

        let server = HttpServer::from_config(&config);
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 0);
    }
}
