use futures::StreamExt;
use log_tracker::{
    Application, BroadcastServer, Config, Error, EventBus, FileWatcher, ServiceRunner,
    WatchedFile, broadcast_records, forward_records,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;

const TIMEOUT: Duration = Duration::from_secs(10);

fn append(path: &Path, content: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

/// Poll `condition` on the runtime until it holds or the timeout elapses.
async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never held");
}

async fn started_broadcast() -> (Arc<BroadcastServer>, SocketAddr) {
    let server = Arc::new(BroadcastServer::new("127.0.0.1", 0));
    let addr = server.start().await.unwrap();
    (server, addr)
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread")]
async fn test_appended_lines_reach_websocket_client() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let (server, addr) = started_broadcast().await;
    let bus = Arc::new(EventBus::new());
    bus.register(broadcast_records(Arc::clone(&server)));
    let dispatcher = tokio::spawn({
        let bus = Arc::clone(&bus);
        async move { bus.run().await }
    });

    let file = WatchedFile::new(&path, "\n").with_color("#00ff00");
    let watcher = FileWatcher::new([file], forward_records(bus.sender()))
        .with_poll_interval(Duration::from_millis(50));
    let mut runner = ServiceRunner::new(watcher);
    runner.start().unwrap();
    eventually(|| runner.service().is_watching()).await;

    let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    eventually(|| server.client_count() == 1).await;

    append(&path, "line1\nline2\n");

    let message = tokio::time::timeout(TIMEOUT, client.next())
        .await
        .expect("no records pushed")
        .unwrap()
        .unwrap();
    let text = message.into_text().unwrap();
    let records: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();

    assert_eq!(records["color"], "#00ff00");
    assert_eq!(records["lines"], serde_json::json!(["line1", "line2"]));
    assert!(records["path"].as_str().unwrap().ends_with("app.log"));

    tokio::task::spawn_blocking(move || runner.stop())
        .await
        .unwrap()
        .unwrap();
    bus.stop();
    dispatcher.await.unwrap().unwrap();
    server.stop().await.unwrap();
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread")]
async fn test_only_back_scan_tail_of_existing_content_is_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.log");
    std::fs::write(&path, "x".repeat(1024)).unwrap();

    let (server, addr) = started_broadcast().await;
    let bus = Arc::new(EventBus::new());
    bus.register(broadcast_records(Arc::clone(&server)));
    let dispatcher = tokio::spawn({
        let bus = Arc::clone(&bus);
        async move { bus.run().await }
    });

    let file = WatchedFile::new(&path, "\n");
    let watcher = FileWatcher::new([file], forward_records(bus.sender()))
        .with_poll_interval(Duration::from_millis(50));
    let mut runner = ServiceRunner::new(watcher);
    runner.start().unwrap();
    eventually(|| runner.service().is_watching()).await;

    let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    eventually(|| server.client_count() == 1).await;

    append(&path, "\nfresh\n");

    let message = tokio::time::timeout(TIMEOUT, client.next())
        .await
        .expect("no records pushed")
        .unwrap()
        .unwrap();
    let records: serde_json::Value =
        serde_json::from_str(message.into_text().unwrap().as_str()).unwrap();
    let lines = records["lines"].as_array().unwrap();

    // Bootstrap rewinds 256 bytes, so that much of the old content comes back.
    assert_eq!(lines.last().unwrap(), "fresh");
    assert!(lines.iter().all(|l| l.as_str().unwrap().len() <= 256));

    tokio::task::spawn_blocking(move || runner.stop())
        .await
        .unwrap()
        .unwrap();
    bus.stop();
    dispatcher.await.unwrap().unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_application_runs_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("tracked.log");
    std::fs::write(&log, "").unwrap();
    let config_path = dir.path().join("config.yaml");
    std::fs::write(
        &config_path,
        format!(
            r#"
server:
  http:
    host: 127.0.0.1
    port: 0
    html: {html}
  websocket:
    url: ws://localhost
    host: 127.0.0.1
    port: 0
logs:
  folder: {logs}
files:
  - path: {log}
    pattern: "\n"
  - path: {missing}
"#,
            html = dir.path().display(),
            logs = dir.path().display(),
            log = log.display(),
            missing = dir.path().join("missing.log").display(),
        ),
    )
    .unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.files.len(), 2);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let app = tokio::spawn(Application::new(config).run(async {
        let _ = stop_rx.await;
    }));

    tokio::time::sleep(Duration::from_millis(200)).await;
    stop_tx.send(()).unwrap();

    tokio::time::timeout(TIMEOUT, app)
        .await
        .expect("application did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_application_fails_when_port_is_taken() {
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let config = Config::parse(&format!(
        r#"
server:
  http:
    host: 127.0.0.1
    port: 0
  websocket:
    host: 127.0.0.1
    port: {port}
"#
    ))
    .unwrap();

    let result = Application::new(config).run(async {}).await;
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_config_without_server_is_rejected() {
    let result = Config::parse("files:\n  - path: /var/log/syslog\n");
    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
}

#[test]
fn test_missing_config_file_is_an_io_error() {
    let result = Config::load("definitely_nonexistent_config_12345.yaml");
    assert!(matches!(result, Err(Error::Io(_))));
}
