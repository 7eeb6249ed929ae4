//! End-to-end monitoring cycles against a local HTTP server and the
//! filesystem store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use feedwatch::models::{Config, FeedCatalog, FeedSource};
use feedwatch::pipeline::run_dispatch;
use feedwatch::storage::{HistoryStore, LocalStorage};
use feedwatch::utils::HttpProber;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

static CYCLE: AtomicUsize = AtomicUsize::new(0);

/// `/stable` never changes, `/moving` changes between cycles, `/missing` is a 404.
fn respond(path: &str) -> String {
    let last_modified = match path {
        "/stable" => "Mon, 01 Jan 2024 10:00:00 GMT".to_string(),
        "/moving" => format!(
            "Tue, 02 Jan 2024 {:02}:00:00 GMT",
            8 + CYCLE.load(Ordering::SeqCst)
        ),
        _ => {
            return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string();
        }
    };
    format!(
        "HTTP/1.1 200 OK\r\nLast-Modified: {last_modified}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    )
}

async fn serve() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let _ = socket.write_all(respond(&path).as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cycles_against_local_server() {
    let base = serve().await;
    let tmp = TempDir::new().unwrap();
    let storage = Arc::new(LocalStorage::new(tmp.path()));

    let catalog = FeedCatalog::new(vec![
        FeedSource::new("stable", "Stable Co", format!("{base}/stable")),
        FeedSource::new("moving", "Moving Co", format!("{base}/moving")),
        FeedSource::new("missing", "Missing Co", format!("{base}/missing")),
    ]);
    let mut config = Config::default();
    // Lets the second cycle record the change without waiting out the first lease.
    config.lease.ttl_secs = 1;
    let prober = Arc::new(HttpProber::from_config(&config.monitor).unwrap());

    let first = run_dispatch(&config, &catalog, storage.clone(), prober.clone())
        .await
        .unwrap();
    assert_eq!(first.checked, 3);
    assert_eq!(first.first_observations, 2);
    assert_eq!(first.unavailable, 1);
    assert_eq!(first.failed, 0);

    CYCLE.store(1, Ordering::SeqCst);
    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

    let second = run_dispatch(&config, &catalog, storage.clone(), prober)
        .await
        .unwrap();
    assert_eq!(second.unchanged, 1);
    assert_eq!(second.updated, 1);
    assert_eq!(second.unavailable, 1);

    let moving = storage.find_record("moving").await.unwrap().unwrap();
    assert_eq!(moving.refresh_count, 2);
    assert_eq!(moving.bucket_total(), 2);
    assert!(moving.check_invariants().is_ok());

    let stable = storage.find_record("stable").await.unwrap().unwrap();
    assert_eq!(stable.refresh_count, 1);

    assert!(storage.find_record("missing").await.unwrap().is_none());
}
