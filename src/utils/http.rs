// src/utils/http.rs

//! HTTP client utilities and the `Last-Modified` prober.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::LAST_MODIFIED;
use reqwest::redirect::Policy;

use crate::error::Result;
use crate::models::MonitorConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &MonitorConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .redirect(Policy::limited(config.max_redirects))
        .build()?;
    Ok(client)
}

/// Source of raw `Last-Modified` values.
///
/// Implementations never fail: every reason the value is unavailable
/// collapses to `None`.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn last_modified(&self, url: &str) -> Option<String>;
}

/// Probes feeds with a header-only `HEAD` request.
#[derive(Clone)]
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        Ok(Self::new(create_async_client(config)?))
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn last_modified(&self, url: &str) -> Option<String> {
        let response = match self.client.head(url).send().await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("HEAD {} failed: {}", url, e);
                return None;
            }
        };

        let status = response.status();
        let value = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        if value.is_none() {
            log::debug!("HEAD {} returned {} without Last-Modified", url, status);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 responder; `route` maps a request path to a raw response.
    async fn serve(route: fn(&str) -> String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let _ = socket.write_all(route(&path).as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{addr}")
    }

    fn prober(timeout_secs: u64) -> HttpProber {
        let config = MonitorConfig {
            timeout_secs,
            ..MonitorConfig::default()
        };
        HttpProber::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_reads_last_modified() {
        let base = serve(|_| {
            "HTTP/1.1 200 OK\r\nLast-Modified: Wed, 21 Oct 2015 07:28:00 GMT\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
        })
        .await;

        let value = prober(5).last_modified(&format!("{base}/feed.xml")).await;
        assert_eq!(value.as_deref(), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
    }

    #[tokio::test]
    async fn test_follows_redirects() {
        let base = serve(|path| {
            if path == "/old.xml" {
                "HTTP/1.1 301 Moved Permanently\r\nLocation: /new.xml\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
            } else {
                "HTTP/1.1 200 OK\r\nLast-Modified: Thu, 01 Feb 2024 12:00:00 GMT\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
            }
        })
        .await;

        let value = prober(5).last_modified(&format!("{base}/old.xml")).await;
        assert_eq!(value.as_deref(), Some("Thu, 01 Feb 2024 12:00:00 GMT"));
    }

    #[tokio::test]
    async fn test_not_found_without_header_is_none() {
        let base = serve(|_| {
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
        })
        .await;

        assert_eq!(prober(5).last_modified(&format!("{base}/gone.xml")).await, None);
    }

    #[tokio::test]
    async fn test_connection_refused_is_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert_eq!(prober(5).last_modified(&format!("http://{addr}/")).await, None);
    }

    #[tokio::test]
    async fn test_timeout_is_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without answering.
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(10)).await;
                drop(socket);
            }
        });

        assert_eq!(prober(1).last_modified(&format!("http://{addr}/slow")).await, None);
    }
}
