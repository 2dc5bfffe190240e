//! Poll source backed by the load balancer's REST API.
//!
//! ## Endpoints
//!
//! - `GET /stats`: fleet counters plus one record per server
//! - `GET /servers`: server listing, carrying `weight` and `hostname`
//! - `GET /algorithm/{name}`: switch the routing algorithm
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use fleetwatch::{HttpSource, PollSource};
//!
//! # tokio_test::block_on(async {
//! let source = HttpSource::builder("http://localhost:5000")
//!     .timeout(Duration::from_secs(2))
//!     .merge_servers(true)
//!     .build()?;
//!
//! let batch = source.fetch().await?;
//! for server in &batch.entities {
//!     println!("{}: {:?}% cpu", server.name, server.cpu_usage);
//! }
//! # Ok::<(), fleetwatch::SyncError>(())
//! # });
//! ```

use std::time::Duration;

use async_trait::async_trait;
use fleetwatch_types::{Algorithm, AlgorithmResponse};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{decode_servers, decode_stats, merge_listing, PollBatch, PollSource};
use crate::error::SyncError;

/// Default backend address.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000";

/// HTTP poll source.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    endpoint: String,
    merge_servers: bool,
    description: String,
}

impl HttpSource {
    /// Create a new builder for the given base URL.
    pub fn builder(endpoint: impl Into<String>) -> HttpSourceBuilder {
        HttpSourceBuilder {
            endpoint: endpoint.into(),
            ..HttpSourceBuilder::default()
        }
    }

    /// Base URL without a trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let url = format!("{}{}", self.endpoint, path);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(SyncError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Parse(e.to_string()))
    }
}

#[async_trait]
impl PollSource for HttpSource {
    async fn fetch(&self) -> Result<PollBatch, SyncError> {
        let stats: Value = self.get("/stats").await?;
        let mut batch = decode_stats(stats)?;

        if self.merge_servers {
            // The listing only adds detail; a failure here keeps the /stats data
            match self.get::<Value>("/servers").await.and_then(decode_servers) {
                Ok((listing, dropped)) => {
                    batch.dropped += dropped;
                    merge_listing(&mut batch.entities, listing);
                }
                Err(e) => warn!("Failed to fetch server listing from {}: {}", self.endpoint, e),
            }
        }

        debug!(
            "Fetched {} servers from {} ({} dropped)",
            batch.entities.len(),
            self.endpoint,
            batch.dropped
        );
        Ok(batch)
    }

    async fn set_algorithm(&self, algorithm: Algorithm) -> Result<String, SyncError> {
        let response: AlgorithmResponse = self.get(&format!("/algorithm/{}", algorithm)).await?;

        if response.success {
            Ok(response
                .current_algorithm
                .unwrap_or_else(|| algorithm.to_string()))
        } else {
            Err(SyncError::Rejected(
                response
                    .error
                    .or(response.message)
                    .unwrap_or_else(|| format!("backend refused {}", algorithm)),
            ))
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Builder for [`HttpSource`].
#[derive(Debug, Default)]
pub struct HttpSourceBuilder {
    endpoint: String,
    timeout: Option<Duration>,
    merge_servers: Option<bool>,
}

impl HttpSourceBuilder {
    /// Set the per-request timeout (default: 2 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Also fetch `/servers` on every poll (default: true).
    pub fn merge_servers(mut self, merge: bool) -> Self {
        self.merge_servers = Some(merge);
        self
    }

    /// Build the source.
    pub fn build(self) -> Result<HttpSource, SyncError> {
        let timeout = self.timeout.unwrap_or(Duration::from_secs(2));
        let client = Client::builder().timeout(timeout).build()?;

        let endpoint = if self.endpoint.trim().is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            self.endpoint.trim().trim_end_matches('/').to_string()
        };

        Ok(HttpSource {
            client,
            description: format!("http: {}", endpoint),
            endpoint,
            merge_servers: self.merge_servers.unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 peer answering `(path, status, body)` routes.
    async fn serve(routes: Vec<(&'static str, u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = routes
                    .iter()
                    .find(|(p, _, _)| *p == path)
                    .map(|(_, s, b)| (*s, b.clone()))
                    .unwrap_or((404, "{}".to_string()));
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}", addr)
    }

    #[test]
    fn test_builder_defaults() {
        let source = HttpSource::builder("").build().unwrap();
        assert_eq!(source.endpoint(), DEFAULT_ENDPOINT);
        assert!(source.merge_servers);
        assert_eq!(source.description(), "http: http://localhost:5000");
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let source = HttpSource::builder("http://lb.local:8080/")
            .merge_servers(false)
            .build()
            .unwrap();
        assert_eq!(source.endpoint(), "http://lb.local:8080");
        assert!(!source.merge_servers);
    }

    #[tokio::test]
    async fn test_fetch_merges_listing() {
        let endpoint = serve(vec![
            (
                "/stats",
                200,
                r#"{"total_requests": 40, "algorithm": "round_robin",
                    "server_stats": [{"name": "s1", "cpu_usage": 20.0}, {"bad": true}]}"#
                    .to_string(),
            ),
            (
                "/servers",
                200,
                r#"{"servers": [{"name": "s1", "weight": 3}, {"name": "s2", "healthy": false}]}"#
                    .to_string(),
            ),
        ])
        .await;

        let source = HttpSource::builder(endpoint).build().unwrap();
        let batch = source.fetch().await.unwrap();

        assert_eq!(batch.dropped, 1);
        assert_eq!(batch.summary.total_requests, Some(40));
        assert_eq!(batch.entities.len(), 2);
        assert_eq!(batch.entities[0].weight, Some(3));
        assert_eq!(batch.entities[0].cpu_usage, Some(20.0));
        assert_eq!(batch.entities[1].healthy, Some(false));
    }

    #[tokio::test]
    async fn test_listing_failure_keeps_stats() {
        let endpoint = serve(vec![(
            "/stats",
            200,
            r#"{"server_stats": [{"name": "s1"}]}"#.to_string(),
        )])
        .await;

        let source = HttpSource::builder(endpoint).build().unwrap();
        let batch = source.fetch().await.unwrap();
        assert_eq!(batch.entities.len(), 1);
    }

    #[tokio::test]
    async fn test_error_status() {
        let endpoint = serve(vec![("/stats", 503, "{}".to_string())]).await;
        let source = HttpSource::builder(endpoint).build().unwrap();

        match source.fetch().await {
            Err(SyncError::Status { status, url }) => {
                assert_eq!(status, 503);
                assert!(url.ends_with("/stats"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = HttpSource::builder(format!("http://{}", addr)).build().unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_set_algorithm() {
        let endpoint = serve(vec![
            (
                "/algorithm/least_connections",
                200,
                r#"{"success": true, "current_algorithm": "least_connections"}"#.to_string(),
            ),
            (
                "/algorithm/random",
                200,
                r#"{"success": false, "error": "disabled"}"#.to_string(),
            ),
        ])
        .await;
        let source = HttpSource::builder(endpoint).build().unwrap();

        let active = source
            .set_algorithm(Algorithm::LeastConnections)
            .await
            .unwrap();
        assert_eq!(active, "least_connections");

        match source.set_algorithm(Algorithm::Random).await {
            Err(SyncError::Rejected(reason)) => assert_eq!(reason, "disabled"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
