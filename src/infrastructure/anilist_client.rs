//! AniList GraphQL catalog client
//!
//! One POST per lookup, rate limited client-side with a token bucket so a
//! page full of entries cannot exceed the service's per-minute budget.

#![allow(clippy::uninlined_format_args)]

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::catalog_client::CatalogClient;
use super::config::CatalogConfig;
use crate::domain::{CatalogRecord, LookupFailure};

const SEARCH_QUERY: &str = r"
query searchMedia($search: String, $type: MediaType) {
  Media(search: $search, type: $type) {
    id
    title {
      english
      native
      romaji
    }
    siteUrl
  }
}
";

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<MediaData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct MediaData {
    #[serde(rename = "Media")]
    media: Option<CatalogRecord>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    status: Option<u16>,
}

/// Catalog client for the AniList GraphQL API
#[derive(Clone)]
pub struct AniListClient {
    client: Client,
    config: CatalogConfig,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl AniListClient {
    /// Create a new client from catalog configuration
    pub fn with_config(config: CatalogConfig) -> Result<Self, LookupFailure> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| LookupFailure::transport("", format!("Failed to create HTTP client: {}", e)))?;

        let limiter = NonZeroU32::new(config.max_requests_per_minute)
            .map(|per_minute| Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))));

        info!(
            "🌐 AniListClient ready: endpoint={}, timeout={}s, rate_limit={}/min",
            config.endpoint, config.request_timeout_seconds, config.max_requests_per_minute
        );

        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    fn request_body(&self, query: &str) -> serde_json::Value {
        json!({
            "query": SEARCH_QUERY,
            "variables": {
                "search": query,
                "type": self.config.media_type,
            }
        })
    }

    fn map_send_error(&self, query: &str, error: &reqwest::Error) -> LookupFailure {
        if error.is_timeout() {
            LookupFailure::Timeout {
                query: query.to_string(),
                timeout_seconds: self.config.request_timeout_seconds,
            }
        } else {
            LookupFailure::transport(query, error)
        }
    }
}

/// Map a GraphQL response to a lookup outcome
///
/// AniList answers "no match" with HTTP 404 and an error entry whose status is
/// 404; a null `Media` means the same thing.
fn interpret_response(
    query: &str,
    status: StatusCode,
    body: &str,
) -> Result<CatalogRecord, LookupFailure> {
    let parsed: Result<GraphQlResponse, _> = serde_json::from_str(body);

    if status == StatusCode::NOT_FOUND {
        return Err(LookupFailure::no_match(query));
    }

    let response = match parsed {
        Ok(response) => response,
        Err(e) if status.is_success() => return Err(LookupFailure::malformed(query, e)),
        Err(_) => return Err(LookupFailure::service(query, status.as_u16(), status)),
    };

    if let Some(error) = response.errors.first() {
        if error.status == Some(404) {
            return Err(LookupFailure::no_match(query));
        }
        let code = error.status.unwrap_or_else(|| status.as_u16());
        return Err(LookupFailure::service(query, code, &error.message));
    }

    if !status.is_success() {
        return Err(LookupFailure::service(query, status.as_u16(), status));
    }

    response
        .data
        .and_then(|data| data.media)
        .ok_or_else(|| LookupFailure::no_match(query))
}

#[async_trait]
impl CatalogClient for AniListClient {
    async fn search(&self, query: &str) -> Result<CatalogRecord, LookupFailure> {
        if query.trim().is_empty() {
            return Err(LookupFailure::EmptyQuery);
        }

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        debug!("🔎 AniList search: \"{}\"", query);
        let response = self
            .client
            .post(&self.config.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&self.request_body(query))
            .send()
            .await
            .map_err(|e| self.map_send_error(query, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_send_error(query, &e))?;

        let outcome = interpret_response(query, status, &body);
        match &outcome {
            Ok(record) => debug!("AniList matched \"{}\" -> {} ({})", query, record.id, record.site_url),
            Err(e) if e.is_no_match() => debug!("AniList has no match for \"{}\"", query),
            Err(e) => warn!("AniList lookup failed for \"{}\": {}", query, e),
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "anilist"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const FOUND: &str = r#"{"data":{"Media":{"id":154587,"title":{"english":"Frieren: Beyond Journey's End","native":"葬送のフリーレン","romaji":"Sousou no Frieren"},"siteUrl":"https://anilist.co/anime/154587"}}}"#;
    const NOT_FOUND: &str = r#"{"errors":[{"message":"Not Found.","status":404,"locations":[{"line":2,"column":3}]}],"data":{"Media":null}}"#;

    #[test]
    fn test_interpret_match() {
        let record = interpret_response("frieren", StatusCode::OK, FOUND).unwrap();
        assert_eq!(record.id, 154_587);
        assert_eq!(record.title.romaji.as_deref(), Some("Sousou no Frieren"));
        assert_eq!(record.site_url, "https://anilist.co/anime/154587");
    }

    #[test]
    fn test_interpret_no_match() {
        let failure = interpret_response("Unknown Show", StatusCode::NOT_FOUND, NOT_FOUND).unwrap_err();
        assert_eq!(failure, LookupFailure::no_match("Unknown Show"));

        let null_media = interpret_response("x", StatusCode::OK, r#"{"data":{"Media":null}}"#).unwrap_err();
        assert!(null_media.is_no_match());
    }

    #[test]
    fn test_interpret_service_errors() {
        let limited = interpret_response(
            "x",
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"errors":[{"message":"Too Many Requests.","status":429}],"data":null}"#,
        )
        .unwrap_err();
        assert!(matches!(limited, LookupFailure::Service { status: 429, .. }));
        assert!(limited.is_recoverable());

        let gateway = interpret_response("x", StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(gateway, LookupFailure::Service { status: 502, .. }));

        let garbage = interpret_response("x", StatusCode::OK, "not json").unwrap_err();
        assert!(matches!(garbage, LookupFailure::Malformed { .. }));
    }

    /// Serve one canned HTTP response and hand back the request that was received
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + content_length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "{}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });
        (endpoint, handle)
    }

    fn test_config(endpoint: String) -> CatalogConfig {
        CatalogConfig {
            endpoint,
            max_requests_per_minute: 0,
            request_timeout_seconds: 5,
            ..CatalogConfig::default()
        }
    }

    #[tokio::test]
    async fn test_search_posts_graphql_variables() {
        let (endpoint, server) = serve_once("HTTP/1.1 200 OK", FOUND).await;
        let client = AniListClient::with_config(test_config(endpoint)).unwrap();

        let record = client.search("Frieren").await.unwrap();
        assert_eq!(record.id, 154_587);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST / HTTP/1.1"));
        assert!(request.contains(r#""search":"Frieren""#));
        assert!(request.contains(r#""type":"ANIME""#));
    }

    #[tokio::test]
    async fn test_search_maps_404_to_no_match() {
        let (endpoint, server) = serve_once("HTTP/1.1 404 Not Found", NOT_FOUND).await;
        let client = AniListClient::with_config(test_config(endpoint)).unwrap();

        let failure = client.search("Unknown Show").await.unwrap_err();
        assert!(failure.is_no_match());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_query_skips_network() {
        let client = AniListClient::with_config(test_config("http://127.0.0.1:9/".to_string())).unwrap();
        assert_eq!(client.search("   ").await.unwrap_err(), LookupFailure::EmptyQuery);
    }
}
