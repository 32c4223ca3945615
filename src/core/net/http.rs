// src/core/net/http.rs

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::cache::TtlCache;
use crate::core::error::{Error, ProbeError, Result};
use crate::core::retry::{retry, RetryPolicy};

/// A fully read HTTP response, detached from the client that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSnapshot {
    pub requested_url: String,
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    /// Header names are lowercase. Repeated headers appear once per value.
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Full size of the body as received. Only the first `max_body_bytes`
    /// are kept in `body`; the rest is read and counted, then discarded.
    pub body_bytes: usize,
    pub truncated: bool,
    pub elapsed_ms: u64,
}

impl HttpSnapshot {
    /// First value of `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_https(&self) -> bool {
        self.final_url.starts_with("https://")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str) -> std::result::Result<HttpSnapshot, ProbeError>;
}

/// reqwest-backed fetcher with a body size cap.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl ReqwestFetcher {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        max_redirects: usize,
        max_body_bytes: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout,
            max_body_bytes,
        })
    }

    fn classify(&self, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::TimedOut(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
        } else {
            ProbeError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str) -> std::result::Result<HttpSnapshot, ProbeError> {
        debug!(url, "GET");
        let start = Instant::now();
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        // The client timeout bounds how long an oversized body is drained.
        let mut body = CappedBody::new(self.max_body_bytes);
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            body.push(&chunk);
        }
        if body.truncated() {
            debug!(url, received = body.received(), kept = self.max_body_bytes, "Body truncated.");
        }

        Ok(HttpSnapshot {
            requested_url: url.to_string(),
            final_url,
            status,
            headers,
            body_bytes: body.received(),
            truncated: body.truncated(),
            body: body.into_text(),
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

/// Keeps the first `cap` bytes of a streamed body and counts the rest.
#[derive(Debug)]
pub struct CappedBody {
    kept: Vec<u8>,
    received: usize,
    cap: usize,
}

impl CappedBody {
    pub fn new(cap: usize) -> Self {
        Self {
            kept: Vec::new(),
            received: 0,
            cap,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.received += chunk.len();
        let room = self.cap.saturating_sub(self.kept.len());
        self.kept.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn truncated(&self) -> bool {
        self.received > self.kept.len()
    }

    pub fn into_text(self) -> String {
        String::from_utf8_lossy(&self.kept).into_owned()
    }
}

/// The homepage fetch shared by the header, fingerprint and content probes.
///
/// Tries `https://` first and falls back to `http://`. Successful responses
/// are cached, so the probes of one scan (and later scans within the TTL)
/// issue a single request between them.
pub struct SharedHomepage {
    fetcher: Arc<dyn HttpFetch>,
    cache: Arc<TtlCache<HttpSnapshot>>,
    ttl: Duration,
}

impl SharedHomepage {
    pub fn new(fetcher: Arc<dyn HttpFetch>, cache: Arc<TtlCache<HttpSnapshot>>, ttl: Duration) -> Self {
        Self {
            fetcher,
            cache,
            ttl,
        }
    }

    pub fn cache_key(host: &str) -> String {
        format!("http:GET:{host}/")
    }

    pub async fn fetch(
        &self,
        host: &str,
        policy: &RetryPolicy,
        deadline: tokio::time::Instant,
    ) -> std::result::Result<HttpSnapshot, ProbeError> {
        let key = Self::cache_key(host);
        let (snapshot, hit) = self
            .cache
            .get_or_fetch(
                &key,
                |_| self.ttl,
                || retry(policy, deadline, "homepage", || self.fetch_once(host)),
            )
            .await?;
        if hit {
            debug!(host, "Homepage served from cache.");
        }
        Ok(snapshot)
    }

    async fn fetch_once(&self, host: &str) -> std::result::Result<HttpSnapshot, ProbeError> {
        let secure = format!("https://{host}/");
        match self.fetcher.get(&secure).await {
            Ok(snapshot) => {
                info!(url = %secure, status = snapshot.status, "Fetched homepage.");
                Ok(snapshot)
            }
            Err(e) => {
                warn!(url = %secure, error = %e, "HTTPS fetch failed, trying plain HTTP.");
                let plain = format!("http://{host}/");
                self.fetcher.get(&plain).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(url: &str) -> HttpSnapshot {
        HttpSnapshot {
            requested_url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            headers: vec![
                ("server".into(), "nginx".into()),
                ("set-cookie".into(), "a=1".into()),
                ("set-cookie".into(), "b=2".into()),
            ],
            body: "<html></html>".into(),
            body_bytes: 13,
            truncated: false,
            elapsed_ms: 5,
        }
    }

    struct PlainOnly {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpFetch for PlainOnly {
        async fn get(&self, url: &str) -> std::result::Result<HttpSnapshot, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.starts_with("https://") {
                Err(ProbeError::Network("connection refused".into()))
            } else {
                Ok(snapshot(url))
            }
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let snap = snapshot("https://example.com/");
        assert_eq!(snap.header("Server"), Some("nginx"));
        assert_eq!(snap.header_values("set-cookie").count(), 2);
        assert!(snap.is_https());
    }

    #[test]
    fn oversized_bodies_are_counted_in_full() {
        let mut body = CappedBody::new(10);
        body.push(b"0123456");
        body.push(b"789abcdef");
        body.push(&[b'x'; 4096]);
        assert_eq!(body.received(), 16 + 4096);
        assert!(body.truncated());
        assert_eq!(body.into_text(), "0123456789");

        let mut small = CappedBody::new(10);
        small.push(b"<p>hi</p>");
        assert!(!small.truncated());
        assert_eq!(small.received(), 9);
    }

    #[tokio::test]
    async fn falls_back_to_http_and_caches() {
        let fetcher = Arc::new(PlainOnly {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(TtlCache::new("http", Arc::new(ManualClock::default())));
        let homepage = SharedHomepage::new(fetcher.clone(), cache.clone(), Duration::from_secs(60));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

        let first = homepage
            .fetch("example.com", &RetryPolicy::no_retry(), deadline)
            .await
            .unwrap();
        assert_eq!(first.final_url, "http://example.com/");
        assert!(!first.is_https());

        homepage
            .fetch("example.com", &RetryPolicy::no_retry(), deadline)
            .await
            .unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().hits, 1);
    }
}
