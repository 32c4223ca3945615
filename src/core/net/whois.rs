// src/core/net/whois.rs

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::core::cache::TtlCache;
use crate::core::error::ProbeError;

/// One WHOIS request/response exchange.
#[async_trait]
pub trait WhoisTransport: Send + Sync {
    async fn query(&self, server: &str, query: &str) -> Result<String, ProbeError>;
}

/// Plain port-43 WHOIS over TCP: send the query line, read until the server
/// closes the connection or the size cap is reached.
pub struct TcpWhois {
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_response_bytes: usize,
}

impl TcpWhois {
    pub fn new(
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
        max_response_bytes: usize,
    ) -> Self {
        Self {
            port,
            connect_timeout,
            read_timeout,
            max_response_bytes,
        }
    }
}

#[async_trait]
impl WhoisTransport for TcpWhois {
    async fn query(&self, server: &str, query: &str) -> Result<String, ProbeError> {
        debug!(server, query, "Opening WHOIS session.");
        let mut stream = timeout(self.connect_timeout, TcpStream::connect((server, self.port)))
            .await
            .map_err(|_| ProbeError::Network(format!("connect to {server} timed out")))?
            .map_err(|e| ProbeError::Network(format!("connect to {server}: {e}")))?;

        stream
            .write_all(format!("{query}\r\n").as_bytes())
            .await
            .map_err(|e| ProbeError::Network(format!("write to {server}: {e}")))?;

        let mut response = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let read = timeout(self.read_timeout, stream.read(&mut buf))
                .await
                .map_err(|_| {
                    ProbeError::TimedOut(
                        u64::try_from(self.read_timeout.as_millis()).unwrap_or(u64::MAX),
                    )
                })?
                .map_err(|e| ProbeError::Network(format!("read from {server}: {e}")))?;
            if read == 0 {
                break;
            }
            response.extend_from_slice(&buf[..read]);
            if response.len() >= self.max_response_bytes {
                warn!(server, bytes = response.len(), "WHOIS response hit the size cap.");
                response.truncate(self.max_response_bytes);
                break;
            }
        }

        Ok(String::from_utf8_lossy(&response).into_owned())
    }
}

/// Puts a [`TtlCache`] in front of another [`WhoisTransport`].
pub struct CachedWhois {
    inner: Arc<dyn WhoisTransport>,
    cache: Arc<TtlCache<String>>,
    ttl: Duration,
}

impl CachedWhois {
    pub fn new(inner: Arc<dyn WhoisTransport>, cache: Arc<TtlCache<String>>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    pub fn cache_key(server: &str, query: &str) -> String {
        format!(
            "whois:{}:{}",
            server.to_ascii_lowercase(),
            query.to_ascii_lowercase()
        )
    }
}

#[async_trait]
impl WhoisTransport for CachedWhois {
    async fn query(&self, server: &str, query: &str) -> Result<String, ProbeError> {
        let key = Self::cache_key(server, query);
        self.cache
            .get_or_fetch(&key, |_| self.ttl, || self.inner.query(server, query))
            .await
            .map(|(text, _)| text)
    }
}
