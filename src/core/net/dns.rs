// src/core/net/dns.rs

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::{system_conf, TokioAsyncResolver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::cache::TtlCache;
use crate::core::error::ProbeError;
use crate::core::models::{DnsRecord, RecordKind};

/// A single-type DNS query. "No such name" and "no records of this type" are
/// both `Ok(vec![])`; only transport problems are errors.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup(&self, name: &str, kind: RecordKind) -> Result<Vec<DnsRecord>, ProbeError>;
}

/// Production resolver backed by hickory, using the system configuration
/// when it can be read.
pub struct HickoryLookup {
    resolver: TokioAsyncResolver,
    query_timeout: Duration,
}

impl HickoryLookup {
    pub fn new(query_timeout: Duration) -> Self {
        let (config, mut opts) = match system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                warn!(error = %e, "Could not read system resolver config, using defaults.");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.timeout = query_timeout;
        opts.attempts = 1;
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            query_timeout,
        }
    }
}

fn record_type(kind: RecordKind) -> RecordType {
    match kind {
        RecordKind::A => RecordType::A,
        RecordKind::Aaaa => RecordType::AAAA,
        RecordKind::Mx => RecordType::MX,
        RecordKind::Txt => RecordType::TXT,
        RecordKind::Ns => RecordType::NS,
        RecordKind::Cname => RecordType::CNAME,
        RecordKind::Soa => RecordType::SOA,
        RecordKind::Caa => RecordType::CAA,
        RecordKind::Srv => RecordType::SRV,
    }
}

/// TXT strings are joined without separators so an SPF record split across
/// several character-strings reads as one value.
fn rdata_value(rdata: &RData) -> String {
    match rdata {
        RData::TXT(txt) => txt
            .txt_data()
            .iter()
            .map(|part| String::from_utf8_lossy(part))
            .collect(),
        other => other.to_string().trim_end_matches('.').to_string(),
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn lookup(&self, name: &str, kind: RecordKind) -> Result<Vec<DnsRecord>, ProbeError> {
        let fqdn = format!("{}.", name.trim_end_matches('.'));
        let wanted = record_type(kind);
        debug!(name, %kind, "Querying DNS.");

        match self.resolver.lookup(fqdn.as_str(), wanted).await {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter(|record| record.record_type() == wanted)
                .filter_map(|record| {
                    record.data().map(|rdata| DnsRecord {
                        name: name.to_string(),
                        record_type: kind,
                        value: rdata_value(rdata),
                        ttl: record.ttl(),
                    })
                })
                .collect()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                ResolveErrorKind::Timeout => {
                    debug!(name, %kind, "DNS query timed out.");
                    Err(ProbeError::TimedOut(
                        u64::try_from(self.query_timeout.as_millis()).unwrap_or(u64::MAX),
                    ))
                }
                _ => Err(ProbeError::Network(format!("{kind} lookup for {name}: {e}"))),
            },
        }
    }
}

/// Puts a [`TtlCache`] in front of another [`DnsLookup`].
///
/// An answer is kept for the smallest record TTL, clamped between `floor`
/// and `ceiling`. Empty answers are kept for `floor`.
pub struct CachedLookup {
    inner: Arc<dyn DnsLookup>,
    cache: Arc<TtlCache<Vec<DnsRecord>>>,
    floor: Duration,
    ceiling: Duration,
}

impl CachedLookup {
    pub fn new(
        inner: Arc<dyn DnsLookup>,
        cache: Arc<TtlCache<Vec<DnsRecord>>>,
        floor: Duration,
        ceiling: Duration,
    ) -> Self {
        Self {
            inner,
            cache,
            floor: floor.min(ceiling),
            ceiling,
        }
    }

    pub fn cache_key(name: &str, kind: RecordKind) -> String {
        format!("dns:{kind}:{}", name.trim_end_matches('.').to_ascii_lowercase())
    }

    fn ttl_for(&self, records: &[DnsRecord]) -> Duration {
        records
            .iter()
            .map(|r| Duration::from_secs(u64::from(r.ttl)))
            .min()
            .map(|ttl| ttl.clamp(self.floor, self.ceiling))
            .unwrap_or(self.floor)
    }
}

#[async_trait]
impl DnsLookup for CachedLookup {
    async fn lookup(&self, name: &str, kind: RecordKind) -> Result<Vec<DnsRecord>, ProbeError> {
        let key = Self::cache_key(name, kind);
        self.cache
            .get_or_fetch(&key, |records| self.ttl_for(records), || self.inner.lookup(name, kind))
            .await
            .map(|(records, _)| records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLookup {
        calls: AtomicUsize,
        ttl: u32,
    }

    #[async_trait]
    impl DnsLookup for CountingLookup {
        async fn lookup(&self, name: &str, kind: RecordKind) -> Result<Vec<DnsRecord>, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if kind == RecordKind::Caa {
                return Ok(Vec::new());
            }
            Ok(vec![DnsRecord {
                name: name.to_string(),
                record_type: kind,
                value: "192.0.2.1".into(),
                ttl: self.ttl,
            }])
        }
    }

    fn cached(ttl: u32) -> (CachedLookup, Arc<CountingLookup>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let inner = Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
            ttl,
        });
        let lookup = CachedLookup::new(
            inner.clone(),
            Arc::new(TtlCache::new("dns", clock.clone())),
            Duration::from_secs(30),
            Duration::from_secs(300),
        );
        (lookup, inner, clock)
    }

    #[tokio::test]
    async fn record_ttl_is_clamped_to_floor() {
        let (lookup, inner, clock) = cached(5);
        lookup.lookup("example.com", RecordKind::A).await.unwrap();
        clock.advance(Duration::from_secs(20));
        lookup.lookup("example.com", RecordKind::A).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        clock.advance(Duration::from_secs(10));
        lookup.lookup("example.com", RecordKind::A).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn record_ttl_is_clamped_to_ceiling() {
        let (lookup, inner, clock) = cached(86_400);
        lookup.lookup("example.com", RecordKind::Mx).await.unwrap();
        clock.advance(Duration::from_secs(301));
        lookup.lookup("example.com", RecordKind::Mx).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_answers_are_cached() {
        let (lookup, inner, _) = cached(60);
        assert!(lookup.lookup("example.com", RecordKind::Caa).await.unwrap().is_empty());
        assert!(lookup.lookup("Example.COM.", RecordKind::Caa).await.unwrap().is_empty());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
