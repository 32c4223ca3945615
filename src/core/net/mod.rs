// src/core/net/mod.rs

// Network seams. Every probe talks to the outside world through one of the
// traits declared here, which lets tests swap in fakes and lets the pipeline
// put a TTL cache in front of the expensive calls.

pub mod dns;
pub mod http;
pub mod whois;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::core::cache::TtlCache;
use crate::core::clock::Clock;
use crate::core::models::{CacheStats, DnsRecord};

pub use self::dns::{CachedLookup, DnsLookup, HickoryLookup};
pub use self::http::{HttpFetch, HttpSnapshot, ReqwestFetcher, SharedHomepage};
pub use self::whois::{CachedWhois, TcpWhois, WhoisTransport};

/// The caches shared by every scan run through one pipeline.
#[derive(Debug, Clone)]
pub struct Caches {
    pub dns: Arc<TtlCache<Vec<DnsRecord>>>,
    pub whois: Arc<TtlCache<String>>,
    pub http: Arc<TtlCache<HttpSnapshot>>,
}

impl Caches {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            dns: Arc::new(TtlCache::new("dns", clock.clone())),
            whois: Arc::new(TtlCache::new("whois", clock.clone())),
            http: Arc::new(TtlCache::new("http", clock)),
        }
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        vec![self.dns.stats(), self.whois.stats(), self.http.stats()]
    }

    pub fn spawn_sweepers(&self, interval: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.dns.spawn_sweeper(interval),
            self.whois.spawn_sweeper(interval),
            self.http.spawn_sweeper(interval),
        ]
    }
}

/// Per-scan cache activity: `after - before`, entry counts taken from `after`.
pub fn stats_delta(before: &[CacheStats], after: &[CacheStats]) -> Vec<CacheStats> {
    after
        .iter()
        .map(|now| {
            let earlier = before.iter().find(|b| b.name == now.name);
            CacheStats {
                name: now.name.clone(),
                hits: now.hits - earlier.map_or(0, |b| b.hits.min(now.hits)),
                misses: now.misses - earlier.map_or(0, |b| b.misses.min(now.misses)),
                entries: now.entries,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_subtracts_matching_caches() {
        let before = vec![CacheStats {
            name: "dns".into(),
            hits: 3,
            misses: 4,
            entries: 4,
        }];
        let after = vec![
            CacheStats {
                name: "dns".into(),
                hits: 10,
                misses: 5,
                entries: 5,
            },
            CacheStats {
                name: "whois".into(),
                hits: 0,
                misses: 1,
                entries: 1,
            },
        ];
        let delta = stats_delta(&before, &after);
        assert_eq!(delta[0].hits, 7);
        assert_eq!(delta[0].misses, 1);
        assert_eq!(delta[1].misses, 1);
    }
}
