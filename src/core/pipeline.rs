// src/core/pipeline.rs

//! The scan entry point.
//!
//! `scan` admits the client, validates the target, fans the probes out, and
//! folds the results into an immutable [`ScanReport`]. Only a rejected client
//! or an invalid target produce an error; probe failures are part of the
//! report.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::clock::{Clock, SystemClock};
use crate::core::data::ScanData;
use crate::core::error::Result;
use crate::core::models::{ScanReport, ScanStats};
use crate::core::net::{
    stats_delta, CachedLookup, CachedWhois, Caches, DnsLookup, HickoryLookup, HttpFetch,
    ReqwestFetcher, SharedHomepage, TcpWhois, WhoisTransport,
};
use crate::core::observer::{ScanObserver, TracingObserver};
use crate::core::orchestrator::Orchestrator;
use crate::core::rate_limiter::{InMemoryStore, RateLimitStore, RateLimiter};
use crate::core::recommendations::RecommendationEngine;
use crate::core::scanner::{default_probes, Probe, ProbeDeps};
use crate::core::scoring::Scorer;
use crate::core::target::Target;

pub struct Pipeline {
    data: Arc<ScanData>,
    clock: Arc<dyn Clock>,
    rate_limiter: RateLimiter,
    orchestrator: Orchestrator,
    caches: Caches,
    scorer: Scorer,
    recommender: RecommendationEngine,
    observers: Vec<Arc<dyn ScanObserver>>,
    sweepers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn builder(config: Config, data: ScanData) -> PipelineBuilder {
        PipelineBuilder::new(config, data)
    }

    /// Production wiring: system resolver, reqwest, TCP WHOIS, wall clock.
    pub fn from_config(config: Config, data: ScanData) -> Result<Self> {
        Self::builder(config, data).build()
    }

    /// Runs one scan for `client_id` against `raw_target`.
    ///
    /// # Errors
    /// [`Error::RateLimitExceeded`](crate::Error::RateLimitExceeded) before any
    /// work is done, or [`Error::InvalidTarget`](crate::Error::InvalidTarget)
    /// when the input does not name a host.
    pub async fn scan(&self, client_id: &str, raw_target: &str) -> Result<ScanReport> {
        self.rate_limiter.check(client_id).await?;
        let target = Target::parse(raw_target).inspect_err(|e| {
            warn!(client = client_id, error = %e, code = e.code(), "Rejected scan target.");
        })?;

        let timestamp = self.clock.now();
        let started = Instant::now();
        let cache_before = self.caches.stats();

        let results = self.orchestrator.run(&target).await;

        let evaluations = self.data.rules.evaluate(&results);
        let card = self.scorer.score(&evaluations);
        let recommendations = self.recommender.recommend(&evaluations);
        debug!(
            overall = card.overall,
            grade = %card.grade,
            recommendations = recommendations.len(),
            "Report scored."
        );

        let stats = ScanStats {
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            probe_latency_ms: results
                .iter()
                .map(|(kind, result)| (*kind, result.latency_ms()))
                .collect::<BTreeMap<_, _>>(),
            cache: stats_delta(&cache_before, &self.caches.stats()),
        };
        let report = ScanReport::new(
            target.to_string(),
            timestamp,
            results,
            card.category_scores,
            card.overall,
            card.grade,
            recommendations,
            stats,
        );
        for observer in &self.observers {
            observer.scan_finished(&report);
        }
        Ok(report)
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    pub fn data(&self) -> &ScanData {
        &self.data
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for sweeper in &self.sweepers {
            sweeper.abort();
        }
    }
}

/// Assembles a [`Pipeline`], with every collaborator replaceable.
pub struct PipelineBuilder {
    config: Config,
    data: ScanData,
    clock: Option<Arc<dyn Clock>>,
    rate_limit_store: Option<Arc<dyn RateLimitStore>>,
    observers: Vec<Arc<dyn ScanObserver>>,
    probes: Option<Vec<Arc<dyn Probe>>>,
    overrides: Vec<Arc<dyn Probe>>,
    dns: Option<Arc<dyn DnsLookup>>,
    http: Option<Arc<dyn HttpFetch>>,
    whois: Option<Arc<dyn WhoisTransport>>,
}

impl PipelineBuilder {
    pub fn new(config: Config, data: ScanData) -> Self {
        Self {
            config,
            data,
            clock: None,
            rate_limit_store: None,
            observers: Vec::new(),
            probes: None,
            overrides: Vec::new(),
            dns: None,
            http: None,
            whois: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limit_store = Some(store);
        self
    }

    /// Adds an observer. With none, a [`TracingObserver`] is installed.
    pub fn observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replaces the whole probe set.
    pub fn probes(mut self, probes: Vec<Arc<dyn Probe>>) -> Self {
        self.probes = Some(probes);
        self
    }

    /// Swaps the default probe of the same kind for `probe`.
    pub fn replace_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.overrides.push(probe);
        self
    }

    /// Uncached DNS transport; the pipeline puts its cache in front.
    pub fn dns_lookup(mut self, dns: Arc<dyn DnsLookup>) -> Self {
        self.dns = Some(dns);
        self
    }

    /// Uncached HTTP transport; the pipeline puts its cache in front.
    pub fn http_fetch(mut self, http: Arc<dyn HttpFetch>) -> Self {
        self.http = Some(http);
        self
    }

    /// Uncached WHOIS transport; the pipeline puts its cache in front.
    pub fn whois_transport(mut self, whois: Arc<dyn WhoisTransport>) -> Self {
        self.whois = Some(whois);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let config = self.config;
        config.validate()?;
        let data = Arc::new(self.data);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let caches = Caches::new(clock.clone());
        let cache_cfg = &config.cache;
        let probe_cfg = &config.probes;

        let mut probes = match self.probes {
            Some(probes) => probes,
            None => {
                let dns_transport = self.dns.unwrap_or_else(|| {
                    Arc::new(HickoryLookup::new(Duration::from_millis(
                        probe_cfg.dns.query_timeout_ms,
                    )))
                });
                let whois_transport = self.whois.unwrap_or_else(|| {
                    Arc::new(TcpWhois::new(
                        probe_cfg.whois.port,
                        Duration::from_millis(probe_cfg.whois.connect_timeout_ms),
                        Duration::from_millis(probe_cfg.whois.read_timeout_ms),
                        probe_cfg.whois.max_response_bytes,
                    ))
                });
                let http_transport: Arc<dyn HttpFetch> = match self.http {
                    Some(http) => http,
                    None => Arc::new(ReqwestFetcher::new(
                        &probe_cfg.http.user_agent,
                        Duration::from_millis(probe_cfg.http.request_timeout_ms),
                        probe_cfg.http.max_redirects,
                        probe_cfg.http.max_body_bytes,
                    )?),
                };

                let deps = ProbeDeps {
                    dns: Arc::new(CachedLookup::new(
                        dns_transport,
                        caches.dns.clone(),
                        Duration::from_secs(cache_cfg.dns_min_ttl_secs),
                        Duration::from_secs(cache_cfg.dns_ttl_secs),
                    )),
                    whois: Arc::new(CachedWhois::new(
                        whois_transport,
                        caches.whois.clone(),
                        Duration::from_secs(cache_cfg.whois_ttl_secs),
                    )),
                    homepage: Arc::new(SharedHomepage::new(
                        http_transport,
                        caches.http.clone(),
                        Duration::from_secs(cache_cfg.http_ttl_secs),
                    )),
                    data: data.clone(),
                    clock: clock.clone(),
                };
                default_probes(&config, &deps)
            }
        };
        for replacement in self.overrides {
            match probes.iter_mut().find(|p| p.kind() == replacement.kind()) {
                Some(slot) => *slot = replacement,
                None => probes.push(replacement),
            }
        }

        let sweepers = match tokio::runtime::Handle::try_current() {
            Ok(_) => caches.spawn_sweepers(Duration::from_secs(cache_cfg.sweep_interval_secs)),
            Err(_) => {
                debug!("No async runtime yet, cache sweepers not started.");
                Vec::new()
            }
        };

        let rate_limiter = RateLimiter::new(
            self.rate_limit_store
                .unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            clock.clone(),
            config.rate_limit.max_requests,
            Duration::from_secs(config.rate_limit.window_secs),
        );
        let observers = if self.observers.is_empty() {
            vec![Arc::new(TracingObserver) as Arc<dyn ScanObserver>]
        } else {
            self.observers
        };

        let orchestrator = Orchestrator::new(probes, &config);
        info!(
            probes = ?orchestrator.probe_kinds(),
            rules = data.rules.len(),
            "Pipeline ready."
        );
        Ok(Pipeline {
            scorer: Scorer::new(config.scoring.weights.clone(), config.scoring.grades.clone()),
            recommender: RecommendationEngine::new(),
            data,
            clock,
            rate_limiter,
            orchestrator,
            caches,
            observers,
            sweepers,
        })
    }
}
