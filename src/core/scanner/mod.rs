// src/core/scanner/mod.rs

// This file acts as the public interface for the `scanner` module.
// Each sub-module implements one probe; `default_probes` wires them all to
// the shared network seams.

pub mod blacklist_scanner;
pub mod content_scanner;
pub mod dns_scanner;
pub mod fingerprint_scanner;
pub mod headers_scanner;
pub mod ssl_scanner;
pub mod whois_scanner;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Config;
use crate::core::clock::Clock;
use crate::core::data::ScanData;
use crate::core::models::{ProbeKind, ProbeResult};
use crate::core::net::{DnsLookup, SharedHomepage, WhoisTransport};
use crate::core::retry::RetryPolicy;
use crate::core::target::Target;

use self::blacklist_scanner::BlacklistProbe;
use self::content_scanner::ContentProbe;
use self::dns_scanner::DnsProbe;
use self::fingerprint_scanner::FingerprintProbe;
use self::headers_scanner::HeadersProbe;
use self::ssl_scanner::TlsProbe;
use self::whois_scanner::WhoisProbe;

/// Per-run limits handed to a probe by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    /// Hard stop for the whole scan. Retries never sleep past it.
    pub deadline: Instant,
    /// This probe's budget, already capped by `deadline`.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ProbeContext {
    pub fn new(deadline: Instant, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            deadline,
            timeout,
            retry,
        }
    }

    /// The earlier of the scan deadline and this probe's own budget.
    pub fn probe_deadline(&self, started: Instant) -> Instant {
        (started + self.timeout).min(self.deadline)
    }
}

/// One signal collector.
///
/// `run` never fails: every problem is classified into the returned
/// [`ProbeResult`]. Timeouts and panics are handled by the orchestrator.
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> ProbeResult;
}

/// Shared collaborators the probes are built from.
#[derive(Clone)]
pub struct ProbeDeps {
    pub dns: Arc<dyn DnsLookup>,
    pub whois: Arc<dyn WhoisTransport>,
    pub homepage: Arc<SharedHomepage>,
    pub data: Arc<ScanData>,
    pub clock: Arc<dyn Clock>,
}

/// The full probe set in report order.
pub fn default_probes(config: &Config, deps: &ProbeDeps) -> Vec<Arc<dyn Probe>> {
    let probes = &config.probes;
    vec![
        Arc::new(DnsProbe::new(
            deps.dns.clone(),
            deps.data.clone(),
            probes.dns.clone(),
        )),
        Arc::new(WhoisProbe::new(
            deps.whois.clone(),
            deps.data.clone(),
            deps.clock.clone(),
            probes.whois.follow_referrals,
        )),
        Arc::new(BlacklistProbe::new(
            deps.dns.clone(),
            deps.data.clone(),
            probes.blacklist.clone(),
        )),
        Arc::new(TlsProbe::new(probes.tls.clone(), deps.clock.clone())),
        Arc::new(HeadersProbe::new(
            deps.homepage.clone(),
            probes.headers.required.clone(),
        )),
        Arc::new(FingerprintProbe::new(
            deps.homepage.clone(),
            deps.dns.clone(),
            deps.data.clone(),
        )),
        Arc::new(ContentProbe::new(deps.homepage.clone())),
    ]
}
