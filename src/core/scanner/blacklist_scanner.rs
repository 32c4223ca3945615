// src/core/scanner/blacklist_scanner.rs

use async_trait::async_trait;
use futures::future::join_all;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::BlacklistProbeConfig;
use crate::core::data::ScanData;
use crate::core::error::ProbeError;
use crate::core::models::{
    BlacklistData, DnsRecord, ProbeData, ProbeKind, ProbeResult, RecordKind, ZoneOutcome,
    ZoneStatus,
};
use crate::core::net::DnsLookup;
use crate::core::retry::retry;
use crate::core::scanner::{Probe, ProbeContext};
use crate::core::target::Target;

/// How a DNSBL answered one address query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    NotListed,
    /// The return codes, all within 127.0.0.0/8.
    Listed(Vec<Ipv4Addr>),
    /// The zone refused the query or answered outside 127.0.0.0/8.
    ZoneError(String),
    TimedOut,
    Failed(String),
}

/// Checks the target's IPv4 addresses against every configured DNSBL zone.
pub struct BlacklistProbe {
    dns: Arc<dyn DnsLookup>,
    data: Arc<ScanData>,
    config: BlacklistProbeConfig,
}

impl BlacklistProbe {
    pub fn new(dns: Arc<dyn DnsLookup>, data: Arc<ScanData>, config: BlacklistProbeConfig) -> Self {
        Self { dns, data, config }
    }

    async fn addresses(&self, target: &Target, ctx: &ProbeContext) -> Result<Vec<Ipv4Addr>, ProbeError> {
        match target.ip() {
            Some(IpAddr::V4(ip)) => Ok(vec![ip]),
            Some(IpAddr::V6(_)) => Err(ProbeError::Unsupported(
                "DNSBL zones are only queried for IPv4 addresses".into(),
            )),
            None => {
                let records = retry(&ctx.retry, ctx.deadline, "blacklist-a", || {
                    self.dns.lookup(target.host(), RecordKind::A)
                })
                .await?;
                let mut addresses: Vec<Ipv4Addr> =
                    records.iter().filter_map(|r| r.value.parse().ok()).collect();
                addresses.sort();
                addresses.dedup();
                addresses.truncate(self.config.max_addresses);
                Ok(addresses)
            }
        }
    }

    async fn check_zone(&self, zone: &str, addresses: &[Ipv4Addr]) -> ZoneOutcome {
        let budget = Duration::from_millis(self.config.zone_timeout_ms);
        let answers = join_all(addresses.iter().map(|ip| async move {
            let name = reverse_query_name(*ip, zone);
            let answer = match tokio::time::timeout(budget, self.dns.lookup(&name, RecordKind::A)).await {
                Ok(Ok(records)) => classify_answer(&records),
                Ok(Err(ProbeError::TimedOut(_))) | Err(_) => Answer::TimedOut,
                Ok(Err(e)) => Answer::Failed(e.to_string()),
            };
            (*ip, answer)
        }))
        .await;
        let outcome = aggregate_zone(zone, answers);
        debug!(zone, status = %outcome.status, "DNSBL zone checked.");
        outcome
    }
}

#[async_trait]
impl Probe for BlacklistProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Blacklist
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> ProbeResult {
        let start = Instant::now();
        info!(target = %target, "Starting blacklist scan.");

        let addresses = match self.addresses(target, ctx).await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(target = %target, error = %e, "Could not determine addresses to check.");
                return ProbeResult::failed(ProbeKind::Blacklist, e, start.elapsed());
            }
        };
        if addresses.is_empty() {
            return ProbeResult::partial(
                ProbeData::Blacklist(BlacklistData::default()),
                start.elapsed(),
                vec!["no IPv4 addresses to check".to_string()],
            );
        }

        let zones = join_all(
            self.data
                .dnsbl_zones
                .iter()
                .map(|zone| self.check_zone(zone, &addresses)),
        )
        .await;

        if !zones.is_empty() && zones.iter().all(|z| z.status == ZoneStatus::TimedOut) {
            warn!("Every DNSBL zone timed out.");
            return ProbeResult::timed_out(
                ProbeKind::Blacklist,
                start.elapsed(),
                Duration::from_millis(self.config.zone_timeout_ms),
            );
        }

        let warnings = zones
            .iter()
            .filter_map(|z| match z.status {
                ZoneStatus::TimedOut => Some(format!("{} timed out", z.zone)),
                ZoneStatus::Error => Some(format!(
                    "{}: {}",
                    z.zone,
                    z.detail.as_deref().unwrap_or("query failed")
                )),
                _ => None,
            })
            .collect();
        let data = BlacklistData {
            addresses,
            checked: zones.len(),
            listed: zones.iter().filter(|z| z.status == ZoneStatus::Listed).count(),
            zones,
        };
        info!(checked = data.checked, listed = data.listed, "Blacklist scan finished.");
        ProbeResult::partial(ProbeData::Blacklist(data), start.elapsed(), warnings)
    }
}

/// `1.2.0.192.zen.example` for 192.0.2.1.
pub fn reverse_query_name(ip: Ipv4Addr, zone: &str) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{d}.{c}.{b}.{a}.{zone}")
}

/// An empty answer means "not listed". Return codes in 127.255.255.0/24 are
/// the zone's way of refusing a query (typically from a public resolver).
pub fn classify_answer(records: &[DnsRecord]) -> Answer {
    let codes: Vec<Ipv4Addr> = records.iter().filter_map(|r| r.value.parse().ok()).collect();
    if codes.is_empty() {
        return Answer::NotListed;
    }
    if let Some(refusal) = codes.iter().find(|c| matches!(c.octets(), [127, 255, 255, _])) {
        return Answer::ZoneError(format!("query refused ({refusal})"));
    }
    if let Some(bogus) = codes.iter().find(|c| c.octets()[0] != 127) {
        return Answer::ZoneError(format!("unexpected answer {bogus}"));
    }
    Answer::Listed(codes)
}

/// Folds per-address answers into one zone verdict. A listing wins over
/// everything else; otherwise timeouts, then errors, then clean.
pub fn aggregate_zone(zone: &str, answers: Vec<(Ipv4Addr, Answer)>) -> ZoneOutcome {
    let mut outcome = ZoneOutcome {
        zone: zone.to_string(),
        status: ZoneStatus::Clean,
        listed_addresses: Vec::new(),
        detail: None,
    };
    let mut timed_out = false;
    let mut error = None;

    for (ip, answer) in answers {
        match answer {
            Answer::NotListed => {}
            Answer::Listed(codes) => {
                outcome.listed_addresses.push(ip);
                outcome.detail.get_or_insert_with(|| {
                    codes.iter().map(Ipv4Addr::to_string).collect::<Vec<_>>().join(", ")
                });
            }
            Answer::ZoneError(detail) | Answer::Failed(detail) => {
                error.get_or_insert(detail);
            }
            Answer::TimedOut => timed_out = true,
        }
    }

    outcome.status = if !outcome.listed_addresses.is_empty() {
        ZoneStatus::Listed
    } else if timed_out {
        ZoneStatus::TimedOut
    } else if let Some(detail) = error {
        outcome.detail = Some(detail);
        ZoneStatus::Error
    } else {
        ZoneStatus::Clean
    };
    outcome
}
