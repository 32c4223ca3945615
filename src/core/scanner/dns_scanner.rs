// src/core/scanner/dns_scanner.rs

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::config::DnsProbeConfig;
use crate::core::data::ScanData;
use crate::core::error::ProbeError;
use crate::core::models::{
    DkimRecord, DmarcData, DnsData, DnsRecord, ProbeData, ProbeKind, ProbeResult, RecordKind,
    SpfData, SpfQualifier,
};
use crate::core::net::DnsLookup;
use crate::core::retry::retry;
use crate::core::scanner::{Probe, ProbeContext};
use crate::core::target::Target;

type LookupOutcome = Result<Vec<DnsRecord>, ProbeError>;

/// Collects every common record type plus the email-authentication records
/// (SPF, DMARC, DKIM).
pub struct DnsProbe {
    lookup: Arc<dyn DnsLookup>,
    data: Arc<ScanData>,
    config: DnsProbeConfig,
}

impl DnsProbe {
    pub fn new(lookup: Arc<dyn DnsLookup>, data: Arc<ScanData>, config: DnsProbeConfig) -> Self {
        Self { lookup, data, config }
    }

    /// Names to query for `kind`. Address and alias records belong to the
    /// host itself; mail and zone records live on the registered domain.
    fn names_for(&self, target: &Target, kind: RecordKind) -> Vec<String> {
        let root = target.registrable_domain(&self.data.public_suffixes);
        match kind {
            RecordKind::A | RecordKind::Aaaa | RecordKind::Cname => vec![target.host().to_string()],
            RecordKind::Srv => self
                .config
                .srv_services
                .iter()
                .map(|service| format!("{service}.{root}"))
                .collect(),
            _ => vec![root.to_string()],
        }
    }

    async fn query(&self, name: &str, kind: RecordKind, ctx: &ProbeContext) -> LookupOutcome {
        retry(&ctx.retry, ctx.deadline, "dns", || self.lookup.lookup(name, kind)).await
    }
}

#[async_trait]
impl Probe for DnsProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Dns
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> ProbeResult {
        let start = Instant::now();
        if target.is_ip() {
            return ProbeResult::failed(
                ProbeKind::Dns,
                ProbeError::Unsupported("DNS records require a domain name".into()),
                start.elapsed(),
            );
        }

        let root = target.registrable_domain(&self.data.public_suffixes);
        info!(target = %target, root, "Starting DNS scan.");

        // Execute all DNS lookups concurrently.
        let record_queries: Vec<(RecordKind, String)> = RecordKind::iter()
            .flat_map(|kind| {
                self.names_for(target, kind)
                    .into_iter()
                    .map(move |name| (kind, name))
            })
            .collect();
        let dmarc_name = format!("_dmarc.{root}");
        let dkim_names: Vec<(String, String)> = self
            .config
            .dkim_selectors
            .iter()
            .map(|selector| (selector.clone(), format!("{selector}._domainkey.{root}")))
            .collect();

        let (records, dmarc, dkim) = tokio::join!(
            join_all(
                record_queries
                    .iter()
                    .map(|(kind, name)| async move { (*kind, self.query(name, *kind, ctx).await) })
            ),
            self.query(&dmarc_name, RecordKind::Txt, ctx),
            join_all(dkim_names.iter().map(|(selector, name)| async move {
                (selector.clone(), self.query(name, RecordKind::Txt, ctx).await)
            })),
        );
        debug!("All DNS lookups completed, starting analysis.");

        match assemble_dns(records, dmarc, dkim) {
            Ok((data, warnings)) => {
                info!(
                    record_types = data.records.values().filter(|r| !r.is_empty()).count(),
                    failed_types = data.failed_types.len(),
                    "DNS scan finished."
                );
                ProbeResult::partial(ProbeData::Dns(data), start.elapsed(), warnings)
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Every DNS lookup failed.");
                ProbeResult::failed(ProbeKind::Dns, e, start.elapsed())
            }
        }
    }
}

/// Folds raw lookup outcomes into [`DnsData`].
///
/// A record type counts as failed only when every query for it failed. If
/// all types failed the first error is returned instead of data.
pub fn assemble_dns(
    records: Vec<(RecordKind, LookupOutcome)>,
    dmarc: LookupOutcome,
    dkim: Vec<(String, LookupOutcome)>,
) -> Result<(DnsData, Vec<String>), ProbeError> {
    let mut data = DnsData::default();
    let mut warnings = Vec::new();
    let mut succeeded: BTreeMap<RecordKind, bool> = BTreeMap::new();
    let mut first_error = None;

    for (kind, outcome) in records {
        let ok = succeeded.entry(kind).or_insert(false);
        let bucket = data.records.entry(kind).or_default();
        match outcome {
            Ok(found) => {
                *ok = true;
                bucket.extend(found);
            }
            Err(e) => {
                debug!(%kind, error = %e, "DNS lookup failed.");
                first_error.get_or_insert(e);
            }
        }
    }

    for (kind, ok) in &succeeded {
        if !ok {
            data.failed_types.push(*kind);
            warnings.push(format!("{kind} lookup failed"));
        }
    }
    if !succeeded.is_empty() && data.failed_types.len() == succeeded.len() {
        return Err(first_error.unwrap_or_else(|| ProbeError::Network("no DNS answers".into())));
    }

    data.spf = parse_spf(data.records_of(RecordKind::Txt));
    match dmarc {
        Ok(found) => data.dmarc = parse_dmarc(&found),
        Err(e) => {
            data.dmarc_failed = true;
            warnings.push(format!("DMARC lookup failed: {e}"));
        }
    }
    for (selector, outcome) in dkim {
        match outcome {
            Ok(found) => data.dkim.extend(parse_dkim(&selector, &found)),
            // Most selectors simply do not exist; only transport failures get here.
            Err(e) => {
                debug!(selector, error = %e, "DKIM lookup for this selector failed.");
                data.dkim_failed = true;
            }
        }
    }
    if data.dkim_failed && data.dkim.is_empty() {
        warnings.push("DKIM lookups failed".to_string());
    }
    data.min_ttl = data.records.values().flatten().map(|r| r.ttl).min();
    Ok((data, warnings))
}

/// The SPF record among a domain's TXT records, if any.
pub fn parse_spf(txt: &[DnsRecord]) -> Option<SpfData> {
    txt.iter()
        .map(|r| r.value.trim())
        .find(|v| v.to_ascii_lowercase().starts_with("v=spf1"))
        .map(|record| SpfData {
            record: record.to_string(),
            all_qualifier: spf_all_qualifier(record),
        })
}

/// The qualifier of the terminal `all` mechanism. A bare `all` means `+all`.
pub fn spf_all_qualifier(record: &str) -> Option<SpfQualifier> {
    record
        .split_whitespace()
        .map(str::to_ascii_lowercase)
        .find_map(|term| match term.as_str() {
            "all" | "+all" => Some(SpfQualifier::Pass),
            "-all" => Some(SpfQualifier::Fail),
            "~all" => Some(SpfQualifier::SoftFail),
            "?all" => Some(SpfQualifier::Neutral),
            _ => None,
        })
}

/// The first `v=DMARC1` record and its `p=` tag.
pub fn parse_dmarc(txt: &[DnsRecord]) -> Option<DmarcData> {
    let record = txt
        .iter()
        .map(|r| r.value.trim())
        .find(|v| v.to_ascii_lowercase().starts_with("v=dmarc1"))?;
    let policy = record
        .split(';')
        .filter_map(|tag| tag.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("p"))
        .map(|(_, value)| value.trim().to_ascii_lowercase());
    Some(DmarcData {
        record: record.to_string(),
        policy,
    })
}

/// DKIM key records published under `selector`. A record counts if it
/// declares `v=DKIM1` or carries a public key tag.
pub fn parse_dkim(selector: &str, txt: &[DnsRecord]) -> Vec<DkimRecord> {
    txt.iter()
        .map(|r| r.value.trim())
        .filter(|v| {
            let lower = v.to_ascii_lowercase();
            lower.starts_with("v=dkim1") || lower.contains("p=")
        })
        .map(|record| DkimRecord {
            selector: selector.to_string(),
            record: record.to_string(),
        })
        .collect()
}
