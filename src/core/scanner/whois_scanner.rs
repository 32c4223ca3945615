// src/core/scanner/whois_scanner.rs

//! Registration data over the port-43 WHOIS protocol.
//!
//! WHOIS output has no standard format. Parsing is a best-effort scan for
//! `key: value` lines with a handful of known key spellings per field, plus
//! indented continuation blocks as used by some ccTLD registries.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::data::ScanData;
use crate::core::error::ProbeError;
use crate::core::models::{ProbeData, ProbeKind, ProbeResult, WhoisData};
use crate::core::net::WhoisTransport;
use crate::core::retry::retry;
use crate::core::scanner::{Probe, ProbeContext};
use crate::core::target::Target;

const REGISTRAR_KEYS: &[&str] = &["registrar", "registrar name", "sponsoring registrar"];
const CREATED_KEYS: &[&str] = &[
    "creation date",
    "created",
    "created on",
    "created date",
    "registered on",
    "registered",
    "registration time",
    "domain registration date",
];
const EXPIRES_KEYS: &[&str] = &[
    "registry expiry date",
    "registrar registration expiration date",
    "registry expiration date",
    "expiration date",
    "expiry date",
    "expires",
    "expires on",
    "expire",
    "expiration time",
    "paid-till",
];
const UPDATED_KEYS: &[&str] = &[
    "updated date",
    "last updated",
    "last updated on",
    "last-update",
    "last modified",
    "changed",
    "modified",
];
const NAMESERVER_KEYS: &[&str] = &["name server", "name servers", "nameserver", "nameservers", "nserver"];
const STATUS_KEYS: &[&str] = &["domain status", "status", "state"];
const REFERRAL_KEYS: &[&str] = &["registrar whois server", "whois server", "refer", "whois"];

const NOT_FOUND_MARKERS: &[&str] = &[
    "no match for",
    "no matching record",
    "no data found",
    "no entries found",
    "no object found",
    "domain not found",
    "not found:",
    "is available for registration",
    "status: free",
    "status: available",
];
const RATE_LIMIT_MARKERS: &[&str] = &[
    "limit exceeded",
    "query rate",
    "too many queries",
    "too many requests",
    "exceeded the maximum",
    "quota exceeded",
    "rate limit",
    "try again later",
];

pub struct WhoisProbe {
    transport: Arc<dyn WhoisTransport>,
    data: Arc<ScanData>,
    clock: Arc<dyn Clock>,
    follow_referrals: bool,
}

impl WhoisProbe {
    pub fn new(
        transport: Arc<dyn WhoisTransport>,
        data: Arc<ScanData>,
        clock: Arc<dyn Clock>,
        follow_referrals: bool,
    ) -> Self {
        Self {
            transport,
            data,
            clock,
            follow_referrals,
        }
    }

    async fn ask(&self, server: &str, query: &str, ctx: &ProbeContext) -> Result<String, ProbeError> {
        retry(&ctx.retry, ctx.deadline, "whois", || self.transport.query(server, query)).await
    }
}

#[async_trait]
impl Probe for WhoisProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Whois
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> ProbeResult {
        let start = Instant::now();
        let Some(tld) = target.tld() else {
            return ProbeResult::failed(
                ProbeKind::Whois,
                ProbeError::Unsupported("WHOIS lookups require a domain name".into()),
                start.elapsed(),
            );
        };
        let domain = target.registrable_domain(&self.data.public_suffixes);
        let server = self.data.whois_servers.server_for(tld);
        info!(domain, server, "Starting WHOIS lookup.");

        let text = match self.ask(server, domain, ctx).await {
            Ok(text) => text,
            Err(e) => {
                warn!(server, error = %e, "WHOIS query failed.");
                return ProbeResult::failed(ProbeKind::Whois, e, start.elapsed());
            }
        };

        let now = self.clock.now();
        let (mut data, mut warnings) = parse_whois(server, &text, now);

        if self.follow_referrals && data.registered {
            if let Some(referral) = data.referral.clone().filter(|r| !r.eq_ignore_ascii_case(server)) {
                debug!(referral = %referral, "Following WHOIS referral.");
                match self.ask(&referral, domain, ctx).await {
                    Ok(text) => {
                        let (detail, detail_warnings) = parse_whois(&referral, &text, now);
                        // The fallback server describes the TLD, not the domain.
                        data = if server == self.data.whois_servers.default {
                            detail
                        } else {
                            merge(data, detail, now)
                        };
                        // The referral answer supersedes registry-level gaps.
                        warnings = completeness_warnings(&data);
                        warnings.extend(detail_warnings.into_iter().filter(|w| w.contains("rate")));
                    }
                    Err(e) => {
                        warn!(referral = %referral, error = %e, "WHOIS referral failed.");
                        warnings.push(format!("referral to {referral} failed: {e}"));
                    }
                }
            }
        }

        info!(
            registered = data.registered,
            registrar = ?data.registrar,
            expires = ?data.expires,
            "WHOIS lookup finished."
        );
        ProbeResult::partial(ProbeData::Whois(data), start.elapsed(), warnings)
    }
}

/// Parses one WHOIS response. Returns the data and the reasons it is
/// incomplete, if any.
pub fn parse_whois(server: &str, text: &str, now: DateTime<Utc>) -> (WhoisData, Vec<String>) {
    let mut data = WhoisData {
        server: server.to_string(),
        registered: true,
        ..WhoisData::default()
    };
    // Registries append legal notices after a `>>>` line; markers in them mean nothing.
    let lowered = text.to_ascii_lowercase();
    let head = lowered.split(">>>").next().unwrap_or_default();
    data.rate_limited = RATE_LIMIT_MARKERS.iter().any(|m| head.contains(m));

    // A multi-line block opened by a key with an empty value.
    let mut block: Option<String> = None;
    let mut seen_field = false;

    for raw_line in text.lines() {
        let line = raw_line.trim_end();
        let trimmed = line.trim();
        if trimmed.starts_with(">>>") {
            break;
        }
        if trimmed.is_empty() {
            block = None;
            continue;
        }
        if trimmed.starts_with('%') || trimmed.starts_with('#') {
            continue;
        }

        let indented = line.starts_with(char::is_whitespace);
        if let (true, Some(key)) = (indented, block.as_deref()) {
            if !trimmed.contains(": ") || NAMESERVER_KEYS.contains(&key) {
                seen_field |= apply(&mut data, key, trimmed);
                continue;
            }
        }

        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if value.is_empty() {
            block = Some(key);
            continue;
        }
        block = None;
        seen_field |= apply(&mut data, &key, value);
    }

    if NOT_FOUND_MARKERS.iter().any(|m| head.contains(m)) && data.created.is_none() {
        data.registered = false;
    }
    if !seen_field && data.rate_limited {
        // Nothing usable came back; do not claim the domain is registered.
        data.registered = false;
    }

    finalize(&mut data, now);
    let mut warnings = completeness_warnings(&data);
    if data.rate_limited {
        warnings.push(format!("{server} rate-limited the query"));
    }
    (data, warnings)
}

/// Stores `value` under the field `key` maps to. Returns whether the key was
/// recognized.
fn apply(data: &mut WhoisData, key: &str, value: &str) -> bool {
    if REGISTRAR_KEYS.contains(&key) {
        data.registrar.get_or_insert_with(|| value.to_string());
    } else if CREATED_KEYS.contains(&key) {
        if data.created.is_none() {
            data.created = parse_date(value);
        }
    } else if EXPIRES_KEYS.contains(&key) {
        if data.expires.is_none() {
            data.expires = parse_date(value);
        }
    } else if UPDATED_KEYS.contains(&key) {
        if data.updated.is_none() {
            data.updated = parse_date(value);
        }
    } else if NAMESERVER_KEYS.contains(&key) {
        for ns in value.split_whitespace().take(1) {
            let ns = ns.trim_end_matches('.').to_ascii_lowercase();
            if !ns.is_empty() && !data.name_servers.contains(&ns) {
                data.name_servers.push(ns);
            }
        }
    } else if STATUS_KEYS.contains(&key) {
        if let Some(status) = value.split_whitespace().next() {
            if !data.statuses.iter().any(|s| s == status) {
                data.statuses.push(status.to_string());
            }
        }
    } else if REFERRAL_KEYS.contains(&key) {
        if data.referral.is_none() {
            let server = value
                .trim_start_matches("rwhois://")
                .trim_start_matches("whois://")
                .split([':', '/'])
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if server.contains('.') {
                data.referral = Some(server);
            }
        }
    } else {
        return false;
    }
    true
}

fn finalize(data: &mut WhoisData, now: DateTime<Utc>) {
    data.age_days = data.created.map(|created| (now - created).num_days());
    data.days_until_expiry = data.expires.map(|expires| (expires - now).num_days());
}

fn completeness_warnings(data: &WhoisData) -> Vec<String> {
    if !data.registered {
        return Vec::new();
    }
    let mut warnings = Vec::new();
    if data.created.is_none() {
        warnings.push("creation date not found".to_string());
    }
    if data.expires.is_none() {
        warnings.push("expiry date not found".to_string());
    }
    if data.registrar.is_none() {
        warnings.push("registrar not found".to_string());
    }
    warnings
}

/// Fills gaps in the registry answer with the registrar's.
fn merge(registry: WhoisData, registrar: WhoisData, now: DateTime<Utc>) -> WhoisData {
    let mut merged = WhoisData {
        server: registrar.server,
        registered: registry.registered,
        registrar: registry.registrar.or(registrar.registrar),
        created: registry.created.or(registrar.created),
        expires: registry.expires.or(registrar.expires),
        updated: registry.updated.or(registrar.updated),
        name_servers: if registry.name_servers.is_empty() {
            registrar.name_servers
        } else {
            registry.name_servers
        },
        statuses: if registry.statuses.is_empty() {
            registrar.statuses
        } else {
            registry.statuses
        },
        referral: registry.referral,
        rate_limited: registry.rate_limited || registrar.rate_limited,
        age_days: None,
        days_until_expiry: None,
    };
    finalize(&mut merged, now);
    merged
}

/// Parses the date formats registries actually use. Time zones other than
/// UTC are converted; dates without a time are taken as midnight UTC.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let candidates = [
        value,
        value.trim_end_matches(" UTC").trim_end_matches(" GMT").trim(),
        value.split_whitespace().next().unwrap_or_default(),
    ];

    for candidate in candidates {
        if let Ok(dt) = DateTime::parse_from_rfc3339(candidate) {
            return Some(dt.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y.%m.%d %H:%M:%S", "%d-%b-%Y %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, format) {
                return Some(naive.and_utc());
            }
        }
        for format in ["%Y-%m-%d", "%d-%b-%Y", "%d.%m.%Y", "%Y.%m.%d", "%Y/%m/%d", "%d/%m/%Y", "%Y%m%d"] {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
                return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
            }
        }
    }
    None
}
