// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::core::error::ProbeError;

// --- Probe Identity & Status ---

/// The kind of signal a probe collects. Also the key of `ScanReport::probe_results`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProbeKind {
    Dns,
    Whois,
    Blacklist,
    Tls,
    SecurityHeaders,
    Technology,
    Content,
}

impl ProbeKind {
    pub fn all() -> impl Iterator<Item = ProbeKind> {
        ProbeKind::iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Success,
    /// Some data is usable, some is missing or malformed. See `warnings`.
    PartialData,
    Failed,
    /// Slow dependency, as opposed to a broken one.
    TimedOut,
}

/// The immutable outcome of one probe run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    kind: ProbeKind,
    status: ProbeStatus,
    data: Option<ProbeData>,
    latency_ms: u64,
    error: Option<ProbeError>,
    warnings: Vec<String>,
}

impl ProbeResult {
    pub fn success(data: ProbeData, latency: Duration) -> Self {
        Self {
            kind: data.kind(),
            status: ProbeStatus::Success,
            data: Some(data),
            latency_ms: millis(latency),
            error: None,
            warnings: Vec::new(),
        }
    }

    /// Usable data with caveats. Falls back to `success` when there are none.
    pub fn partial(data: ProbeData, latency: Duration, warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            return Self::success(data, latency);
        }
        Self {
            kind: data.kind(),
            status: ProbeStatus::PartialData,
            data: Some(data),
            latency_ms: millis(latency),
            error: None,
            warnings,
        }
    }

    pub fn failed(kind: ProbeKind, error: ProbeError, latency: Duration) -> Self {
        let status = match error {
            ProbeError::TimedOut(_) => ProbeStatus::TimedOut,
            _ => ProbeStatus::Failed,
        };
        Self {
            kind,
            status,
            data: None,
            latency_ms: millis(latency),
            error: Some(error),
            warnings: Vec::new(),
        }
    }

    pub fn timed_out(kind: ProbeKind, elapsed: Duration, budget: Duration) -> Self {
        Self::failed(kind, ProbeError::TimedOut(millis(budget)), elapsed)
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn status(&self) -> ProbeStatus {
        self.status
    }

    pub fn data(&self) -> Option<&ProbeData> {
        self.data.as_ref()
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    pub fn error(&self) -> Option<&ProbeError> {
        self.error.as_ref()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.status, ProbeStatus::Success | ProbeStatus::PartialData) && self.data.is_some()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Typed payload, one variant per probe kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeData {
    Dns(DnsData),
    Whois(WhoisData),
    Blacklist(BlacklistData),
    Tls(TlsData),
    SecurityHeaders(HeadersData),
    Technology(TechnologyData),
    Content(ContentData),
}

impl ProbeData {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeData::Dns(_) => ProbeKind::Dns,
            ProbeData::Whois(_) => ProbeKind::Whois,
            ProbeData::Blacklist(_) => ProbeKind::Blacklist,
            ProbeData::Tls(_) => ProbeKind::Tls,
            ProbeData::SecurityHeaders(_) => ProbeKind::SecurityHeaders,
            ProbeData::Technology(_) => ProbeKind::Technology,
            ProbeData::Content(_) => ProbeKind::Content,
        }
    }
}

// --- DNS Probe Models ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RecordKind {
    A,
    Aaaa,
    Mx,
    Txt,
    Ns,
    Cname,
    Soa,
    Caa,
    Srv,
}

/// A single resource record, with the TTL the resolver reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    pub record_type: RecordKind,
    pub value: String,
    pub ttl: u32,
}

/// The `all` mechanism qualifier that closes an SPF record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SpfQualifier {
    /// `+all`: anyone may send.
    Pass,
    /// `-all`
    Fail,
    /// `~all`
    SoftFail,
    /// `?all`
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpfData {
    pub record: String,
    pub all_qualifier: Option<SpfQualifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmarcData {
    pub record: String,
    pub policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkimRecord {
    pub selector: String,
    pub record: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsData {
    /// Every queried type has an entry; an empty list means no records.
    pub records: BTreeMap<RecordKind, Vec<DnsRecord>>,
    pub spf: Option<SpfData>,
    pub dmarc: Option<DmarcData>,
    pub dkim: Vec<DkimRecord>,
    /// The `_dmarc` lookup itself failed; `dmarc` says nothing.
    pub dmarc_failed: bool,
    /// At least one selector lookup failed, so an empty `dkim` is inconclusive.
    pub dkim_failed: bool,
    /// Types whose lookup failed, as opposed to returning nothing.
    pub failed_types: Vec<RecordKind>,
    /// Lowest TTL seen across all records.
    pub min_ttl: Option<u32>,
}

impl DnsData {
    pub fn records_of(&self, kind: RecordKind) -> &[DnsRecord] {
        self.records.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn addresses(&self) -> Vec<IpAddr> {
        self.records_of(RecordKind::A)
            .iter()
            .chain(self.records_of(RecordKind::Aaaa))
            .filter_map(|r| r.value.parse().ok())
            .collect()
    }
}

// --- WHOIS Probe Models ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoisData {
    /// The server whose answer was parsed last (the referral target, if followed).
    pub server: String,
    pub registered: bool,
    pub registrar: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub name_servers: Vec<String>,
    pub statuses: Vec<String>,
    pub referral: Option<String>,
    pub rate_limited: bool,
    pub age_days: Option<i64>,
    pub days_until_expiry: Option<i64>,
}

// --- Blacklist Probe Models ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ZoneStatus {
    Clean,
    Listed,
    TimedOut,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneOutcome {
    pub zone: String,
    pub status: ZoneStatus,
    pub listed_addresses: Vec<Ipv4Addr>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistData {
    pub addresses: Vec<Ipv4Addr>,
    /// Number of zones queried.
    pub checked: usize,
    /// Number of zones listing at least one address.
    pub listed: usize,
    pub zones: Vec<ZoneOutcome>,
}

// --- TLS Probe Models ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject_name: String,
    pub issuer_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
    pub subject_alt_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsData {
    pub is_valid: bool,
    pub certificate_info: CertificateInfo,
}

// --- Security Header Probe Models ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderData {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeakHeader {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadersData {
    pub url: String,
    pub https: bool,
    pub status_code: u16,
    pub present: Vec<HeaderData>,
    pub missing: Vec<String>,
    pub weak: Vec<WeakHeader>,
    /// Headers that leak implementation details.
    pub disclosed: Vec<HeaderData>,
}

// --- Technology Fingerprint Models ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum TechCategory {
    Cms,
    Ecommerce,
    Framework,
    #[strum(serialize = "JS Library")]
    JsLibrary,
    Analytics,
    #[strum(serialize = "CDN")]
    Cdn,
    Hosting,
    Security,
    #[strum(serialize = "Web Server")]
    WebServer,
    Language,
    Email,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technology {
    pub name: String,
    pub category: TechCategory,
    pub version: Option<String>,
    /// 0..=100
    pub confidence: u8,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnologyData {
    pub signature_version: String,
    pub technologies: Vec<Technology>,
}

impl TechnologyData {
    pub fn has_category(&self, category: TechCategory) -> bool {
        self.technologies.iter().any(|t| t.category == category)
    }
}

// --- Content / Business Intelligence Models ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum BusinessModel {
    Ecommerce,
    B2b,
    B2c,
    Mixed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessSignals {
    pub ecommerce: Vec<String>,
    pub b2b: Vec<String>,
    pub b2c: Vec<String>,
    pub model: BusinessModel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialProfile {
    pub network: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentData {
    pub url: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub page_bytes: usize,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub canonical: Option<String>,
    pub robots: Option<String>,
    pub has_viewport: bool,
    pub language: Option<String>,
    pub open_graph: BTreeMap<String, String>,
    /// Count of h1..h6, in order.
    pub heading_counts: [usize; 6],
    pub h1: Vec<String>,
    pub word_count: usize,
    pub structured_data_types: Vec<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub social_profiles: Vec<SocialProfile>,
    pub images: usize,
    pub images_missing_alt: usize,
    pub internal_links: usize,
    pub external_links: usize,
    pub script_count: usize,
    pub stylesheet_count: usize,
    pub business: BusinessSignals,
}

// --- Scoring & Recommendation Models ---

/// Severity of an unmet rule, in priority order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Important,
    Suggested,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Email,
    Reputation,
    #[strum(serialize = "SEO")]
    Seo,
    Performance,
    Technical,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

/// Coarse effort/impact estimate attached to a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Estimate {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Stable identifier used for deduplication.
    pub issue_key: String,
    pub category: Category,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub action: String,
    pub impact_estimate: Estimate,
    pub effort_estimate: Estimate,
}

// --- Main Report ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Completed,
    PartiallyCompleted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    pub duration_ms: u64,
    pub probe_latency_ms: BTreeMap<ProbeKind, u64>,
    /// Hits and misses recorded while this scan ran.
    pub cache: Vec<CacheStats>,
}

/// The point-in-time result of one scan. Built once by the pipeline and never
/// modified afterwards; there are no mutating accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    target: String,
    timestamp: DateTime<Utc>,
    status: ScanStatus,
    probe_results: BTreeMap<ProbeKind, ProbeResult>,
    category_scores: BTreeMap<Category, u8>,
    overall_score: u8,
    grade: Grade,
    recommendations: Vec<Recommendation>,
    stats: ScanStats,
}

impl ScanReport {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        target: String,
        timestamp: DateTime<Utc>,
        probe_results: BTreeMap<ProbeKind, ProbeResult>,
        category_scores: BTreeMap<Category, u8>,
        overall_score: u8,
        grade: Grade,
        recommendations: Vec<Recommendation>,
        stats: ScanStats,
    ) -> Self {
        let status = if probe_results
            .values()
            .all(|r| r.status() == ProbeStatus::Success)
        {
            ScanStatus::Completed
        } else {
            ScanStatus::PartiallyCompleted
        };
        Self {
            target,
            timestamp,
            status,
            probe_results,
            category_scores,
            overall_score,
            grade,
            recommendations,
            stats,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    pub fn probe_results(&self) -> &BTreeMap<ProbeKind, ProbeResult> {
        &self.probe_results
    }

    pub fn probe(&self, kind: ProbeKind) -> Option<&ProbeResult> {
        self.probe_results.get(&kind)
    }

    pub fn category_scores(&self) -> &BTreeMap<Category, u8> {
        &self.category_scores
    }

    pub fn overall_score(&self) -> u8 {
        self.overall_score
    }

    pub fn grade(&self) -> Grade {
        self.grade
    }

    pub fn recommendations(&self) -> &[Recommendation] {
        &self.recommendations
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.recommendations
            .iter()
            .filter(|r| r.severity == severity)
            .count()
    }

    /// Technologies detected by the fingerprint probe, if it produced data.
    pub fn technologies(&self) -> &[Technology] {
        match self.probe(ProbeKind::Technology).and_then(ProbeResult::data) {
            Some(ProbeData::Technology(data)) => &data.technologies,
            _ => &[],
        }
    }
}
