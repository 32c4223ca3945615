// src/core/knowledge_base.rs

//! The rule catalogue: the single source of every finding the scanner can
//! report, with its category, severity, score penalty, and the human-readable
//! explanation and remediation attached to it.
//!
//! Rules are data (`data/rules.toml`), but their conditions are a closed,
//! typed set. A misspelled check name or a missing parameter is rejected when
//! the catalogue is loaded instead of silently never firing.
//!
//! Every condition evaluates to one of three outcomes. `NotApplicable` means
//! the probe the rule depends on produced no usable data; such rules neither
//! pass nor cost points.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::core::models::{
    BlacklistData, Category, ContentData, DnsData, Estimate, HeadersData, ProbeData, ProbeKind,
    ProbeResult, ProbeStatus, RecordKind, Severity, SpfQualifier, TechCategory, TechnologyData,
    TlsData, WhoisData,
};

const MAX_PENALTY: u32 = 100;

/// What a rule looks for. Serialized with a `check` tag, e.g.
/// `{ check = "header_missing", header = "x-frame-options" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case", deny_unknown_fields)]
pub enum Condition {
    // --- Email authentication (DNS) ---
    SpfMissing,
    SpfAllQualifier { qualifier: SpfQualifier },
    DmarcMissing,
    DmarcPolicyNone,
    DkimMissing,

    // --- DNS hygiene ---
    RecordMissing { record: RecordKind },
    NameserversBelow { count: usize },

    // --- TLS ---
    TlsFailed,
    CertificateInvalid,
    CertificateExpiresWithin { days: i64 },

    // --- HTTP headers ---
    HeaderMissing { header: String },
    HeaderWeak { header: String },
    HeaderDisclosed { header: String },
    NotHttps,

    // --- Reputation ---
    Blacklisted { min_listings: usize },
    DomainUnregistered,
    DomainExpiresWithin { days: i64 },
    DomainYoungerThan { days: i64 },

    // --- SEO ---
    TitleMissing,
    TitleLength { min: usize, max: usize },
    MetaDescriptionMissing,
    MetaDescriptionLength { min: usize, max: usize },
    H1Missing,
    MultipleH1,
    WordCountBelow { words: usize },
    StructuredDataMissing,
    CanonicalMissing,
    ViewportMissing,
    OpenGraphMissing,
    LangMissing,
    ImagesMissingAlt { percent: u8 },

    // --- Performance ---
    SlowResponse { millis: u64 },
    PageSizeAbove { bytes: usize },
    TooManyScripts { count: usize },
    TooManyStylesheets { count: usize },
    CdnMissing,

    // --- Technical ---
    HttpError,
    ProbeFailed { probe: ProbeKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Violated,
    NotApplicable,
}

impl Outcome {
    fn violated_if(condition: bool) -> Self {
        if condition {
            Outcome::Violated
        } else {
            Outcome::Passed
        }
    }
}

/// One entry of the catalogue. `id` doubles as the recommendation's
/// deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    pub penalty: u32,
    pub condition: Condition,
    pub title: String,
    pub message: String,
    pub action: String,
    pub impact: Estimate,
    pub effort: Estimate,
}

#[derive(Debug, Clone, Copy)]
pub struct RuleEvaluation<'a> {
    pub rule: &'a Rule,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub version: String,
    #[serde(rename = "rule")]
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Parses and validates a catalogue.
    pub fn from_toml(content: &str) -> Result<Self> {
        let set: RuleSet = toml::from_str(content).map_err(|e| Error::data("rule catalogue", e))?;
        set.validate()?;
        Ok(set)
    }

    pub fn new(version: impl Into<String>, rules: Vec<Rule>) -> Result<Self> {
        let set = Self {
            version: version.into(),
            rules,
        };
        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err(Error::data("rule catalogue", "rule with an empty id"));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(Error::data("rule catalogue", format!("duplicate rule id '{}'", rule.id)));
            }
            if rule.penalty > MAX_PENALTY {
                return Err(Error::data(
                    "rule catalogue",
                    format!("rule '{}' has penalty {} (max {MAX_PENALTY})", rule.id, rule.penalty),
                ));
            }
            if let Condition::TitleLength { min, max } | Condition::MetaDescriptionLength { min, max } =
                &rule.condition
            {
                if min > max {
                    return Err(Error::data(
                        "rule catalogue",
                        format!("rule '{}' has min > max", rule.id),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates every rule, in catalogue order, against one scan's results.
    pub fn evaluate<'a>(
        &'a self,
        results: &BTreeMap<ProbeKind, ProbeResult>,
    ) -> Vec<RuleEvaluation<'a>> {
        let signals = Signals { results };
        let evaluations: Vec<RuleEvaluation<'a>> = self
            .rules
            .iter()
            .map(|rule| RuleEvaluation {
                rule,
                outcome: signals.check(&rule.condition),
            })
            .collect();
        debug!(
            rules = evaluations.len(),
            violated = evaluations.iter().filter(|e| e.outcome == Outcome::Violated).count(),
            "Rules evaluated."
        );
        evaluations
    }
}

/// Typed read access to the probe payloads of one scan.
struct Signals<'a> {
    results: &'a BTreeMap<ProbeKind, ProbeResult>,
}

impl<'a> Signals<'a> {
    fn data(&self, kind: ProbeKind) -> Option<&'a ProbeData> {
        self.results
            .get(&kind)
            .filter(|r| r.is_usable())
            .and_then(ProbeResult::data)
    }

    fn dns(&self) -> Option<&'a DnsData> {
        match self.data(ProbeKind::Dns) {
            Some(ProbeData::Dns(d)) => Some(d),
            _ => None,
        }
    }

    fn whois(&self) -> Option<&'a WhoisData> {
        match self.data(ProbeKind::Whois) {
            Some(ProbeData::Whois(d)) => Some(d),
            _ => None,
        }
    }

    fn blacklist(&self) -> Option<&'a BlacklistData> {
        match self.data(ProbeKind::Blacklist) {
            Some(ProbeData::Blacklist(d)) => Some(d),
            _ => None,
        }
    }

    fn tls(&self) -> Option<&'a TlsData> {
        match self.data(ProbeKind::Tls) {
            Some(ProbeData::Tls(d)) => Some(d),
            _ => None,
        }
    }

    fn headers(&self) -> Option<&'a HeadersData> {
        match self.data(ProbeKind::SecurityHeaders) {
            Some(ProbeData::SecurityHeaders(d)) => Some(d),
            _ => None,
        }
    }

    fn technology(&self) -> Option<&'a TechnologyData> {
        match self.data(ProbeKind::Technology) {
            Some(ProbeData::Technology(d)) => Some(d),
            _ => None,
        }
    }

    fn content(&self) -> Option<&'a ContentData> {
        match self.data(ProbeKind::Content) {
            Some(ProbeData::Content(d)) => Some(d),
            _ => None,
        }
    }

    /// DNS data, but only if the lookups for `kind` actually succeeded.
    fn dns_with(&self, kind: RecordKind) -> Option<&'a DnsData> {
        self.dns().filter(|d| !d.failed_types.contains(&kind))
    }

    fn on_dns(&self, kind: RecordKind, f: impl FnOnce(&DnsData) -> bool) -> Outcome {
        self.dns_with(kind)
            .map_or(Outcome::NotApplicable, |d| Outcome::violated_if(f(d)))
    }

    fn on_headers(&self, f: impl FnOnce(&HeadersData) -> bool) -> Outcome {
        self.headers()
            .map_or(Outcome::NotApplicable, |d| Outcome::violated_if(f(d)))
    }

    fn on_content(&self, f: impl FnOnce(&ContentData) -> bool) -> Outcome {
        self.content()
            .map_or(Outcome::NotApplicable, |d| Outcome::violated_if(f(d)))
    }

    fn on_whois(&self, f: impl FnOnce(&WhoisData) -> Option<bool>) -> Outcome {
        self.whois()
            .and_then(f)
            .map_or(Outcome::NotApplicable, Outcome::violated_if)
    }

    fn check(&self, condition: &Condition) -> Outcome {
        match condition {
            Condition::SpfMissing => self.on_dns(RecordKind::Txt, |d| d.spf.is_none()),
            Condition::SpfAllQualifier { qualifier } => match self.dns_with(RecordKind::Txt) {
                Some(DnsData { spf: Some(spf), .. }) => {
                    Outcome::violated_if(spf.all_qualifier == Some(*qualifier))
                }
                _ => Outcome::NotApplicable,
            },
            Condition::DmarcMissing => match self.dns_with(RecordKind::Txt) {
                Some(d) if !d.dmarc_failed => Outcome::violated_if(d.dmarc.is_none()),
                _ => Outcome::NotApplicable,
            },
            Condition::DmarcPolicyNone => match self.dns_with(RecordKind::Txt) {
                Some(DnsData { dmarc: Some(dmarc), .. }) => Outcome::violated_if(
                    dmarc
                        .policy
                        .as_deref()
                        .is_some_and(|p| p.eq_ignore_ascii_case("none")),
                ),
                _ => Outcome::NotApplicable,
            },
            Condition::DkimMissing => match self.dns() {
                Some(d) if !d.dkim.is_empty() => Outcome::Passed,
                Some(d) if !d.dkim_failed => Outcome::Violated,
                _ => Outcome::NotApplicable,
            },
            Condition::RecordMissing { record } => {
                self.on_dns(*record, |d| d.records_of(*record).is_empty())
            }
            Condition::NameserversBelow { count } => {
                self.on_dns(RecordKind::Ns, |d| d.records_of(RecordKind::Ns).len() < *count)
            }

            Condition::TlsFailed => match self.results.get(&ProbeKind::Tls).map(ProbeResult::status) {
                Some(ProbeStatus::Failed) => Outcome::Violated,
                Some(ProbeStatus::Success | ProbeStatus::PartialData) => Outcome::Passed,
                Some(ProbeStatus::TimedOut) | None => Outcome::NotApplicable,
            },
            Condition::CertificateInvalid => self
                .tls()
                .map_or(Outcome::NotApplicable, |t| Outcome::violated_if(!t.is_valid)),
            Condition::CertificateExpiresWithin { days } => {
                self.tls().map_or(Outcome::NotApplicable, |t| {
                    let left = t.certificate_info.days_until_expiry;
                    Outcome::violated_if((0..=*days).contains(&left))
                })
            }

            Condition::HeaderMissing { header } => self.on_headers(|h| {
                h.missing.iter().any(|m| m.eq_ignore_ascii_case(header))
            }),
            Condition::HeaderWeak { header } => self.on_headers(|h| {
                h.weak.iter().any(|w| w.name.eq_ignore_ascii_case(header))
            }),
            Condition::HeaderDisclosed { header } => self.on_headers(|h| {
                h.disclosed.iter().any(|d| d.name.eq_ignore_ascii_case(header))
            }),
            Condition::NotHttps => self.on_headers(|h| !h.https),

            Condition::Blacklisted { min_listings } => self.blacklist().map_or(
                Outcome::NotApplicable,
                |b| Outcome::violated_if(b.listed >= (*min_listings).max(1)),
            ),
            Condition::DomainUnregistered => self.on_whois(|w| {
                (!w.rate_limited).then_some(!w.registered)
            }),
            Condition::DomainExpiresWithin { days } => {
                self.on_whois(|w| w.days_until_expiry.map(|left| left <= *days))
            }
            Condition::DomainYoungerThan { days } => {
                self.on_whois(|w| w.age_days.map(|age| age < *days))
            }

            Condition::TitleMissing => self.on_content(|c| c.title.is_none()),
            Condition::TitleLength { min, max } => match self.content() {
                Some(ContentData { title: Some(title), .. }) => {
                    let len = title.chars().count();
                    Outcome::violated_if(len < *min || len > *max)
                }
                _ => Outcome::NotApplicable,
            },
            Condition::MetaDescriptionMissing => self.on_content(|c| c.meta_description.is_none()),
            Condition::MetaDescriptionLength { min, max } => match self.content() {
                Some(ContentData {
                    meta_description: Some(description),
                    ..
                }) => {
                    let len = description.chars().count();
                    Outcome::violated_if(len < *min || len > *max)
                }
                _ => Outcome::NotApplicable,
            },
            Condition::H1Missing => self.on_content(|c| c.heading_counts[0] == 0),
            Condition::MultipleH1 => self.on_content(|c| c.heading_counts[0] > 1),
            Condition::WordCountBelow { words } => self.on_content(|c| c.word_count < *words),
            Condition::StructuredDataMissing => {
                self.on_content(|c| c.structured_data_types.is_empty())
            }
            Condition::CanonicalMissing => self.on_content(|c| c.canonical.is_none()),
            Condition::ViewportMissing => self.on_content(|c| !c.has_viewport),
            Condition::OpenGraphMissing => self.on_content(|c| c.open_graph.is_empty()),
            Condition::LangMissing => self.on_content(|c| c.language.is_none()),
            Condition::ImagesMissingAlt { percent } => self.on_content(|c| {
                c.images > 0 && c.images_missing_alt * 100 > c.images * usize::from(*percent)
            }),

            Condition::SlowResponse { millis } => self.on_content(|c| c.response_time_ms > *millis),
            Condition::PageSizeAbove { bytes } => self.on_content(|c| c.page_bytes > *bytes),
            Condition::TooManyScripts { count } => self.on_content(|c| c.script_count > *count),
            Condition::TooManyStylesheets { count } => {
                self.on_content(|c| c.stylesheet_count > *count)
            }
            Condition::CdnMissing => self.technology().map_or(Outcome::NotApplicable, |t| {
                Outcome::violated_if(!t.has_category(TechCategory::Cdn))
            }),

            Condition::HttpError => self.on_content(|c| c.status_code >= 400),
            Condition::ProbeFailed { probe } => {
                match self.results.get(probe).map(ProbeResult::status) {
                    Some(ProbeStatus::Failed | ProbeStatus::TimedOut) => Outcome::Violated,
                    Some(_) => Outcome::Passed,
                    None => Outcome::NotApplicable,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ProbeError;
    use crate::core::models::{DmarcData, DnsRecord, SpfData};
    use std::time::Duration;

    const CATALOGUE: &str = r#"
        version = "test"

        [[rule]]
        id = "DNS_DMARC_MISSING"
        category = "email"
        severity = "critical"
        penalty = 35
        condition = { check = "dmarc_missing" }
        title = "DMARC record missing"
        message = "No DMARC policy."
        action = "Publish a DMARC record."
        impact = "high"
        effort = "low"

        [[rule]]
        id = "DNS_SPF_SOFTFAIL"
        category = "email"
        severity = "suggested"
        penalty = 5
        condition = { check = "spf_all_qualifier", qualifier = "soft_fail" }
        title = "SPF uses softfail"
        message = "~all"
        action = "Use -all."
        impact = "low"
        effort = "low"

        [[rule]]
        id = "TLS_UNAVAILABLE"
        category = "security"
        severity = "critical"
        penalty = 40
        condition = { check = "tls_failed" }
        title = "TLS handshake failed"
        message = "No TLS."
        action = "Install a certificate."
        impact = "high"
        effort = "medium"
    "#;

    fn dns_result(dmarc: Option<&str>, spf: Option<SpfQualifier>) -> ProbeResult {
        let mut data = DnsData::default();
        data.records.insert(
            RecordKind::Txt,
            vec![DnsRecord {
                name: "example.com".into(),
                record_type: RecordKind::Txt,
                value: "v=spf1 ~all".into(),
                ttl: 300,
            }],
        );
        data.dmarc = dmarc.map(|p| DmarcData {
            record: format!("v=DMARC1; p={p}"),
            policy: Some(p.to_string()),
        });
        data.spf = spf.map(|q| SpfData {
            record: "v=spf1 ~all".into(),
            all_qualifier: Some(q),
        });
        ProbeResult::success(ProbeData::Dns(data), Duration::from_millis(10))
    }

    fn outcomes(set: &RuleSet, results: &BTreeMap<ProbeKind, ProbeResult>) -> Vec<(String, Outcome)> {
        set.evaluate(results)
            .into_iter()
            .map(|e| (e.rule.id.clone(), e.outcome))
            .collect()
    }

    #[test]
    fn parses_catalogue_with_typed_conditions() {
        let set = RuleSet::from_toml(CATALOGUE).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(
            set.get("DNS_SPF_SOFTFAIL").unwrap().condition,
            Condition::SpfAllQualifier {
                qualifier: SpfQualifier::SoftFail
            }
        );
    }

    #[test]
    fn unknown_check_is_rejected_at_load() {
        let broken = CATALOGUE.replace("dmarc_missing", "dmarc_mising");
        assert!(matches!(RuleSet::from_toml(&broken), Err(Error::Data { .. })));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let broken = CATALOGUE.replace("TLS_UNAVAILABLE", "DNS_DMARC_MISSING");
        let err = RuleSet::from_toml(&broken).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn oversized_penalty_is_rejected() {
        let broken = CATALOGUE.replace("penalty = 40", "penalty = 140");
        assert!(RuleSet::from_toml(&broken).is_err());
    }

    #[test]
    fn evaluates_against_dns_data() {
        let set = RuleSet::from_toml(CATALOGUE).unwrap();
        let mut results = BTreeMap::new();
        results.insert(ProbeKind::Dns, dns_result(None, Some(SpfQualifier::SoftFail)));
        results.insert(
            ProbeKind::Tls,
            ProbeResult::failed(
                ProbeKind::Tls,
                ProbeError::Handshake("bad cert".into()),
                Duration::from_millis(3),
            ),
        );

        assert_eq!(
            outcomes(&set, &results),
            vec![
                ("DNS_DMARC_MISSING".to_string(), Outcome::Violated),
                ("DNS_SPF_SOFTFAIL".to_string(), Outcome::Violated),
                ("TLS_UNAVAILABLE".to_string(), Outcome::Violated),
            ]
        );
    }

    #[test]
    fn missing_data_is_not_applicable() {
        let set = RuleSet::from_toml(CATALOGUE).unwrap();
        let mut results = BTreeMap::new();
        results.insert(
            ProbeKind::Dns,
            ProbeResult::timed_out(ProbeKind::Dns, Duration::from_secs(8), Duration::from_secs(8)),
        );
        results.insert(
            ProbeKind::Tls,
            ProbeResult::timed_out(ProbeKind::Tls, Duration::from_secs(8), Duration::from_secs(8)),
        );
        assert!(outcomes(&set, &results)
            .iter()
            .all(|(_, outcome)| *outcome == Outcome::NotApplicable));
    }

    #[test]
    fn failed_txt_lookup_does_not_count_as_missing_dmarc() {
        let set = RuleSet::from_toml(CATALOGUE).unwrap();
        let mut data = DnsData::default();
        data.failed_types.push(RecordKind::Txt);
        let mut results = BTreeMap::new();
        results.insert(
            ProbeKind::Dns,
            ProbeResult::partial(
                ProbeData::Dns(data),
                Duration::from_millis(10),
                vec!["TXT lookup failed".into()],
            ),
        );
        let evaluated = outcomes(&set, &results);
        assert_eq!(evaluated[0].1, Outcome::NotApplicable);
    }

    #[test]
    fn failed_dmarc_and_dkim_lookups_are_not_reported_as_missing() {
        let rules = crate::core::data::ScanData::bundled().unwrap().rules;
        let mut data = DnsData::default();
        data.records.insert(
            RecordKind::Txt,
            vec![DnsRecord {
                name: "example.com".into(),
                record_type: RecordKind::Txt,
                value: "v=spf1 -all".into(),
                ttl: 300,
            }],
        );
        data.dmarc_failed = true;
        data.dkim_failed = true;
        let mut results = BTreeMap::new();
        results.insert(
            ProbeKind::Dns,
            ProbeResult::partial(
                ProbeData::Dns(data.clone()),
                Duration::from_millis(10),
                vec!["DMARC lookup failed: SERVFAIL".into()],
            ),
        );
        let evaluated = outcomes(&rules, &results);
        let outcome_of = |id: &str| {
            evaluated
                .iter()
                .find(|(rule, _)| rule == id)
                .map(|(_, outcome)| *outcome)
        };
        assert_eq!(outcome_of("DNS_DMARC_MISSING"), Some(Outcome::NotApplicable));
        assert_eq!(outcome_of("DNS_DKIM_MISSING"), Some(Outcome::NotApplicable));

        // Clean lookups that find nothing are still violations.
        data.dmarc_failed = false;
        data.dkim_failed = false;
        results.insert(
            ProbeKind::Dns,
            ProbeResult::success(ProbeData::Dns(data), Duration::from_millis(10)),
        );
        let evaluated = outcomes(&rules, &results);
        assert!(evaluated.contains(&("DNS_DMARC_MISSING".to_string(), Outcome::Violated)));
        assert!(evaluated.contains(&("DNS_DKIM_MISSING".to_string(), Outcome::Violated)));
    }

    #[test]
    fn policy_none_is_case_insensitive() {
        let rule = Rule {
            id: "DNS_DMARC_POLICY_NONE".into(),
            category: Category::Email,
            severity: Severity::Important,
            penalty: 15,
            condition: Condition::DmarcPolicyNone,
            title: String::new(),
            message: String::new(),
            action: String::new(),
            impact: Estimate::Medium,
            effort: Estimate::Low,
        };
        let set = RuleSet::new("t", vec![rule]).unwrap();
        let mut results = BTreeMap::new();
        results.insert(ProbeKind::Dns, dns_result(Some("NONE"), None));
        assert_eq!(set.evaluate(&results)[0].outcome, Outcome::Violated);
    }
}
