// src/core/scanner/fingerprint_scanner.rs

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::core::data::ScanData;
use crate::core::models::{
    ProbeData, ProbeKind, ProbeResult, RecordKind, Technology, TechnologyData,
};
use crate::core::net::{DnsLookup, HttpSnapshot, SharedHomepage};
use crate::core::retry::retry;
use crate::core::scanner::{Probe, ProbeContext};
use crate::core::signatures::{Pattern, SignatureDb, Source};
use crate::core::target::Target;

/// Everything a signature can look at, extracted once per scan.
#[derive(Debug, Default, Clone)]
pub struct Evidence {
    /// Lowercase header names.
    pub headers: Vec<(String, String)>,
    pub cookies: String,
    /// Lowercase meta name to content values.
    pub meta: HashMap<String, Vec<String>>,
    pub script_srcs: Vec<String>,
    pub link_hrefs: Vec<String>,
    pub body: String,
    pub dns: BTreeMap<RecordKind, Vec<String>>,
}

impl Evidence {
    /// Pulls headers, cookies and markup out of a homepage response.
    ///
    /// The parsed document never leaves this function, so callers stay `Send`.
    pub fn from_snapshot(snapshot: &HttpSnapshot) -> Self {
        let document = Html::parse_document(&snapshot.body);
        let mut meta: HashMap<String, Vec<String>> = HashMap::new();
        if let Ok(selector) = Selector::parse("meta[name][content]") {
            for el in document.select(&selector) {
                if let (Some(name), Some(content)) = (el.value().attr("name"), el.value().attr("content")) {
                    meta.entry(name.to_ascii_lowercase())
                        .or_default()
                        .push(content.to_string());
                }
            }
        }
        Self {
            headers: snapshot.headers.clone(),
            cookies: snapshot.header_values("set-cookie").collect::<Vec<_>>().join("; "),
            meta,
            script_srcs: attr_values(&document, "script[src]", "src"),
            link_hrefs: attr_values(&document, "link[href]", "href"),
            body: snapshot.body.clone(),
            dns: BTreeMap::new(),
        }
    }

    fn texts(&self, source: &Source) -> Vec<&str> {
        match source {
            Source::Header(name) => self
                .headers
                .iter()
                .filter(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
                .collect(),
            Source::Cookie if self.cookies.is_empty() => Vec::new(),
            Source::Cookie => vec![self.cookies.as_str()],
            Source::Meta(name) => self
                .meta
                .get(name)
                .map(|values| values.iter().map(String::as_str).collect())
                .unwrap_or_default(),
            Source::ScriptSrc => self.script_srcs.iter().map(String::as_str).collect(),
            Source::LinkHref => self.link_hrefs.iter().map(String::as_str).collect(),
            Source::Body if self.body.is_empty() => Vec::new(),
            Source::Body => vec![self.body.as_str()],
            Source::Dns(kind) => self
                .dns
                .get(kind)
                .map(|values| values.iter().map(String::as_str).collect())
                .unwrap_or_default(),
        }
    }
}

fn attr_values(document: &Html, selector: &str, attr: &str) -> Vec<String> {
    match Selector::parse(selector) {
        Ok(selector) => document
            .select(&selector)
            .filter_map(|el| el.value().attr(attr))
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn describe(source: &Source) -> String {
    match source {
        Source::Header(name) => format!("header {name}"),
        Source::Cookie => "cookie".into(),
        Source::Meta(name) => format!("meta {name}"),
        Source::ScriptSrc => "script src".into(),
        Source::LinkHref => "link href".into(),
        Source::Body => "body".into(),
        Source::Dns(kind) => format!("dns {kind}"),
    }
}

/// First match of `pattern` over `texts`, with the version it captured.
fn first_match(pattern: &Pattern, texts: &[&str]) -> Option<Option<String>> {
    texts.iter().find_map(|text| pattern.find(text))
}

/// Applies every signature to `evidence`.
///
/// Confidence from matching patterns is summed and capped at 100. The first
/// captured version wins. Results are ordered by confidence, then name.
pub fn fingerprint(db: &SignatureDb, evidence: &Evidence) -> Vec<Technology> {
    debug!(total_rules = db.len(), "Applying fingerprinting rules.");
    let mut found = Vec::new();
    for signature in db.signatures() {
        let mut confidence: u32 = 0;
        let mut version = None;
        let mut trail = Vec::new();
        for pattern in &signature.patterns {
            let texts = evidence.texts(&pattern.source);
            if let Some(captured) = first_match(pattern, &texts) {
                confidence += u32::from(pattern.confidence);
                let what = describe(&pattern.source);
                if !trail.contains(&what) {
                    trail.push(what);
                }
                if version.is_none() {
                    version = captured;
                }
            }
        }
        if confidence > 0 {
            debug!(tech = %signature.name, version = ?version, confidence, "Rule matched.");
            found.push(Technology {
                name: signature.name.clone(),
                category: signature.category,
                version,
                confidence: u8::try_from(confidence.min(100)).unwrap_or(100),
                evidence: trail,
            });
        }
    }
    found.sort_by(|a, b| b.confidence.cmp(&a.confidence).then_with(|| a.name.cmp(&b.name)));
    found
}

/// Identifies the technology stack from the homepage and a few DNS records.
pub struct FingerprintProbe {
    homepage: Arc<SharedHomepage>,
    dns: Arc<dyn DnsLookup>,
    data: Arc<ScanData>,
}

impl FingerprintProbe {
    pub fn new(homepage: Arc<SharedHomepage>, dns: Arc<dyn DnsLookup>, data: Arc<ScanData>) -> Self {
        Self { homepage, dns, data }
    }

    /// CNAME, NS and MX values, for the types some signature inspects.
    async fn dns_evidence(
        &self,
        target: &Target,
        ctx: &ProbeContext,
        warnings: &mut Vec<String>,
    ) -> BTreeMap<RecordKind, Vec<String>> {
        let mut found = BTreeMap::new();
        if target.is_ip() {
            return found;
        }
        for kind in [RecordKind::Cname, RecordKind::Ns, RecordKind::Mx] {
            if !self.data.signatures.uses_dns(kind) {
                continue;
            }
            let name = match kind {
                RecordKind::Cname => target.host(),
                _ => target.registrable_domain(&self.data.public_suffixes),
            };
            match retry(&ctx.retry, ctx.deadline, "fingerprint-dns", || self.dns.lookup(name, kind)).await {
                Ok(records) => {
                    found.insert(kind, records.into_iter().map(|r| r.value.to_ascii_lowercase()).collect());
                }
                Err(e) => warnings.push(format!("{kind} lookup failed: {e}")),
            }
        }
        found
    }
}

#[async_trait]
impl Probe for FingerprintProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Technology
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> ProbeResult {
        let start = Instant::now();
        info!(target = %target, "Starting fingerprint scan.");
        let mut warnings = Vec::new();

        let (homepage, dns) = tokio::join!(
            self.homepage.fetch(target.host(), &ctx.retry, ctx.deadline),
            async {
                let mut dns_warnings = Vec::new();
                let found = self.dns_evidence(target, ctx, &mut dns_warnings).await;
                (found, dns_warnings)
            }
        );
        let (dns, dns_warnings) = dns;
        warnings.extend(dns_warnings);

        let mut evidence = match homepage {
            Ok(snapshot) => Evidence::from_snapshot(&snapshot),
            Err(e) if dns.values().any(|values| !values.is_empty()) => {
                warn!(error = %e, "Homepage unavailable, fingerprinting from DNS only.");
                warnings.push(format!("homepage unavailable: {e}"));
                Evidence::default()
            }
            Err(e) => {
                warn!(target = %target, error = %e, "HTTP request failed for fingerprint scan.");
                return ProbeResult::failed(ProbeKind::Technology, e, start.elapsed());
            }
        };
        evidence.dns = dns;

        let technologies = fingerprint(&self.data.signatures, &evidence);
        info!(count = technologies.len(), "Fingerprint scan finished.");
        let data = TechnologyData {
            signature_version: self.data.signatures.version().to_string(),
            technologies,
        };
        ProbeResult::partial(ProbeData::Technology(data), start.elapsed(), warnings)
    }
}
