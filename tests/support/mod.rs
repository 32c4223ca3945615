// tests/support/mod.rs

//! In-process fakes for every network seam, plus a pipeline builder wired to
//! them.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vanguard_intel::core::clock::{Clock, ManualClock};
use vanguard_intel::core::models::{CertificateInfo, DnsRecord, RecordKind, TlsData};
use vanguard_intel::core::net::{DnsLookup, HttpFetch, HttpSnapshot, WhoisTransport};
use vanguard_intel::core::retry::RetryPolicy;
use vanguard_intel::core::scanner::{Probe, ProbeContext};
use vanguard_intel::{
    Config, Pipeline, PipelineBuilder, ProbeData, ProbeError, ProbeKind, ProbeResult, ScanData,
    Target,
};

pub const DOMAIN: &str = "example.com";
pub const ADDRESS: &str = "93.184.216.34";

fn record(name: &str, kind: RecordKind, value: &str) -> DnsRecord {
    DnsRecord {
        name: name.to_string(),
        record_type: kind,
        value: value.to_string(),
        ttl: 300,
    }
}

/// Answers from a fixed table. Names under one of `slow_suffixes` hang for a
/// minute; everything unknown resolves to no records.
pub struct FakeDns {
    answers: HashMap<(String, RecordKind), Vec<DnsRecord>>,
    slow_suffixes: Vec<String>,
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeDns {
    pub fn healthy() -> Self {
        let mut answers = HashMap::new();
        let mut add = |name: &str, kind: RecordKind, values: &[&str]| {
            answers.insert(
                (name.to_string(), kind),
                values.iter().map(|v| record(name, kind, v)).collect(),
            );
        };
        add(DOMAIN, RecordKind::A, &[ADDRESS]);
        add(DOMAIN, RecordKind::Mx, &["10 aspmx.l.google.com"]);
        add(DOMAIN, RecordKind::Ns, &["ada.ns.cloudflare.com", "bob.ns.cloudflare.com"]);
        add(DOMAIN, RecordKind::Txt, &["v=spf1 include:_spf.google.com -all"]);
        add(
            &format!("_dmarc.{DOMAIN}"),
            RecordKind::Txt,
            &["v=DMARC1; p=reject; rua=mailto:dmarc@example.com"],
        );
        add(
            &format!("google._domainkey.{DOMAIN}"),
            RecordKind::Txt,
            &["v=DKIM1; k=rsa; p=MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQC"],
        );
        Self {
            answers,
            slow_suffixes: Vec::new(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::healthy()
        }
    }

    pub fn with_slow_zones(mut self, zones: &[String]) -> Self {
        self.slow_suffixes = zones.iter().map(|z| format!(".{z}")).collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsLookup for FakeDns {
    async fn lookup(&self, name: &str, kind: RecordKind) -> Result<Vec<DnsRecord>, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProbeError::Network("resolver unreachable".into()));
        }
        if self.slow_suffixes.iter().any(|s| name.ends_with(s.as_str())) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(self
            .answers
            .get(&(name.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }
}

pub const WHOIS_RESPONSE: &str = "\
   Domain Name: EXAMPLE.COM
   Registry Domain ID: 2336799_DOMAIN_COM-VRSN
   Updated Date: 2024-08-14T07:01:34Z
   Creation Date: 1995-08-14T04:00:00Z
   Registry Expiry Date: 2099-08-13T04:00:00Z
   Registrar: RESERVED-Internet Assigned Numbers Authority
   Domain Status: clientDeleteProhibited https://icann.org/epp#clientDeleteProhibited
   Name Server: A.IANA-SERVERS.NET
   Name Server: B.IANA-SERVERS.NET
>>> Last update of whois database: 2026-10-19T10:00:00Z <<<
";

/// A registry that knows `example.com` and nothing else.
pub struct FakeWhois {
    fail: bool,
    pub calls: AtomicUsize,
    pub queries: Mutex<Vec<String>>,
}

impl FakeWhois {
    pub fn healthy() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::healthy()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WhoisTransport for FakeWhois {
    async fn query(&self, _server: &str, query: &str) -> Result<String, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(ProbeError::Network("connection refused".into()));
        }
        if query != DOMAIN {
            return Ok(format!("No match for \"{}\".\n", query.to_ascii_uppercase()));
        }
        Ok(WHOIS_RESPONSE.to_string())
    }
}

pub const HOMEPAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <title>Example Domain for documentation and testing</title>
  <meta name="description" content="This domain is for use in illustrative examples in documents and may be used without prior coordination.">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <meta name="generator" content="WordPress 6.5.2">
  <link rel="canonical" href="https://example.com/">
  <meta property="og:title" content="Example Domain">
  <script type="application/ld+json">{"@context":"https://schema.org","@type":"Organization","name":"Example"}</script>
</head>
<body>
  <h1>Example Domain</h1>
  <p>Contact us at hello@example.com or call +1 415 555 0100.</p>
  <a href="/about">About</a>
  <a href="https://www.iana.org/domains/example">More information</a>
</body>
</html>"#;

pub struct FakeHttp {
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeHttp {
    pub fn healthy() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpFetch for FakeHttp {
    async fn get(&self, url: &str) -> Result<HttpSnapshot, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProbeError::Network(format!("{url}: connection reset")));
        }
        let headers = [
            ("server", "nginx"),
            ("content-type", "text/html; charset=utf-8"),
            ("strict-transport-security", "max-age=31536000; includeSubDomains"),
            ("content-security-policy", "default-src 'self'"),
            ("x-frame-options", "DENY"),
            ("x-content-type-options", "nosniff"),
            ("referrer-policy", "strict-origin-when-cross-origin"),
            ("permissions-policy", "camera=()"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Ok(HttpSnapshot {
            requested_url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            headers,
            body: HOMEPAGE.to_string(),
            body_bytes: HOMEPAGE.len(),
            truncated: false,
            elapsed_ms: 120,
        })
    }
}

/// Stands in for the TLS probe, which dials the network directly.
pub struct FakeTls {
    clock: Arc<dyn Clock>,
    fail: bool,
}

impl FakeTls {
    pub fn new(clock: Arc<dyn Clock>, fail: bool) -> Self {
        Self { clock, fail }
    }
}

#[async_trait]
impl Probe for FakeTls {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Tls
    }

    async fn run(&self, target: &Target, _ctx: &ProbeContext) -> ProbeResult {
        if self.fail {
            return ProbeResult::failed(
                ProbeKind::Tls,
                ProbeError::Handshake("no certificate presented".into()),
                Duration::from_millis(5),
            );
        }
        let now = self.clock.now();
        let info = CertificateInfo {
            subject_name: format!("CN={}", target.host()),
            issuer_name: "CN=Test CA".into(),
            not_before: now - ChronoDuration::days(30),
            not_after: now + ChronoDuration::days(300),
            days_until_expiry: 300,
            subject_alt_names: vec![target.host().to_string()],
        };
        ProbeResult::success(
            ProbeData::Tls(TlsData {
                is_valid: true,
                certificate_info: info,
            }),
            Duration::from_millis(5),
        )
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub dns: Arc<FakeDns>,
    pub whois: Arc<FakeWhois>,
    pub http: Arc<FakeHttp>,
    pub tls_fails: bool,
    pub config: Config,
    pub data: ScanData,
}

impl Harness {
    pub fn healthy() -> Self {
        let mut config = Config::default();
        config.probes.retry = RetryPolicy::no_retry();
        Self {
            clock: Arc::new(ManualClock::new(Utc::now())),
            dns: Arc::new(FakeDns::healthy()),
            whois: Arc::new(FakeWhois::healthy()),
            http: Arc::new(FakeHttp::healthy()),
            tls_fails: false,
            config,
            data: ScanData::bundled().expect("bundled data"),
        }
    }

    pub fn broken() -> Self {
        Self {
            dns: Arc::new(FakeDns::failing()),
            whois: Arc::new(FakeWhois::failing()),
            http: Arc::new(FakeHttp::failing()),
            tls_fails: true,
            ..Self::healthy()
        }
    }

    pub fn builder(&self) -> PipelineBuilder {
        Pipeline::builder(self.config.clone(), self.data.clone())
            .clock(self.clock.clone())
            .dns_lookup(self.dns.clone())
            .whois_transport(self.whois.clone())
            .http_fetch(self.http.clone())
            .replace_probe(Arc::new(FakeTls::new(self.clock.clone(), self.tls_fails)))
    }

    pub fn pipeline(&self) -> Pipeline {
        self.builder().build().expect("pipeline")
    }
}
