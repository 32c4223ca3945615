// src/core/scanner/headers_scanner.rs

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::core::models::{HeaderData, HeadersData, ProbeData, ProbeKind, ProbeResult, WeakHeader};
use crate::core::net::{HttpSnapshot, SharedHomepage};
use crate::core::scanner::{Probe, ProbeContext};
use crate::core::target::Target;

/// Six months, the minimum HSTS lifetime browsers accept for preloading.
const MIN_HSTS_MAX_AGE: u64 = 15_552_000;

/// Headers that reveal software names, checked regardless of configuration.
const DISCLOSURE_HEADERS: &[&str] = &["x-powered-by", "x-aspnet-version", "x-aspnetmvc-version", "x-generator"];

static MAX_AGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)max-age\s*=\s*(\d+)").unwrap());
static VERSION_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\s*\d").unwrap());

/// Audits the security headers of the shared homepage response.
pub struct HeadersProbe {
    homepage: Arc<SharedHomepage>,
    required: Vec<String>,
}

impl HeadersProbe {
    pub fn new(homepage: Arc<SharedHomepage>, required: Vec<String>) -> Self {
        Self { homepage, required }
    }
}

#[async_trait]
impl Probe for HeadersProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::SecurityHeaders
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> ProbeResult {
        let start = Instant::now();
        info!(target = %target, "Starting headers scan.");
        match self.homepage.fetch(target.host(), &ctx.retry, ctx.deadline).await {
            Ok(snapshot) => {
                info!(status = snapshot.status, "Received HTTP response for headers scan.");
                let data = analyze_headers(&snapshot, &self.required);
                info!(
                    missing = data.missing.len(),
                    weak = data.weak.len(),
                    "Headers scan finished."
                );
                ProbeResult::success(ProbeData::SecurityHeaders(data), start.elapsed())
            }
            Err(e) => {
                warn!(target = %target, error = %e, "HTTP request failed for headers scan.");
                ProbeResult::failed(ProbeKind::SecurityHeaders, e, start.elapsed())
            }
        }
    }
}

/// Classifies each required header as present or missing, flags weak
/// configurations, and lists headers that leak implementation details.
pub fn analyze_headers(snapshot: &HttpSnapshot, required: &[String]) -> HeadersData {
    let mut data = HeadersData {
        url: snapshot.final_url.clone(),
        https: snapshot.is_https(),
        status_code: snapshot.status,
        ..HeadersData::default()
    };

    for name in required {
        let name = name.to_ascii_lowercase();
        match snapshot.header(&name) {
            Some(value) => {
                debug!(header_name = %name, value, "Header found.");
                if let Some(reason) = weakness(&name, value, data.https) {
                    data.weak.push(WeakHeader {
                        name: name.clone(),
                        reason,
                    });
                }
                data.present.push(HeaderData {
                    name,
                    value: value.to_string(),
                });
            }
            None => {
                debug!(header_name = %name, "Header not found.");
                data.missing.push(name);
            }
        }
    }

    if let Some(server) = snapshot.header("server") {
        if VERSION_TOKEN.is_match(server) {
            data.disclosed.push(HeaderData {
                name: "server".into(),
                value: server.to_string(),
            });
        }
    }
    for name in DISCLOSURE_HEADERS {
        if let Some(value) = snapshot.header(name) {
            data.disclosed.push(HeaderData {
                name: (*name).to_string(),
                value: value.to_string(),
            });
        }
    }
    data
}

fn weakness(name: &str, value: &str, https: bool) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    match name {
        "strict-transport-security" => {
            if !https {
                return Some("ignored by browsers on plain HTTP".into());
            }
            match MAX_AGE.captures(value).and_then(|c| c[1].parse::<u64>().ok()) {
                Some(age) if age < MIN_HSTS_MAX_AGE => {
                    Some(format!("max-age={age} is shorter than {MIN_HSTS_MAX_AGE}"))
                }
                Some(_) => None,
                None => Some("max-age is missing".into()),
            }
        }
        "content-security-policy" => {
            let unsafe_sources: Vec<&str> = ["'unsafe-inline'", "'unsafe-eval'"]
                .into_iter()
                .filter(|source| lower.contains(source))
                .collect();
            (!unsafe_sources.is_empty()).then(|| format!("allows {}", unsafe_sources.join(" and ")))
        }
        "x-frame-options" => {
            (!matches!(lower.trim(), "deny" | "sameorigin")).then(|| format!("unexpected value '{value}'"))
        }
        "x-content-type-options" => {
            (lower.trim() != "nosniff").then(|| format!("expected 'nosniff', got '{value}'"))
        }
        "referrer-policy" => {
            (lower.contains("unsafe-url")).then(|| "unsafe-url leaks full URLs to other origins".into())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(url: &str, headers: &[(&str, &str)]) -> HttpSnapshot {
        HttpSnapshot {
            requested_url: url.into(),
            final_url: url.into(),
            status: 200,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: String::new(),
            body_bytes: 0,
            truncated: false,
            elapsed_ms: 10,
        }
    }

    fn required() -> Vec<String> {
        [
            "strict-transport-security",
            "content-security-policy",
            "x-frame-options",
            "x-content-type-options",
        ]
        .map(String::from)
        .to_vec()
    }

    #[test]
    fn classifies_present_and_missing() {
        let snap = snapshot(
            "https://example.com/",
            &[
                ("strict-transport-security", "max-age=31536000; includeSubDomains"),
                ("x-content-type-options", "nosniff"),
            ],
        );
        let data = analyze_headers(&snap, &required());
        assert!(data.https);
        assert_eq!(data.present.len(), 2);
        assert_eq!(data.missing, vec!["content-security-policy", "x-frame-options"]);
        assert!(data.weak.is_empty());
    }

    #[test]
    fn flags_weak_values() {
        let snap = snapshot(
            "https://example.com/",
            &[
                ("strict-transport-security", "max-age=300"),
                ("content-security-policy", "default-src 'self' 'unsafe-inline'"),
                ("x-frame-options", "ALLOW-FROM https://a.example"),
                ("x-content-type-options", "nosniff"),
            ],
        );
        let data = analyze_headers(&snap, &required());
        let weak: Vec<&str> = data.weak.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(
            weak,
            vec!["strict-transport-security", "content-security-policy", "x-frame-options"]
        );
        assert!(data.weak[1].reason.contains("'unsafe-inline'"));
    }

    #[test]
    fn hsts_over_plain_http_is_weak() {
        let snap = snapshot("http://example.com/", &[("strict-transport-security", "max-age=31536000")]);
        let data = analyze_headers(&snap, &required());
        assert!(!data.https);
        assert_eq!(data.weak.len(), 1);
    }

    #[test]
    fn versioned_server_header_is_disclosed() {
        let snap = snapshot(
            "https://example.com/",
            &[("server", "Apache/2.4.57 (Ubuntu)"), ("x-powered-by", "PHP/8.2.1")],
        );
        let data = analyze_headers(&snap, &[]);
        let disclosed: Vec<&str> = data.disclosed.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(disclosed, vec!["server", "x-powered-by"]);

        let bare = snapshot("https://example.com/", &[("server", "cloudflare")]);
        assert!(analyze_headers(&bare, &[]).disclosed.is_empty());
    }
}
