// src/core/signatures.rs

//! Technology signature database.
//!
//! Signatures are loaded from TOML and compiled once. Every pattern names the
//! part of the response it inspects (a header, the cookies, a meta tag, script
//! or stylesheet URLs, the body, or a DNS record type) and how much confidence
//! a match contributes. Capture group 1, when present, is the version.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::core::error::{Error, Result};
use crate::core::models::{RecordKind, TechCategory};

const WHAT: &str = "signature database";

/// Where a pattern looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A response header, by lowercase name.
    Header(String),
    /// All `set-cookie` values joined with `; `.
    Cookie,
    /// `<meta name=...>` content, by lowercase name.
    Meta(String),
    ScriptSrc,
    LinkHref,
    Body,
    /// Values of DNS records of one type (CNAME, NS or MX).
    Dns(RecordKind),
}

#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: Source,
    pub regex: Regex,
    pub confidence: u8,
}

impl Pattern {
    /// `None` when the pattern does not match. `Some(version)` otherwise, where
    /// `version` is the non-empty first capture group, if any.
    pub fn find(&self, text: &str) -> Option<Option<String>> {
        self.regex.captures(text).map(|caps| {
            caps.get(1)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty())
        })
    }
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub category: TechCategory,
    pub patterns: Vec<Pattern>,
}

#[derive(Debug, Clone)]
pub struct SignatureDb {
    version: String,
    signatures: Vec<Signature>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDb {
    version: String,
    #[serde(rename = "technology", default)]
    technologies: Vec<RawSignature>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSignature {
    name: String,
    category: TechCategory,
    patterns: Vec<RawPattern>,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
enum RawSource {
    Header,
    Cookie,
    Meta,
    ScriptSrc,
    LinkHref,
    Body,
    Dns,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPattern {
    source: RawSource,
    name: Option<String>,
    record: Option<RecordKind>,
    regex: String,
    #[serde(default = "default_confidence")]
    confidence: u8,
}

fn default_confidence() -> u8 {
    100
}

impl SignatureDb {
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawDb = toml::from_str(content).map_err(|e| Error::data(WHAT, e))?;
        let signatures = raw
            .technologies
            .into_iter()
            .map(compile_signature)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            version: raw.version,
            signatures,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Whether any signature inspects DNS records of `kind`.
    pub fn uses_dns(&self, kind: RecordKind) -> bool {
        self.signatures
            .iter()
            .flat_map(|s| &s.patterns)
            .any(|p| p.source == Source::Dns(kind))
    }
}

fn compile_signature(raw: RawSignature) -> Result<Signature> {
    if raw.patterns.is_empty() {
        return Err(Error::data(WHAT, format!("'{}' has no patterns", raw.name)));
    }
    let patterns = raw
        .patterns
        .into_iter()
        .map(|p| compile_pattern(&raw.name, p))
        .collect::<Result<Vec<_>>>()?;
    Ok(Signature {
        name: raw.name,
        category: raw.category,
        patterns,
    })
}

fn compile_pattern(tech: &str, raw: RawPattern) -> Result<Pattern> {
    let named = |what: &str| {
        raw.name
            .as_ref()
            .map(|n| n.to_ascii_lowercase())
            .ok_or_else(|| Error::data(WHAT, format!("'{tech}': {what} pattern needs a name")))
    };
    let source = match raw.source {
        RawSource::Header => Source::Header(named("header")?),
        RawSource::Meta => Source::Meta(named("meta")?),
        RawSource::Cookie => Source::Cookie,
        RawSource::ScriptSrc => Source::ScriptSrc,
        RawSource::LinkHref => Source::LinkHref,
        RawSource::Body => Source::Body,
        RawSource::Dns => match raw.record {
            Some(kind @ (RecordKind::Cname | RecordKind::Ns | RecordKind::Mx)) => Source::Dns(kind),
            Some(other) => {
                return Err(Error::data(
                    WHAT,
                    format!("'{tech}': DNS patterns support CNAME, NS and MX, not {other}"),
                ))
            }
            None => {
                return Err(Error::data(WHAT, format!("'{tech}': dns pattern needs a record type")))
            }
        },
    };
    if raw.confidence == 0 || raw.confidence > 100 {
        return Err(Error::data(
            WHAT,
            format!("'{tech}': confidence must be within 1..=100"),
        ));
    }
    let regex = RegexBuilder::new(&raw.regex)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::data(WHAT, format!("'{tech}': bad regex '{}': {e}", raw.regex)))?;
    Ok(Pattern {
        source,
        regex,
        confidence: raw.confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = r#"
        version = "test-1"

        [[technology]]
        name = "Nginx"
        category = "web_server"
        patterns = [
            { source = "header", name = "Server", regex = 'nginx(?:/([\d.]+))?' },
        ]

        [[technology]]
        name = "Cloudflare"
        category = "cdn"
        patterns = [
            { source = "header", name = "cf-ray", regex = '.+', confidence = 80 },
            { source = "dns", record = "NS", regex = '\.ns\.cloudflare\.com$', confidence = 60 },
        ]
    "#;

    #[test]
    fn compiles_sources_and_defaults() {
        let db = SignatureDb::from_toml(DB).unwrap();
        assert_eq!(db.version(), "test-1");
        assert_eq!(db.len(), 2);
        let nginx = &db.signatures()[0];
        assert_eq!(nginx.patterns[0].source, Source::Header("server".into()));
        assert_eq!(nginx.patterns[0].confidence, 100);
        assert!(db.uses_dns(RecordKind::Ns));
        assert!(!db.uses_dns(RecordKind::Mx));
    }

    #[test]
    fn patterns_are_case_insensitive_and_capture_versions() {
        let db = SignatureDb::from_toml(DB).unwrap();
        let pattern = &db.signatures()[0].patterns[0];
        assert_eq!(pattern.find("NGINX/1.25.3"), Some(Some("1.25.3".into())));
        assert_eq!(pattern.find("nginx"), Some(None));
        assert_eq!(pattern.find("apache"), None);
    }

    #[test]
    fn rejects_bad_regex() {
        let broken = DB.replace(r"'.+'", "'(unclosed'");
        let err = SignatureDb::from_toml(&broken).unwrap_err();
        assert!(err.to_string().contains("bad regex"));
    }

    #[test]
    fn rejects_header_pattern_without_name() {
        let broken = DB.replace(r#"name = "cf-ray", "#, "");
        assert!(SignatureDb::from_toml(&broken).is_err());
    }

    #[test]
    fn rejects_unsupported_dns_record_type() {
        let broken = DB.replace(r#"record = "NS""#, r#"record = "TXT""#);
        assert!(SignatureDb::from_toml(&broken).is_err());
    }
}
