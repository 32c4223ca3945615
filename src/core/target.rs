// src/core/target.rs

//! Target parsing and normalization.
//!
//! Everything a user might paste (`Example.com`, `https://www.example.com/a?b`,
//! `bücher.de`, `192.0.2.1`, `[2001:db8::1]:443`) is reduced to a lowercase
//! ASCII host before any probe sees it. Internationalized names are converted to
//! punycode by the `url` crate's IDNA processing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use url::{Host, Url};

use crate::core::data::PublicSuffixes;
use crate::core::error::{Error, Result};

const MAX_INPUT_LEN: usize = 2048;
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A validated scan target: either an ASCII domain name or an IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    host: String,
    ip: Option<IpAddr>,
}

impl Target {
    /// Parses and validates a user-supplied target string.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTarget`] when the input is empty, is not a URL or
    /// host, or violates the domain-label grammar.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_target(input, "target is empty"));
        }
        if trimmed.len() > MAX_INPUT_LEN {
            return Err(Error::invalid_target(input, "target is too long"));
        }

        if let Ok(ip) = trimmed.parse::<IpAddr>() {
            return Ok(Self::from_ip(ip));
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };
        let url = Url::parse(&with_scheme)
            .map_err(|e| Error::invalid_target(input, format!("not a valid host: {e}")))?;

        match url.host() {
            Some(Host::Ipv4(ip)) => Ok(Self::from_ip(IpAddr::V4(ip))),
            Some(Host::Ipv6(ip)) => Ok(Self::from_ip(IpAddr::V6(ip))),
            Some(Host::Domain(domain)) => {
                let domain = domain.trim_end_matches('.').to_ascii_lowercase();
                validate_domain(&domain).map_err(|reason| Error::invalid_target(input, reason))?;
                Ok(Self {
                    host: domain,
                    ip: None,
                })
            }
            None => Err(Error::invalid_target(input, "no host found")),
        }
    }

    fn from_ip(ip: IpAddr) -> Self {
        Self {
            host: ip.to_string(),
            ip: Some(ip),
        }
    }

    /// The normalized ASCII host (punycode for IDNs).
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn is_ip(&self) -> bool {
        self.ip.is_some()
    }

    /// Top-level label of a domain target, `None` for IPs.
    pub fn tld(&self) -> Option<&str> {
        if self.is_ip() {
            return None;
        }
        self.host.rsplit('.').next()
    }

    /// The registered name the host belongs to (`example.co.uk` for
    /// `blog.example.co.uk`). Mail, zone and registration records live there.
    /// IPs are returned unchanged.
    pub fn registrable_domain(&self, suffixes: &PublicSuffixes) -> &str {
        if self.is_ip() {
            return &self.host;
        }
        suffixes.registrable_domain(&self.host)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// Checks an ASCII, lowercase domain name against the LDH label grammar.
fn validate_domain(domain: &str) -> std::result::Result<(), String> {
    if domain.is_empty() {
        return Err("domain is empty".into());
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(format!("domain exceeds {MAX_DOMAIN_LEN} characters"));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err("domain must contain at least two labels".into());
    }

    for label in &labels {
        if label.is_empty() {
            return Err("domain contains an empty label".into());
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(format!("label '{label}' exceeds {MAX_LABEL_LEN} characters"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(format!("label '{label}' contains invalid characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{label}' starts or ends with a hyphen"));
        }
    }

    if let Some(tld) = labels.last() {
        if tld.bytes().all(|b| b.is_ascii_digit()) {
            return Err("top-level label cannot be numeric".into());
        }
    }
    Ok(())
}
