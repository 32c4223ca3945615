// src/core/data.rs

//! Operational data: WHOIS server table, DNSBL zones, public suffixes,
//! technology signatures and the rule catalogue. Loaded once at startup and shared read-only by
//! every scan. The bundled copies under `data/` are compiled in; the config
//! can point any of them at an operator-maintained file instead.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::core::error::{Error, Result};
use crate::core::knowledge_base::RuleSet;
use crate::core::signatures::SignatureDb;

const BUNDLED_WHOIS_SERVERS: &str = include_str!("../../data/whois_servers.toml");
const BUNDLED_DNSBL_ZONES: &str = include_str!("../../data/dnsbl_zones.toml");
const BUNDLED_SIGNATURES: &str = include_str!("../../data/signatures.toml");
const BUNDLED_RULES: &str = include_str!("../../data/rules.toml");
const BUNDLED_PUBLIC_SUFFIXES: &str = include_str!("../../data/public_suffixes.toml");

/// TLD to WHOIS server mapping.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhoisServerTable {
    /// Used for TLDs missing from `servers`.
    pub default: String,
    servers: HashMap<String, String>,
}

impl WhoisServerTable {
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut table: Self =
            toml::from_str(content).map_err(|e| Error::data("WHOIS server table", e))?;
        table.servers = table
            .servers
            .into_iter()
            .map(|(tld, server)| (tld.trim_start_matches('.').to_ascii_lowercase(), server))
            .collect();
        Ok(table)
    }

    pub fn server_for(&self, tld: &str) -> &str {
        self.servers
            .get(&tld.to_ascii_lowercase())
            .map_or(self.default.as_str(), String::as_str)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DnsblZones {
    zones: Vec<String>,
}

fn parse_zones(content: &str) -> Result<Vec<String>> {
    let parsed: DnsblZones = toml::from_str(content).map_err(|e| Error::data("DNSBL zones", e))?;
    let mut zones: Vec<String> = parsed
        .zones
        .into_iter()
        .map(|z| z.trim().trim_matches('.').to_ascii_lowercase())
        .filter(|z| !z.is_empty())
        .collect();
    zones.dedup();
    if zones.is_empty() {
        return Err(Error::data("DNSBL zones", "the zone list is empty"));
    }
    Ok(zones)
}

/// Suffixes under which names are registered (`co.uk`, `github.io`). Every
/// single label is implicitly one, so the table only lists deeper suffixes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublicSuffixes {
    #[serde(default)]
    version: String,
    suffixes: HashSet<String>,
}

impl PublicSuffixes {
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut table: Self =
            toml::from_str(content).map_err(|e| Error::data("public suffix list", e))?;
        table.suffixes = table
            .suffixes
            .into_iter()
            .map(|s| s.trim().trim_matches('.').to_ascii_lowercase())
            .filter(|s| s.contains('.'))
            .collect();
        Ok(table)
    }

    /// The registrable domain of `host`: the longest matching public suffix
    /// plus one label. A host that is itself a suffix is returned unchanged.
    pub fn registrable_domain<'a>(&self, host: &'a str) -> &'a str {
        let label_starts: Vec<usize> = std::iter::once(0)
            .chain(host.match_indices('.').map(|(i, _)| i + 1))
            .collect();
        // The longest suffix starts at the earliest label boundary.
        let suffix_label = label_starts
            .iter()
            .position(|&start| self.suffixes.contains(&host[start..]))
            .unwrap_or(label_starts.len().saturating_sub(1));
        match suffix_label.checked_sub(1) {
            Some(owner) => &host[label_starts[owner]..],
            None => host,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ScanData {
    pub whois_servers: WhoisServerTable,
    pub dnsbl_zones: Vec<String>,
    pub public_suffixes: PublicSuffixes,
    pub signatures: SignatureDb,
    pub rules: RuleSet,
}

impl ScanData {
    /// Loads every data set, from the configured path if there is one and
    /// from the bundled copy otherwise.
    pub fn load(config: &Config) -> Result<Self> {
        let paths = &config.data;
        let data = Self {
            whois_servers: WhoisServerTable::from_toml(&read_or(
                paths.whois_servers.as_deref(),
                BUNDLED_WHOIS_SERVERS,
            )?)?,
            dnsbl_zones: parse_zones(&read_or(paths.dnsbl_zones.as_deref(), BUNDLED_DNSBL_ZONES)?)?,
            public_suffixes: PublicSuffixes::from_toml(&read_or(
                paths.public_suffixes.as_deref(),
                BUNDLED_PUBLIC_SUFFIXES,
            )?)?,
            signatures: SignatureDb::from_toml(&read_or(
                paths.signatures.as_deref(),
                BUNDLED_SIGNATURES,
            )?)?,
            rules: RuleSet::from_toml(&read_or(paths.rules.as_deref(), BUNDLED_RULES)?)?,
        };
        info!(
            whois_servers = data.whois_servers.len(),
            dnsbl_zones = data.dnsbl_zones.len(),
            public_suffixes = data.public_suffixes.len(),
            signatures = data.signatures.len(),
            signature_version = data.signatures.version(),
            rules = data.rules.len(),
            "Operational data loaded."
        );
        Ok(data)
    }

    /// The compiled-in data, without consulting any configuration.
    pub fn bundled() -> Result<Self> {
        Self::load(&Config::default())
    }
}

fn read_or(path: Option<&Path>, bundled: &str) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| Error::data(path.display().to_string(), e)),
        None => Ok(bundled.to_string()),
    }
}
