// src/config.rs

//! Runtime configuration.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working configuration. Values are layered: defaults, then the TOML file,
//! then `VANGUARD_INTEL_*` environment variables.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{Error, Result};
use crate::core::models::ProbeKind;
use crate::core::retry::RetryPolicy;
use crate::core::scoring::{GradeTable, ScoringWeights};

const ENV_PREFIX: &str = "VANGUARD_INTEL_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub probes: ProbesConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub scoring: ScoringConfig,
    pub data: DataConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    /// `config.toml` in the platform config directory, if one can be determined.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "vanguard-rs", env!("CARGO_PKG_NAME"))
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reads `path`, or the default location when it exists, or falls back to
    /// the built-in defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(default) => Self::from_file(default)?,
                None => Self::default(),
            },
        };
        let config = config.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (`VANGUARD_INTEL_` prefix).
    pub fn merge_env(mut self) -> Self {
        if let Some(n) = env_parse("CONCURRENCY") {
            self.orchestrator.concurrency = n;
        }
        if let Some(ms) = env_parse("DEADLINE_MS") {
            self.orchestrator.deadline_ms = ms;
        }
        if let Some(n) = env_parse("RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests = n;
        }
        if let Some(secs) = env_parse("RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = secs;
        }
        if let Ok(agent) = std::env::var(format!("{ENV_PREFIX}USER_AGENT")) {
            self.probes.http.user_agent = agent;
        }
        if let Ok(dir) = std::env::var(format!("{ENV_PREFIX}DATA_DIR")) {
            let dir = PathBuf::from(dir);
            self.data.whois_servers = Some(dir.join("whois_servers.toml"));
            self.data.dnsbl_zones = Some(dir.join("dnsbl_zones.toml"));
            self.data.signatures = Some(dir.join("signatures.toml"));
            self.data.rules = Some(dir.join("rules.toml"));
            self.data.public_suffixes = Some(dir.join("public_suffixes.toml"));
        }
        self
    }

    /// Rejects values that would make the pipeline misbehave rather than fail.
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.concurrency == 0 {
            return Err(Error::Config("orchestrator.concurrency must be at least 1".into()));
        }
        if self.orchestrator.deadline_ms == 0 {
            return Err(Error::Config("orchestrator.deadline_ms must be positive".into()));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(Error::Config(
                "rate_limit.max_requests and rate_limit.window_secs must be positive".into(),
            ));
        }
        if self.probes.retry.max_attempts == 0 {
            return Err(Error::Config("probes.retry.max_attempts must be at least 1".into()));
        }
        if let Some(kind) = ProbeKind::all().find(|kind| self.timeout_for(*kind).is_zero()) {
            return Err(Error::Config(format!("timeout for probe '{kind}' must be positive")));
        }
        self.scoring.weights.validate()?;
        self.scoring.grades.validate()?;
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.orchestrator.deadline_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.orchestrator.grace_ms)
    }

    /// Per-probe time budget, before it is capped by the scan deadline.
    pub fn timeout_for(&self, kind: ProbeKind) -> Duration {
        let ms = match kind {
            ProbeKind::Dns => self.probes.dns.timeout_ms,
            ProbeKind::Whois => self.probes.whois.timeout_ms,
            ProbeKind::Blacklist => self.probes.blacklist.timeout_ms,
            ProbeKind::Tls => self.probes.tls.timeout_ms,
            ProbeKind::SecurityHeaders => self.probes.headers.timeout_ms,
            ProbeKind::Technology => self.probes.technology.timeout_ms,
            ProbeKind::Content => self.probes.content.timeout_ms,
        };
        Duration::from_millis(ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum probes running at once.
    pub concurrency: usize,
    /// Overall scan deadline.
    pub deadline_ms: u64,
    /// Extra time after the deadline before outstanding tasks are aborted.
    pub grace_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            deadline_ms: 30_000,
            grace_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbesConfig {
    pub retry: RetryPolicy,
    pub dns: DnsProbeConfig,
    pub whois: WhoisProbeConfig,
    pub blacklist: BlacklistProbeConfig,
    pub tls: TlsProbeConfig,
    pub http: HttpConfig,
    pub headers: HeadersProbeConfig,
    pub technology: TechnologyProbeConfig,
    pub content: ContentProbeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsProbeConfig {
    pub timeout_ms: u64,
    /// Budget for a single query.
    pub query_timeout_ms: u64,
    pub dkim_selectors: Vec<String>,
    /// Service labels queried for SRV records, e.g. `_sip._tls`.
    pub srv_services: Vec<String>,
}

impl Default for DnsProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            query_timeout_ms: 3_000,
            dkim_selectors: ["google", "selector1", "selector2", "default", "dkim", "k1", "mail"]
                .into_iter()
                .map(String::from)
                .collect(),
            srv_services: ["_sip._tls", "_sipfederationtls._tcp", "_autodiscover._tcp", "_xmpp-server._tcp"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhoisProbeConfig {
    pub timeout_ms: u64,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_response_bytes: usize,
    /// Follow one registrar referral from a thin registry.
    pub follow_referrals: bool,
}

impl Default for WhoisProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            port: 43,
            connect_timeout_ms: 3_000,
            read_timeout_ms: 5_000,
            max_response_bytes: 256 * 1024,
            follow_referrals: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistProbeConfig {
    pub timeout_ms: u64,
    /// Budget for each zone query.
    pub zone_timeout_ms: u64,
    /// IPv4 addresses checked per target.
    pub max_addresses: usize,
}

impl Default for BlacklistProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 6_000,
            zone_timeout_ms: 2_000,
            max_addresses: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsProbeConfig {
    pub timeout_ms: u64,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for TlsProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            port: 443,
            connect_timeout_ms: 4_000,
            io_timeout_ms: 4_000,
        }
    }
}

/// The shared homepage client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub request_timeout_ms: u64,
    pub max_redirects: usize,
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("VanguardIntel/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_ms: 8_000,
            max_redirects: 5,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadersProbeConfig {
    pub timeout_ms: u64,
    /// Lowercase names of the headers every site is expected to send.
    pub required: Vec<String>,
}

impl Default for HeadersProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            required: [
                "content-security-policy",
                "strict-transport-security",
                "x-frame-options",
                "x-content-type-options",
                "referrer-policy",
                "permissions-policy",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnologyProbeConfig {
    pub timeout_ms: u64,
}

impl Default for TechnologyProbeConfig {
    fn default() -> Self {
        Self { timeout_ms: 12_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentProbeConfig {
    pub timeout_ms: u64,
}

impl Default for ContentProbeConfig {
    fn default() -> Self {
        Self { timeout_ms: 12_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound for DNS answers.
    pub dns_ttl_secs: u64,
    /// Lower bound for DNS answers, also used for empty answers.
    pub dns_min_ttl_secs: u64,
    pub whois_ttl_secs: u64,
    pub http_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dns_ttl_secs: 300,
            dns_min_ttl_secs: 30,
            whois_ttl_secs: 86_400,
            http_ttl_secs: 120,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub grades: GradeTable,
}

/// Operator overrides for the bundled data files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub whois_servers: Option<PathBuf>,
    pub dnsbl_zones: Option<PathBuf>,
    pub signatures: Option<PathBuf>,
    pub rules: Option<PathBuf>,
    pub public_suffixes: Option<PathBuf>,
}
