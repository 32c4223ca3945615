// src/core/scanner/ssl_scanner.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use native_tls::{HandshakeError, TlsConnector};
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, warn};
use x509_parser::prelude::*;

use crate::config::TlsProbeConfig;
use crate::core::clock::Clock;
use crate::core::error::ProbeError;
use crate::core::models::{CertificateInfo, ProbeData, ProbeKind, ProbeResult, TlsData};
use crate::core::retry::retry;
use crate::core::scanner::{Probe, ProbeContext};
use crate::core::target::Target;

/// Connects on the TLS port and inspects the leaf certificate.
///
/// The handshake is first attempted with full verification. When that is
/// rejected the connection is retried without verification so the certificate
/// can still be reported, marked invalid.
pub struct TlsProbe {
    config: TlsProbeConfig,
    clock: Arc<dyn Clock>,
    source: Arc<dyn CertificateSource>,
}

/// A certificate as it came off the wire.
#[derive(Debug, Clone)]
pub struct PeerCertificate {
    pub der: Vec<u8>,
    /// Why verification failed, if it did.
    pub rejected: Option<String>,
}

/// Blocking fetch of a host's leaf certificate. Runs on the blocking pool and
/// must bound itself with the socket timeouts in `config`.
pub trait CertificateSource: Send + Sync {
    fn fetch(&self, host: &str, config: &TlsProbeConfig) -> Result<PeerCertificate, ProbeError>;
}

/// Dials the host with native-tls.
#[derive(Debug, Default)]
pub struct NativeTlsSource;

impl CertificateSource for NativeTlsSource {
    fn fetch(&self, host: &str, config: &TlsProbeConfig) -> Result<PeerCertificate, ProbeError> {
        fetch_certificate(host, config)
    }
}

impl TlsProbe {
    pub fn new(config: TlsProbeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            source: Arc::new(NativeTlsSource),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CertificateSource>) -> Self {
        self.source = source;
        self
    }

    /// One attempt on the blocking pool, with socket timeouts cut down to
    /// what is left of the probe's budget.
    async fn attempt(&self, host: &str, budget_end: tokio::time::Instant) -> Result<PeerCertificate, ProbeError> {
        let left = budget_end.saturating_duration_since(tokio::time::Instant::now());
        if left.is_zero() {
            return Err(ProbeError::TimedOut(self.config.timeout_ms));
        }
        let left_ms = u64::try_from(left.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut config = self.config.clone();
        config.connect_timeout_ms = config.connect_timeout_ms.min(left_ms);
        config.io_timeout_ms = config.io_timeout_ms.min(left_ms);

        let host = host.to_string();
        let source = Arc::clone(&self.source);
        debug!("Spawning blocking task for TLS connection.");
        spawn_blocking(move || source.fetch(&host, &config))
            .await
            .unwrap_or_else(|e| {
                error!(panic = %e, "Blocking SSL scan task panicked!");
                Err(ProbeError::Network(format!("TLS task failed: {e}")))
            })
    }
}

#[async_trait]
impl Probe for TlsProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Tls
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> ProbeResult {
        let start = Instant::now();
        let budget_end = ctx.probe_deadline(tokio::time::Instant::now());
        info!(target = %target, port = self.config.port, "Starting SSL/TLS scan.");
        let host = target.host();

        let fetched = retry(&ctx.retry, budget_end, "tls", || self.attempt(host, budget_end)).await;

        let peer = match fetched {
            Ok(peer) => peer,
            Err(ProbeError::TimedOut(_)) if tokio::time::Instant::now() >= budget_end => {
                warn!(target = %target, "TLS scan ran out of time.");
                return ProbeResult::timed_out(ProbeKind::Tls, start.elapsed(), ctx.timeout);
            }
            Err(e) => {
                warn!(target = %target, error = %e, "TLS scan failed.");
                return ProbeResult::failed(ProbeKind::Tls, e, start.elapsed());
            }
        };

        match summarize_certificate(&peer.der, peer.rejected.is_none(), self.clock.now()) {
            Ok(data) => {
                info!(
                    valid = data.is_valid,
                    days_until_expiry = data.certificate_info.days_until_expiry,
                    "SSL/TLS scan finished."
                );
                let warnings = peer
                    .rejected
                    .map(|reason| vec![format!("certificate failed verification: {reason}")])
                    .unwrap_or_default();
                ProbeResult::partial(ProbeData::Tls(data), start.elapsed(), warnings)
            }
            Err(e) => ProbeResult::failed(ProbeKind::Tls, e, start.elapsed()),
        }
    }
}

fn fetch_certificate(host: &str, config: &TlsProbeConfig) -> Result<PeerCertificate, ProbeError> {
    match handshake(host, config, true) {
        Ok(der) => Ok(PeerCertificate { der, rejected: None }),
        Err(ProbeError::Handshake(reason)) => {
            debug!(host, reason = %reason, "Verified handshake rejected, retrying without verification.");
            let der = handshake(host, config, false)?;
            Ok(PeerCertificate {
                der,
                rejected: Some(reason),
            })
        }
        Err(e) => Err(e),
    }
}

fn handshake(host: &str, config: &TlsProbeConfig, verify: bool) -> Result<Vec<u8>, ProbeError> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(!verify)
        .danger_accept_invalid_hostnames(!verify)
        .build()
        .map_err(|e| ProbeError::Handshake(format!("TlsConnector error: {e}")))?;

    let stream = connect(host, config)?;
    let io_timeout = Duration::from_millis(config.io_timeout_ms);
    stream
        .set_read_timeout(Some(io_timeout))
        .and_then(|()| stream.set_write_timeout(Some(io_timeout)))
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    debug!(host, verify, "Performing TLS handshake.");
    let stream = connector.connect(host, stream).map_err(|e| match e {
        HandshakeError::Failure(e) => ProbeError::Handshake(e.to_string()),
        HandshakeError::WouldBlock(_) => ProbeError::TimedOut(config.io_timeout_ms),
    })?;

    let cert = stream
        .peer_certificate()
        .map_err(|e| ProbeError::Handshake(format!("could not read peer certificate: {e}")))?
        .ok_or_else(|| ProbeError::Handshake("server presented no certificate".into()))?;
    cert.to_der()
        .map_err(|e| ProbeError::Parse(format!("could not convert certificate to DER: {e}")))
}

fn connect(host: &str, config: &TlsProbeConfig) -> Result<TcpStream, ProbeError> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    let addrs = (host, config.port)
        .to_socket_addrs()
        .map_err(|e| ProbeError::Network(format!("could not resolve {host}: {e}")))?;

    let mut last_error = ProbeError::Network(format!("{host} has no addresses"));
    for addr in addrs {
        debug!(%addr, "Connecting TCP stream.");
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                last_error = ProbeError::TimedOut(config.connect_timeout_ms);
            }
            Err(e) => last_error = ProbeError::Network(format!("TCP connection error: {e}")),
        }
    }
    Err(last_error)
}

/// Extracts the report fields from a DER certificate. `verified` is whether
/// the chain and hostname checked out; the certificate is valid only if it
/// did and `now` falls inside the validity window.
pub fn summarize_certificate(der: &[u8], verified: bool, now: DateTime<Utc>) -> Result<TlsData, ProbeError> {
    let (_, x509) = parse_x509_certificate(der)
        .map_err(|e| ProbeError::Parse(format!("X.509 parse error: {e}")))?;
    debug!(subject = %x509.subject(), issuer = %x509.issuer(), "Parsed certificate.");

    let validity = x509.validity();
    let not_before = asn1_time_to_chrono_utc(&validity.not_before);
    let not_after = asn1_time_to_chrono_utc(&validity.not_after);

    let subject_alt_names = match x509.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                GeneralName::IPAddress(bytes) => ip_from_bytes(bytes),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "Malformed subjectAltName extension.");
            Vec::new()
        }
    };

    Ok(TlsData {
        is_valid: verified && within_validity(not_before, not_after, now),
        certificate_info: CertificateInfo {
            subject_name: x509.subject().to_string(),
            issuer_name: x509.issuer().to_string(),
            not_before,
            not_after,
            days_until_expiry: not_after.signed_duration_since(now).num_days(),
            subject_alt_names,
        },
    })
}

fn within_validity(not_before: DateTime<Utc>, not_after: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= not_before && now <= not_after
}

fn ip_from_bytes(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes)
            .ok()
            .map(|octets| std::net::Ipv4Addr::from(octets).to_string()),
        16 => <[u8; 16]>::try_from(bytes)
            .ok()
            .map(|octets| std::net::Ipv6Addr::from(octets).to_string()),
        _ => None,
    }
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use crate::core::retry::RetryPolicy;
    use chrono::TimeZone;
    use std::io::Write;
    use std::net::TcpListener;

    fn config(port: u16) -> TlsProbeConfig {
        TlsProbeConfig {
            port,
            connect_timeout_ms: 1_000,
            io_timeout_ms: 1_000,
            ..TlsProbeConfig::default()
        }
    }

    fn ctx() -> ProbeContext {
        ProbeContext::new(
            tokio::time::Instant::now() + Duration::from_secs(5),
            Duration::from_secs(5),
            RetryPolicy::no_retry(),
        )
    }

    #[test]
    fn validity_window_is_inclusive() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        assert!(within_validity(start, end, start));
        assert!(within_validity(start, end, end));
        assert!(!within_validity(start, end, end + chrono::Duration::seconds(1)));
    }

    #[test]
    fn san_ip_addresses_are_formatted() {
        assert_eq!(ip_from_bytes(&[192, 0, 2, 1]).as_deref(), Some("192.0.2.1"));
        assert_eq!(ip_from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = summarize_certificate(b"not a certificate", true, Utc::now()).unwrap_err();
        assert!(matches!(err, ProbeError::Parse(_)));
    }

    #[tokio::test]
    async fn plain_tcp_server_fails_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for stream in listener.incoming().take(2) {
                let mut stream = stream.unwrap();
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            }
        });

        let probe = TlsProbe::new(config(port), Arc::new(SystemClock));
        let target = Target::parse("127.0.0.1").unwrap();
        let result = probe.run(&target, &ctx()).await;
        assert_eq!(result.status(), crate::core::models::ProbeStatus::Failed);
        assert!(matches!(result.error(), Some(ProbeError::Handshake(_))));
    }

    #[tokio::test]
    async fn closed_port_is_a_network_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let probe = TlsProbe::new(config(port), Arc::new(SystemClock));
        let target = Target::parse("127.0.0.1").unwrap();
        let result = probe.run(&target, &ctx()).await;
        assert!(matches!(result.error(), Some(ProbeError::Network(_))));
    }

    /// Fails with the queued errors, one per call, then keeps failing with a
    /// handshake error.
    struct ScriptedSource {
        errors: std::sync::Mutex<Vec<ProbeError>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedSource {
        fn new(mut errors: Vec<ProbeError>) -> Self {
            errors.reverse();
            Self {
                errors: std::sync::Mutex::new(errors),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl CertificateSource for ScriptedSource {
        fn fetch(&self, _host: &str, config: &TlsProbeConfig) -> Result<PeerCertificate, ProbeError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            assert!(config.connect_timeout_ms <= 1_000);
            Err(self
                .errors
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| ProbeError::Handshake("self-signed".into())))
        }
    }

    #[tokio::test]
    async fn transient_connect_failures_are_retried() {
        let source = Arc::new(ScriptedSource::new(vec![
            ProbeError::Network("connection reset".into()),
            ProbeError::Network("connection reset".into()),
        ]));
        let probe = TlsProbe::new(config(443), Arc::new(SystemClock)).with_source(source.clone());
        let ctx = ProbeContext::new(
            tokio::time::Instant::now() + Duration::from_secs(5),
            Duration::from_secs(5),
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );

        let result = probe.run(&Target::parse("example.com").unwrap(), &ctx).await;

        assert_eq!(source.calls(), 3);
        assert!(matches!(result.error(), Some(ProbeError::Handshake(_))));
    }

    #[tokio::test]
    async fn nothing_is_dialled_once_the_budget_is_spent() {
        let source = Arc::new(ScriptedSource::new(Vec::new()));
        let probe = TlsProbe::new(config(443), Arc::new(SystemClock)).with_source(source.clone());
        let ctx = ProbeContext::new(
            tokio::time::Instant::now(),
            Duration::from_secs(5),
            RetryPolicy::default(),
        );

        let result = probe.run(&Target::parse("example.com").unwrap(), &ctx).await;

        assert_eq!(source.calls(), 0);
        assert_eq!(result.status(), crate::core::models::ProbeStatus::TimedOut);
    }
}
