// tests/pipeline.rs

mod support;

use std::sync::Arc;
use std::time::Duration;

use support::{FakeDns, Harness, DOMAIN};
use vanguard_intel::core::models::{BusinessModel, TechCategory};
use vanguard_intel::{
    Category, Error, Grade, ProbeData, ProbeKind, ProbeStatus, ScanStatus,
};

fn cache_hits(report: &vanguard_intel::ScanReport, name: &str) -> (u64, u64) {
    report
        .stats()
        .cache
        .iter()
        .find(|c| c.name == name)
        .map_or((0, 0), |c| (c.hits, c.misses))
}

#[tokio::test(start_paused = true)]
async fn healthy_site_produces_a_complete_report() {
    let harness = Harness::healthy();
    let pipeline = harness.pipeline();

    let report = pipeline.scan("client-a", "https://Example.COM/some/path").await.unwrap();

    assert_eq!(report.target(), DOMAIN);
    assert_eq!(report.probe_results().len(), ProbeKind::all().count());
    for kind in ProbeKind::all() {
        let result = report.probe(kind).unwrap();
        assert!(result.is_usable(), "{kind} was {}", result.status());
    }
    assert_eq!(report.probe(ProbeKind::Whois).unwrap().status(), ProbeStatus::Success);
    assert_eq!(report.category_scores().len(), 6);
    assert!(report.overall_score() >= 80, "score {}", report.overall_score());
    assert!(matches!(report.grade(), Grade::A | Grade::B));

    let names: Vec<&str> = report.technologies().iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"Cloudflare"), "{names:?}");
    assert!(names.contains(&"Google Workspace"), "{names:?}");
    assert!(names.contains(&"WordPress"), "{names:?}");
    let wordpress = report.technologies().iter().find(|t| t.name == "WordPress").unwrap();
    assert_eq!(wordpress.version.as_deref(), Some("6.5.2"));
    assert_eq!(wordpress.category, TechCategory::Cms);

    match report.probe(ProbeKind::Content).and_then(|r| r.data()) {
        Some(ProbeData::Content(content)) => {
            assert_eq!(content.emails, vec!["hello@example.com".to_string()]);
            assert_eq!(content.structured_data_types, vec!["Organization".to_string()]);
            assert_ne!(content.business.model, BusinessModel::Ecommerce);
        }
        other => panic!("unexpected content payload: {other:?}"),
    }

    // Recommendations are ordered by severity and carry unique keys.
    let recs = report.recommendations();
    assert!(recs.windows(2).all(|w| w[0].severity <= w[1].severity));
    let mut keys: Vec<&str> = recs.iter().map(|r| r.issue_key.as_str()).collect();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), recs.len());
}

#[tokio::test(start_paused = true)]
async fn subdomain_scan_checks_the_registered_domain() {
    let harness = Harness::healthy();
    let pipeline = harness.pipeline();

    let report = pipeline.scan("client-a", "blog.example.com").await.unwrap();

    assert_eq!(report.target(), "blog.example.com");
    assert_eq!(harness.whois.queries(), vec![DOMAIN.to_string()]);
    match report.probe(ProbeKind::Whois).and_then(|r| r.data()) {
        Some(ProbeData::Whois(whois)) => assert!(whois.registered),
        other => panic!("unexpected WHOIS payload: {other:?}"),
    }
    match report.probe(ProbeKind::Dns).and_then(|r| r.data()) {
        Some(ProbeData::Dns(dns)) => {
            assert!(dns.dmarc.is_some());
            assert!(dns.spf.is_some());
            assert!(!dns.dkim.is_empty());
        }
        other => panic!("unexpected DNS payload: {other:?}"),
    }
    let keys: Vec<&str> = report
        .recommendations()
        .iter()
        .map(|r| r.issue_key.as_str())
        .collect();
    for absent in ["REP_DOMAIN_UNREGISTERED", "DNS_DMARC_MISSING", "DNS_SPF_MISSING", "DNS_DKIM_MISSING"] {
        assert!(!keys.contains(&absent), "{absent} in {keys:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn second_scan_is_served_from_cache_until_entries_expire() {
    let harness = Harness::healthy();
    let pipeline = harness.pipeline();

    let first = pipeline.scan("client-a", DOMAIN).await.unwrap();
    let dns_calls = harness.dns.calls();
    let whois_calls = harness.whois.calls();
    let http_calls = harness.http.calls();
    assert!(dns_calls > 0);
    assert_eq!(http_calls, 1, "probes share one homepage fetch");
    let (_, first_misses) = cache_hits(&first, "dns");
    assert!(first_misses > 0);

    let second = pipeline.scan("client-a", DOMAIN).await.unwrap();
    assert_eq!(harness.dns.calls(), dns_calls);
    assert_eq!(harness.whois.calls(), whois_calls);
    assert_eq!(harness.http.calls(), http_calls);
    let (hits, misses) = cache_hits(&second, "dns");
    assert!(hits > 0);
    assert_eq!(misses, 0);
    assert_eq!(second.overall_score(), first.overall_score());

    // Past the DNS ceiling and the HTTP TTL, but well inside the WHOIS TTL.
    harness.clock.advance(Duration::from_secs(301));
    pipeline.scan("client-a", DOMAIN).await.unwrap();
    assert!(harness.dns.calls() > dns_calls);
    assert_eq!(harness.http.calls(), http_calls + 1);
    assert_eq!(harness.whois.calls(), whois_calls);
}

#[tokio::test(start_paused = true)]
async fn slow_blacklist_times_out_without_affecting_other_probes() {
    let mut harness = Harness::healthy();
    harness.dns = Arc::new(FakeDns::healthy().with_slow_zones(&harness.data.dnsbl_zones));
    harness.config.probes.blacklist.timeout_ms = 500;
    harness.config.probes.blacklist.zone_timeout_ms = 10_000;
    let pipeline = harness.pipeline();

    let report = pipeline.scan("client-a", DOMAIN).await.unwrap();

    let blacklist = report.probe(ProbeKind::Blacklist).unwrap();
    assert_eq!(blacklist.status(), ProbeStatus::TimedOut);
    assert!(blacklist.data().is_none());
    assert!(report.probe(ProbeKind::Dns).unwrap().is_usable());
    assert_eq!(report.probe(ProbeKind::Whois).unwrap().status(), ProbeStatus::Success);
    assert_eq!(report.status(), ScanStatus::PartiallyCompleted);
    // Reputation rules that need blacklist data are skipped, not failed.
    assert!(report
        .recommendations()
        .iter()
        .all(|r| !r.issue_key.starts_with("REP_BLACKLISTED")));
}

#[tokio::test]
async fn rate_limit_admits_the_quota_then_rejects_until_the_window_passes() {
    let mut harness = Harness::healthy();
    harness.config.rate_limit.max_requests = 2;
    harness.config.rate_limit.window_secs = 60;
    let pipeline = harness.pipeline();

    pipeline.scan("client-a", DOMAIN).await.unwrap();
    pipeline.scan("client-a", DOMAIN).await.unwrap();
    let dns_calls = harness.dns.calls();

    match pipeline.scan("client-a", DOMAIN).await {
        Err(Error::RateLimitExceeded { client, retry_after }) => {
            assert_eq!(client, "client-a");
            assert!(retry_after <= Duration::from_secs(60));
        }
        other => panic!("expected rate limit rejection, got {other:?}"),
    }
    // A rejected request never reaches the probes.
    assert_eq!(harness.dns.calls(), dns_calls);
    // Other clients have their own quota.
    pipeline.scan("client-b", DOMAIN).await.unwrap();

    harness.clock.advance(Duration::from_secs(61));
    pipeline.scan("client-a", DOMAIN).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn report_is_produced_when_every_probe_fails() {
    let harness = Harness::broken();
    let pipeline = harness.pipeline();

    let report = pipeline.scan("client-a", DOMAIN).await.unwrap();

    assert_eq!(report.status(), ScanStatus::PartiallyCompleted);
    assert_eq!(report.probe_results().len(), ProbeKind::all().count());
    for (kind, result) in report.probe_results() {
        assert!(
            matches!(result.status(), ProbeStatus::Failed | ProbeStatus::TimedOut),
            "{kind} was {}",
            result.status()
        );
        assert!(result.error().is_some());
    }
    assert!(report.technologies().is_empty());
    assert_eq!(report.category_scores().len(), 6);
    let keys: Vec<&str> = report.recommendations().iter().map(|r| r.issue_key.as_str()).collect();
    assert!(keys.contains(&"TLS_UNAVAILABLE"), "{keys:?}");
    assert!(keys.contains(&"TECH_DNS_PROBE_FAILED"), "{keys:?}");
    assert!(report.category_scores()[&Category::Technical] < 100);
}

#[tokio::test]
async fn invalid_targets_are_rejected_before_scanning() {
    let harness = Harness::healthy();
    let pipeline = harness.pipeline();

    for input in ["", "   ", "not a host!", "-bad-.com", "http://"] {
        match pipeline.scan("client-a", input).await {
            Err(Error::InvalidTarget { .. }) => {}
            other => panic!("{input:?}: expected InvalidTarget, got {other:?}"),
        }
    }
    assert_eq!(harness.dns.calls(), 0);
    assert_eq!(harness.http.calls(), 0);
}

#[tokio::test]
async fn reports_serialize_to_json() {
    let harness = Harness::healthy();
    let report = harness.pipeline().scan("client-a", DOMAIN).await.unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["target"], DOMAIN);
    assert!(json["probe_results"]["dns"].is_object());
    assert!(json["category_scores"]["seo"].is_number());
}

#[tokio::test]
#[ignore = "needs network access"]
async fn live_scan_of_example_com() {
    let config = vanguard_intel::Config::default();
    let data = vanguard_intel::ScanData::load(&config).unwrap();
    let pipeline = vanguard_intel::Pipeline::from_config(config, data).unwrap();

    let report = pipeline.scan("e2e", "example.com").await.unwrap();
    assert_eq!(report.probe_results().len(), ProbeKind::all().count());
    assert!(report.probe(ProbeKind::Dns).unwrap().is_usable());
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
}
