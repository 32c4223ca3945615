// src/core/scanner/content_scanner.rs

//! On-page SEO, performance, contact and business-model signals, all taken
//! from the shared homepage response.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::models::{
    BusinessModel, BusinessSignals, ContentData, ProbeData, ProbeKind, ProbeResult, SocialProfile,
};
use crate::core::net::{HttpSnapshot, SharedHomepage};
use crate::core::scanner::{Probe, ProbeContext};
use crate::core::target::Target;

const MAX_CONTACTS: usize = 20;
/// Keyword hits needed before a business model is claimed.
const MODEL_THRESHOLD: usize = 2;

static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}").unwrap());
static RE_PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+\d{1,3}[\s.-]?\(?\d{1,4}\)?(?:[\s.-]?\d{2,4}){2,4}").unwrap());
static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'’-]*").unwrap());

const SOCIAL_NETWORKS: &[(&str, &str)] = &[
    ("facebook.com", "Facebook"),
    ("twitter.com", "X"),
    ("x.com", "X"),
    ("linkedin.com", "LinkedIn"),
    ("instagram.com", "Instagram"),
    ("youtube.com", "YouTube"),
    ("github.com", "GitHub"),
    ("tiktok.com", "TikTok"),
    ("pinterest.com", "Pinterest"),
];

const ECOMMERCE_SIGNALS: &[&str] = &[
    "add to cart",
    "add to basket",
    "shopping cart",
    "checkout",
    "buy now",
    "free shipping",
    "in stock",
    "/cart",
];
const B2B_SIGNALS: &[&str] = &[
    "request a demo",
    "book a demo",
    "contact sales",
    "enterprise",
    "case studies",
    "for teams",
    "solutions",
    "integrations",
    "partners",
];
const B2C_SIGNALS: &[&str] = &[
    "sign up free",
    "download the app",
    "app store",
    "google play",
    "newsletter",
    "gift card",
    "customer reviews",
    "membership",
];

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

pub struct ContentProbe {
    homepage: Arc<SharedHomepage>,
}

impl ContentProbe {
    pub fn new(homepage: Arc<SharedHomepage>) -> Self {
        Self { homepage }
    }
}

#[async_trait]
impl Probe for ContentProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Content
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> ProbeResult {
        let start = Instant::now();
        info!(target = %target, "Starting content scan.");
        match self.homepage.fetch(target.host(), &ctx.retry, ctx.deadline).await {
            Ok(snapshot) => {
                let (data, warnings) = extract_content(&snapshot);
                info!(
                    words = data.word_count,
                    model = %data.business.model,
                    "Content scan finished."
                );
                ProbeResult::partial(ProbeData::Content(data), start.elapsed(), warnings)
            }
            Err(e) => {
                warn!(target = %target, error = %e, "HTTP request failed for content scan.");
                ProbeResult::failed(ProbeKind::Content, e, start.elapsed())
            }
        }
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn select_all<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    selector(css).map_or_else(Vec::new, |s| document.select(&s).collect())
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn rel_contains(element: &ElementRef<'_>, wanted: &str) -> bool {
    element
        .value()
        .attr("rel")
        .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case(wanted)))
}

/// Parses the homepage body. Returns the data and anything that could not be
/// read cleanly.
pub fn extract_content(snapshot: &HttpSnapshot) -> (ContentData, Vec<String>) {
    let document = Html::parse_document(&snapshot.body);
    let mut warnings = Vec::new();
    if snapshot.truncated {
        warnings.push(format!("body truncated at {} bytes", snapshot.body.len()));
    }

    let mut meta: BTreeMap<String, String> = BTreeMap::new();
    let mut open_graph = BTreeMap::new();
    for el in select_all(&document, "meta[content]") {
        let content = el.value().attr("content").unwrap_or_default();
        if let Some(name) = el.value().attr("name") {
            meta.entry(name.to_ascii_lowercase()).or_insert_with(|| content.trim().to_string());
        }
        if let Some(property) = el.value().attr("property") {
            let property = property.to_ascii_lowercase();
            if property.starts_with("og:") {
                open_graph.entry(property).or_insert_with(|| content.trim().to_string());
            }
        }
    }

    let mut heading_counts = [0usize; 6];
    for (level, count) in heading_counts.iter_mut().enumerate() {
        *count = select_all(&document, &format!("h{}", level + 1)).len();
    }
    let h1 = select_all(&document, "h1")
        .into_iter()
        .filter_map(|el| non_empty(&text_of(el)))
        .collect();

    let visible = visible_text(&document);
    let (structured_data_types, invalid_blocks) = structured_data(&document);
    if invalid_blocks > 0 {
        warnings.push(format!("{invalid_blocks} JSON-LD block(s) could not be parsed"));
    }

    let base = Url::parse(&snapshot.final_url).ok();
    let hrefs: Vec<String> = select_all(&document, "a[href]")
        .into_iter()
        .filter_map(|el| el.value().attr("href").map(str::trim).map(str::to_string))
        .collect();
    let (internal_links, external_links) = count_links(base.as_ref(), &hrefs);

    let images = select_all(&document, "img");
    let lowered = visible.to_lowercase();
    let business = business_signals(&lowered, &hrefs, &structured_data_types);

    let data = ContentData {
        url: snapshot.final_url.clone(),
        status_code: snapshot.status,
        response_time_ms: snapshot.elapsed_ms,
        page_bytes: snapshot.body_bytes,
        title: select_all(&document, "title")
            .into_iter()
            .next()
            .and_then(|el| non_empty(&text_of(el))),
        meta_description: meta.get("description").and_then(|d| non_empty(d)),
        meta_keywords: meta.get("keywords").and_then(|k| non_empty(k)),
        canonical: select_all(&document, "link[href]")
            .into_iter()
            .find(|el| rel_contains(el, "canonical"))
            .and_then(|el| el.value().attr("href").and_then(non_empty)),
        robots: meta.get("robots").and_then(|r| non_empty(r)),
        has_viewport: meta.contains_key("viewport"),
        language: select_all(&document, "html[lang]")
            .into_iter()
            .next()
            .and_then(|el| el.value().attr("lang").and_then(non_empty)),
        open_graph,
        heading_counts,
        h1,
        word_count: RE_WORD.find_iter(&visible).count(),
        structured_data_types,
        emails: emails(&visible, &hrefs),
        phones: phones(&visible, &hrefs),
        social_profiles: social_profiles(&hrefs),
        images: images.len(),
        images_missing_alt: images.iter().filter(|img| img.value().attr("alt").is_none()).count(),
        internal_links,
        external_links,
        script_count: select_all(&document, "script[src]").len(),
        stylesheet_count: select_all(&document, "link[href]")
            .iter()
            .filter(|el| rel_contains(el, "stylesheet"))
            .count(),
        business,
    };
    debug!(
        title = ?data.title,
        h1 = data.heading_counts[0],
        links = data.internal_links + data.external_links,
        "Content extracted."
    );
    (data, warnings)
}

/// Text a visitor would read: the body without scripts, styles and templates.
fn visible_text(document: &Html) -> String {
    let root = select_all(document, "body")
        .into_iter()
        .next()
        .unwrap_or_else(|| document.root_element());
    let mut parts = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            parts.push(text.trim());
        }
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

/// Schema.org `@type`s from every JSON-LD block, including `@graph` members.
/// Also returns the number of blocks that were not valid JSON.
fn structured_data(document: &Html) -> (Vec<String>, usize) {
    let mut types = Vec::new();
    let mut invalid = 0;
    for block in select_all(document, r#"script[type="application/ld+json"]"#) {
        let raw: String = block.text().collect();
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => collect_types(&value, &mut types),
            Err(e) => {
                debug!(error = %e, "Invalid JSON-LD block.");
                invalid += 1;
            }
        }
    }
    types.sort();
    types.dedup();
    (types, invalid)
}

fn collect_types(value: &Value, types: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_types(item, types)),
        Value::Object(map) => {
            match map.get("@type") {
                Some(Value::String(t)) => types.push(t.clone()),
                Some(Value::Array(ts)) => {
                    types.extend(ts.iter().filter_map(Value::as_str).map(str::to_string))
                }
                _ => {}
            }
            if let Some(graph) = map.get("@graph") {
                collect_types(graph, types);
            }
        }
        _ => {}
    }
}

fn bare_host(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

fn count_links(base: Option<&Url>, hrefs: &[String]) -> (usize, usize) {
    let Some(base) = base else {
        return (0, 0);
    };
    let own = base.host_str().map(bare_host).unwrap_or_default();
    let (mut internal, mut external) = (0, 0);
    for href in hrefs {
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(url) = base.join(href) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        if url.host_str().map(bare_host) == Some(own) {
            internal += 1;
        } else {
            external += 1;
        }
    }
    (internal, external)
}

fn emails(visible: &str, hrefs: &[String]) -> Vec<String> {
    let from_links = hrefs.iter().filter_map(|h| {
        let rest = h.get(..7).filter(|p| p.eq_ignore_ascii_case("mailto:")).map(|_| &h[7..])?;
        rest.split('?').next().map(str::to_string)
    });
    let from_text = RE_EMAIL.find_iter(visible).map(|m| m.as_str().to_string());
    let mut found: Vec<String> = from_links
        .chain(from_text)
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| RE_EMAIL.is_match(e))
        .filter(|e| ![".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"].iter().any(|ext| e.ends_with(ext)))
        .collect();
    found.sort();
    found.dedup();
    found.truncate(MAX_CONTACTS);
    found
}

fn phones(visible: &str, hrefs: &[String]) -> Vec<String> {
    let from_links = hrefs.iter().filter_map(|h| {
        h.get(..4)
            .filter(|p| p.eq_ignore_ascii_case("tel:"))
            .map(|_| h[4..].trim().to_string())
    });
    let from_text = RE_PHONE.find_iter(visible).map(|m| m.as_str().trim().to_string());
    let mut found = Vec::new();
    for phone in from_links.chain(from_text) {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < 7 || digits.len() > 15 {
            continue;
        }
        if !found.iter().any(|known: &String| known.chars().filter(char::is_ascii_digit).eq(digits.chars())) {
            found.push(phone);
        }
    }
    found.truncate(MAX_CONTACTS);
    found
}

fn social_profiles(hrefs: &[String]) -> Vec<SocialProfile> {
    let mut profiles: Vec<SocialProfile> = Vec::new();
    for href in hrefs {
        let Ok(url) = Url::parse(href) else {
            continue;
        };
        let Some(host) = url.host_str() else {
            continue;
        };
        let host = bare_host(host);
        // Share buttons point at the network, not at a profile.
        if url.path().contains("share") || url.path().contains("intent") || url.path().len() <= 1 {
            continue;
        }
        let network = SOCIAL_NETWORKS
            .iter()
            .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{domain}")))
            .map(|(_, name)| *name);
        if let Some(network) = network {
            if !profiles.iter().any(|p| p.network == network) {
                profiles.push(SocialProfile {
                    network: network.to_string(),
                    url: href.clone(),
                });
            }
        }
    }
    profiles
}

fn matches_of(text: &str, hrefs: &[String], keywords: &[&str]) -> Vec<String> {
    keywords
        .iter()
        .filter(|keyword| {
            text.contains(*keyword)
                || (keyword.starts_with('/')
                    && hrefs.iter().any(|h| h.to_ascii_lowercase().contains(*keyword)))
        })
        .map(|keyword| keyword.to_string())
        .collect()
}

/// Keyword evidence for each business model and the model it suggests.
pub fn business_signals(lowered_text: &str, hrefs: &[String], schema_types: &[String]) -> BusinessSignals {
    let mut ecommerce = matches_of(lowered_text, hrefs, ECOMMERCE_SIGNALS);
    if schema_types.iter().any(|t| matches!(t.as_str(), "Product" | "Offer" | "AggregateOffer")) {
        ecommerce.push("schema.org Product".to_string());
    }
    let b2b = matches_of(lowered_text, hrefs, B2B_SIGNALS);
    let b2c = matches_of(lowered_text, hrefs, B2C_SIGNALS);

    let model = if ecommerce.len() >= MODEL_THRESHOLD {
        BusinessModel::Ecommerce
    } else {
        match (b2b.len() >= MODEL_THRESHOLD, b2c.len() >= MODEL_THRESHOLD) {
            (true, true) => BusinessModel::Mixed,
            (true, false) => BusinessModel::B2b,
            (false, true) => BusinessModel::B2c,
            (false, false) => BusinessModel::Unknown,
        }
    };
    BusinessSignals {
        ecommerce,
        b2b,
        b2c,
        model,
    }
}
