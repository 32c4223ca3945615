// src/core/mod.rs

// The `core` module holds everything the scan pipeline needs: the data model,
// the probes, the supporting services (cache, rate limiter, retry) and the
// report assembly. The terminal front-end only consumes what comes out of here.

/// Data structures shared across the pipeline, such as `ScanReport`,
/// `ProbeResult` and the typed payload of every probe.
pub mod models;

/// Error taxonomy: fatal pipeline errors and per-probe classified errors.
pub mod error;

/// Target parsing, normalization and validation.
pub mod target;

/// Injectable time source.
pub mod clock;

/// TTL cache with hit/miss accounting and stampede protection.
pub mod cache;

/// Bounded retry with exponential backoff.
pub mod retry;

/// Per-client admission control.
pub mod rate_limiter;

/// Network seams (DNS, HTTP, WHOIS) and their cached wrappers.
pub mod net;

/// Houses the probes, one per signal type, behind the `Probe` trait.
pub mod scanner;

/// Technology signature database.
pub mod signatures;

/// Operational data loaded once at startup.
pub mod data;

/// The rule catalogue: conditions, severities, and remediation text.
pub mod knowledge_base;

/// Category and overall scoring, grade lookup.
pub mod scoring;

/// Recommendation derivation from rule evaluations.
pub mod recommendations;

/// Fans probes out under bounded concurrency and a deadline.
pub mod orchestrator;

/// Per-scan statistics sink.
pub mod observer;

/// The public entry point tying rate limiting, orchestration and scoring together.
pub mod pipeline;
