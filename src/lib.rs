// src/lib.rs

//! Domain and website intelligence pipeline.
//!
//! A scan runs a set of independent probes (DNS, WHOIS, DNS blacklists,
//! TLS certificate, HTTP security headers, technology fingerprints and page
//! content) against one target under a shared deadline, then turns whatever
//! came back into per-category scores, an overall grade and a prioritized list
//! of recommendations.
//!
//! ```rust,ignore
//! use vanguard_intel::{Config, Pipeline, ScanData};
//!
//! let config = Config::default();
//! let data = ScanData::load(&config)?;
//! let pipeline = Pipeline::from_config(config, data)?;
//! let report = pipeline.scan("127.0.0.1", "example.com").await?;
//! println!("{} ({})", report.overall_score(), report.grade());
//! ```

pub mod config;
pub mod core;
pub mod logging;

pub use crate::config::Config;
pub use crate::core::data::ScanData;
pub use crate::core::error::{Error, ProbeError, Result};
pub use crate::core::models::{
    Category, Grade, ProbeData, ProbeKind, ProbeResult, ProbeStatus, Recommendation, ScanReport,
    ScanStatus, Severity,
};
pub use crate::core::pipeline::{Pipeline, PipelineBuilder};
pub use crate::core::target::Target;
