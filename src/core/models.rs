// src/core/models.rs

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::core::webhook::WebhookResponse;

// --- Reusable Result Types ---

/// Outcome of one pipeline stage, recorded in the final report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    /// The stage ran but produced a degraded result (empty list, sentinel file...).
    Degraded { reason: String },
    /// The stage did not run, usually because it is not configured.
    Skipped { reason: String },
}

impl StageStatus {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded { reason: reason.into() }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped { reason: reason.into() }
    }
}

/// The fixed, ordered stages of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Enumeration,
    ServiceScan,
    PortScan,
    Dispatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: Stage,
    #[serde(flatten)]
    pub status: StageStatus,
}

// --- Issues ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// A problem noticed while running the pipeline, keyed into the knowledge base by `code`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub stage: Stage,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Issue {
    pub fn new(stage: Stage, code: &str) -> Self {
        Self { stage, code: code.to_string(), detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// --- Service Scanner Models ---

/// One service banner reported by the host-intelligence API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServiceBanner {
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub banner: String,
}

/// What the host-intelligence API knows about one address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HostDetails {
    pub ports: Vec<u16>,
    pub services: Vec<ServiceBanner>,
    pub org: Option<String>,
    pub os: Option<String>,
    pub isp: Option<String>,
    pub country: Option<String>,
    pub hostnames: Vec<String>,
    pub vulns: Vec<String>,
}

/// Per-hostname result of the service scan.
///
/// Populated exactly once. A hostname that failed DNS resolution carries only
/// `error`; one whose API lookup failed carries `ip` and `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HostRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceBanner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostRecord {
    pub fn failed(ip: Option<IpAddr>, error: impl Into<String>) -> Self {
        Self { ip, error: Some(error.into()), ..Default::default() }
    }

    pub fn resolved(ip: IpAddr, details: HostDetails) -> Self {
        Self {
            ip: Some(ip),
            ports: details.ports,
            services: details.services,
            org: details.org,
            os: details.os,
            isp: details.isp,
            country: details.country,
            hostnames: details.hostnames,
            vulns: details.vulns,
            error: None,
        }
    }
}

/// Aggregate result of the service scan over a list of hostnames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceScanReport {
    pub timestamp: DateTime<Utc>,
    pub total_subdomains: usize,
    pub scanned_subdomains: usize,
    pub subdomains: BTreeMap<String, HostRecord>,
}

impl Default for ServiceScanReport {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            total_subdomains: 0,
            scanned_subdomains: 0,
            subdomains: BTreeMap::new(),
        }
    }
}

// --- Port/TLS Scanner Models ---

/// One line of an nmap port table, e.g. `443/tcp open https nginx 1.18.0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenPort {
    pub port: u16,
    pub protocol: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TlsSummary {
    pub protocols: Vec<String>,
    pub ciphers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub least_strength: Option<String>,
}

/// The file written by one nmap invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepArtifact {
    pub path: PathBuf,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NmapArtifacts {
    pub ports: SweepArtifact,
    pub ssl: SweepArtifact,
    pub open_ports: Vec<OpenPort>,
    pub tls: TlsSummary,
}

// --- Main Report ---

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub domain: String,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub subdomains: Vec<String>,
    pub service_scan: Option<ServiceScanReport>,
    pub nmap: Option<NmapArtifacts>,
    pub webhook: Option<WebhookResponse>,
    pub stages: Vec<StageRecord>,
    pub issues: Vec<Issue>,
    pub artifacts: Vec<PathBuf>,
}

impl PipelineReport {
    pub fn status_of(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages.iter().find(|r| r.stage == stage).map(|r| &r.status)
    }
}
