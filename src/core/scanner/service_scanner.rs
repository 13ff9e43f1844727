// src/core/scanner/service_scanner.rs

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::models::{HostDetails, HostRecord, ServiceBanner, ServiceScanReport};

/// Error recorded for a hostname with no A record.
pub const DNS_FAILED: &str = "dns_failed";

const USER_AGENT: &str = concat!("ReconBot/", env!("CARGO_PKG_VERSION"));

// --- DNS ---

#[async_trait]
pub trait HostResolver: Send + Sync {
    /// First IPv4 address of `hostname`, or `None` when it does not resolve.
    async fn resolve(&self, hostname: &str) -> Option<IpAddr>;
}

pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Uses the system resolver configuration, falling back to the library defaults.
    pub fn from_system() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read system DNS configuration, using defaults.");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

#[async_trait]
impl HostResolver for DnsResolver {
    async fn resolve(&self, hostname: &str) -> Option<IpAddr> {
        match self.resolver.lookup_ip(hostname).await {
            Ok(lookup) => {
                let ip = lookup.iter().find(IpAddr::is_ipv4);
                debug!(hostname, ip = ?ip, "Resolved hostname.");
                ip
            }
            Err(e) => {
                warn!(hostname, error = %e, "Could not resolve hostname.");
                None
            }
        }
    }
}

// --- Host intelligence API ---

#[derive(Debug, Error)]
pub enum IntelError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid API URL: {0}")]
    Url(#[from] url::ParseError),
}

#[async_trait]
pub trait HostIntel: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<HostDetails, IntelError>;
}

/// Remaining credits on the API plan.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiInfo {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub query_credits: Option<i64>,
    #[serde(default)]
    pub scan_credits: Option<i64>,
}

/// Client for the Shodan REST API.
pub struct ShodanClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl ShodanClient {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self, IntelError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base_url, api_key: api_key.to_string() })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IntelError> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, IntelError> {
        // reqwest errors print the request URL, which carries the key.
        let response = self
            .http
            .get(self.endpoint(path)?)
            .send()
            .await
            .map_err(|e| IntelError::Http(e.without_url()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IntelError::Api { status: status.as_u16(), message: api_error_message(&body) });
        }
        response.json::<T>().await.map_err(|e| IntelError::Http(e.without_url()))
    }

    /// Verifies the key by asking for the plan's remaining credits.
    pub async fn api_info(&self) -> Result<ApiInfo, IntelError> {
        self.get("api-info").await
    }
}

#[async_trait]
impl HostIntel for ShodanClient {
    async fn lookup(&self, ip: IpAddr) -> Result<HostDetails, IntelError> {
        debug!(%ip, "Querying host intelligence API.");
        let host: RawHost = self.get(&format!("shodan/host/{ip}")).await?;
        Ok(host.into())
    }
}

/// Shodan reports failures as `{"error": "..."}`; fall back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Debug, Deserialize, Default)]
struct RawModule {
    #[serde(default)]
    module: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBanner {
    port: u16,
    #[serde(default)]
    transport: Option<String>,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default, rename = "_shodan")]
    shodan: Option<RawModule>,
}

#[derive(Debug, Deserialize)]
struct RawHost {
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    data: Vec<RawBanner>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    hostnames: Vec<String>,
    // A list on /shodan/host, a map keyed by CVE on some other endpoints.
    #[serde(default)]
    vulns: Value,
}

impl From<RawHost> for HostDetails {
    fn from(raw: RawHost) -> Self {
        let vulns = match raw.vulns {
            Value::Array(items) => items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            Value::Object(map) => map.into_iter().map(|(k, _)| k).collect(),
            _ => Vec::new(),
        };
        let mut ports = raw.ports;
        ports.sort_unstable();
        ports.dedup();
        Self {
            ports,
            services: raw
                .data
                .into_iter()
                .map(|b| ServiceBanner {
                    port: b.port,
                    transport: b.transport,
                    module: b.shodan.and_then(|s| s.module),
                    product: b.product,
                    version: b.version,
                    banner: b.data.unwrap_or_default(),
                })
                .collect(),
            org: raw.org,
            os: raw.os,
            isp: raw.isp,
            country: raw.country_name,
            hostnames: raw.hostnames,
            vulns,
        }
    }
}

// --- Scan ---

/// Resolves and looks up every hostname, one at a time, in the order given.
///
/// A failure for one hostname is recorded in its `HostRecord` and never stops the others.
pub async fn scan_hosts(
    hostnames: &[String],
    resolver: &dyn HostResolver,
    intel: &dyn HostIntel,
) -> ServiceScanReport {
    info!(count = hostnames.len(), "Starting service scan.");
    let mut report = ServiceScanReport {
        timestamp: Utc::now(),
        total_subdomains: hostnames.len(),
        ..Default::default()
    };

    for hostname in hostnames {
        let hostname = hostname.trim().to_lowercase();
        let record = scan_one(&hostname, resolver, intel).await;
        if record.error.is_none() {
            report.scanned_subdomains += 1;
        }
        report.subdomains.insert(hostname, record);
    }

    info!(
        scanned = report.scanned_subdomains,
        total = report.total_subdomains,
        "Service scan finished."
    );
    report
}

async fn scan_one(hostname: &str, resolver: &dyn HostResolver, intel: &dyn HostIntel) -> HostRecord {
    let Some(ip) = resolver.resolve(hostname).await else {
        return HostRecord::failed(None, DNS_FAILED);
    };
    match intel.lookup(ip).await {
        Ok(details) => {
            info!(hostname, %ip, ports = details.ports.len(), "Host lookup succeeded.");
            HostRecord::resolved(ip, details)
        }
        Err(e) => {
            warn!(hostname, %ip, error = %e, "Host lookup failed.");
            HostRecord::failed(Some(ip), e.to_string())
        }
    }
}
