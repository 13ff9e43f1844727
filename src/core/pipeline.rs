// src/core/pipeline.rs

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::config::Settings;
use crate::core::models::{
    Issue, NmapArtifacts, PipelineReport, ServiceScanReport, Stage, StageRecord, StageStatus,
};
use crate::core::runner::{CommandRunner, ProcessRunner, ToolError};
use crate::core::scanner::port_scanner::PortScanner;
use crate::core::scanner::service_scanner::{
    scan_hosts, DnsResolver, HostIntel, HostResolver, ShodanClient, DNS_FAILED,
};
use crate::core::scanner::subdomain_enum::SubdomainEnumerator;
use crate::core::target::Target;
use crate::core::webhook::{ArtifactFile, DispatchError, WebhookDispatcher, WebhookPayload, WebhookResponse};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not write artifact {}: {source}", .path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not serialize scan results: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The four stages wired to their collaborators.
pub struct Pipeline {
    settings: Settings,
    runner: Arc<dyn CommandRunner>,
    resolver: Arc<dyn HostResolver>,
    intel: Result<Arc<dyn HostIntel>, Issue>,
    dispatcher: Result<WebhookDispatcher, Issue>,
}

impl Pipeline {
    /// Real processes, system DNS, Shodan and the configured webhook.
    pub fn from_settings(settings: Settings) -> Self {
        let intel = match settings.shodan_api_key.as_deref() {
            None => Err(Issue::new(Stage::ServiceScan, "SHODAN_KEY_MISSING")),
            Some(key) => ShodanClient::new(key, &settings.shodan_api_url, settings.shodan_timeout)
                .map(|c| Arc::new(c) as Arc<dyn HostIntel>)
                .map_err(|e| Issue::new(Stage::ServiceScan, "SHODAN_CLIENT_FAILED").with_detail(e.to_string())),
        };
        let dispatcher = match settings.webhook_url.clone() {
            None => Err(Issue::new(Stage::Dispatch, "WEBHOOK_NOT_CONFIGURED")),
            Some(url) => WebhookDispatcher::new(url, settings.webhook_timeout, settings.webhook_retry)
                .map_err(|e| Issue::new(Stage::Dispatch, "WEBHOOK_UNREACHABLE").with_detail(e.to_string())),
        };
        Self {
            runner: Arc::new(ProcessRunner),
            resolver: Arc::new(DnsResolver::from_system()),
            intel,
            dispatcher,
            settings,
        }
    }

    /// Wires explicit collaborators; `None` marks a stage as not configured.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn new(
        settings: Settings,
        runner: Arc<dyn CommandRunner>,
        resolver: Arc<dyn HostResolver>,
        intel: Option<Arc<dyn HostIntel>>,
        dispatcher: Option<WebhookDispatcher>,
    ) -> Self {
        Self {
            settings,
            runner,
            resolver,
            intel: intel.ok_or_else(|| Issue::new(Stage::ServiceScan, "SHODAN_KEY_MISSING")),
            dispatcher: dispatcher.ok_or_else(|| Issue::new(Stage::Dispatch, "WEBHOOK_NOT_CONFIGURED")),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn enumerator(&self) -> SubdomainEnumerator<'_> {
        SubdomainEnumerator::new(self.runner.as_ref(), &self.settings.amass_path, self.settings.amass_timeout)
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn intel(&self) -> Option<&dyn HostIntel> {
        self.intel.as_ref().ok().map(|i| i.as_ref())
    }

    pub fn resolver(&self) -> &dyn HostResolver {
        self.resolver.as_ref()
    }

    pub fn dispatcher(&self) -> Option<&WebhookDispatcher> {
        self.dispatcher.as_ref().ok()
    }

    /// Runs enumeration, service scan, port/TLS scan and dispatch, strictly in that order.
    ///
    /// Stage failures are folded into the report; only artifact writes can fail the run.
    pub async fn run(&self, target: &Target) -> Result<PipelineReport, PipelineError> {
        let started = Instant::now();
        let mut run = RunState::default();
        info!(target = %target, "Starting recon pipeline.");

        // Step 1: passive enumeration.
        info!("Step 1/4: enumerating subdomains.");
        let subdomains = match self.enumerator().enumerate(target).await {
            Ok(names) if names.is_empty() => {
                run.record(Stage::Enumeration, StageStatus::Completed);
                run.issues.push(Issue::new(Stage::Enumeration, "NO_SUBDOMAINS"));
                names
            }
            Ok(names) => {
                run.record(Stage::Enumeration, StageStatus::Completed);
                names
            }
            Err(e) => {
                run.record(Stage::Enumeration, StageStatus::degraded(e.to_string()));
                run.issues.push(Issue::new(Stage::Enumeration, enumeration_issue(&e)).with_detail(e.to_string()));
                Vec::new()
            }
        };
        let amass_path = self.artifact_path(target, "amass.txt");
        write_artifact(&amass_path, &subdomains.join("\n")).await?;
        run.artifacts.push(amass_path);

        // Step 2: service scan over the (capped) hostname list.
        info!("Step 2/4: scanning {} subdomains for exposed services.", subdomains.len());
        let service_scan = self.service_scan(&subdomains, &mut run).await;
        if let Some(report) = &service_scan {
            let shodan_path = self.artifact_path(target, "shodan.json");
            write_artifact(&shodan_path, &host_records_json(report)?).await?;
            run.artifacts.push(shodan_path);
        }

        // Step 3: port and TLS sweeps, independent of steps 1-2.
        info!("Step 3/4: running nmap sweeps.");
        let options = self.settings.nmap_options();
        let nmap = PortScanner::new(self.runner.as_ref(), &options)
            .scan(target)
            .await
            .map_err(|source| PipelineError::Artifact { path: options.output_dir.clone(), source })?;
        self.record_nmap(&nmap, &mut run);
        run.artifacts.push(nmap.ports.path.clone());
        run.artifacts.push(nmap.ssl.path.clone());

        // Step 4: hand everything to the automation webhook.
        info!("Step 4/4: dispatching report.");
        let files = collect_files(target, &subdomains, service_scan.as_ref(), &nmap).await?;
        let webhook = self.dispatch(target, files, &mut run).await;

        let duration = started.elapsed().as_secs_f64();
        info!(target = %target, duration_secs = duration, issues = run.issues.len(), "Recon pipeline finished.");

        Ok(PipelineReport {
            domain: target.to_string(),
            started_at: run.started_at,
            duration_seconds: duration,
            subdomains,
            service_scan,
            nmap: Some(nmap),
            webhook,
            stages: run.stages,
            issues: run.issues,
            artifacts: run.artifacts,
        })
    }

    async fn service_scan(&self, subdomains: &[String], run: &mut RunState) -> Option<ServiceScanReport> {
        let intel = match &self.intel {
            Ok(intel) => intel,
            Err(issue) => {
                warn!(code = %issue.code, "Skipping service scan.");
                run.record(Stage::ServiceScan, StageStatus::skipped(issue.code.clone()));
                run.issues.push(issue.clone());
                return None;
            }
        };

        let limit = match self.settings.max_hosts {
            0 => subdomains.len(),
            n => n.min(subdomains.len()),
        };
        if limit < subdomains.len() {
            info!(limit, total = subdomains.len(), "Capping hostnames sent to the API.");
        }
        let report = scan_hosts(&subdomains[..limit], self.resolver.as_ref(), intel.as_ref()).await;

        let (dns_failed, lookup_failed) =
            report.subdomains.values().fold((0, 0), |(dns, api), r| match r.error.as_deref() {
                Some(DNS_FAILED) => (dns + 1, api),
                Some(_) => (dns, api + 1),
                None => (dns, api),
            });
        if dns_failed > 0 {
            run.issues.push(Issue::new(Stage::ServiceScan, "DNS_FAILED").with_detail(format!("{dns_failed} hostnames")));
        }
        if lookup_failed > 0 {
            run.issues.push(
                Issue::new(Stage::ServiceScan, "SHODAN_LOOKUP_FAILED").with_detail(format!("{lookup_failed} hostnames")),
            );
        }
        let status = if report.total_subdomains > 0 && report.scanned_subdomains == 0 {
            StageStatus::degraded("no hostname could be looked up")
        } else {
            StageStatus::Completed
        };
        run.record(Stage::ServiceScan, status);
        Some(report)
    }

    fn record_nmap(&self, nmap: &NmapArtifacts, run: &mut RunState) {
        let mut failed = Vec::new();
        if let Some(e) = &nmap.ports.error {
            run.issues.push(Issue::new(Stage::PortScan, "NMAP_PORT_FAILED").with_detail(e.clone()));
            failed.push("port sweep");
        }
        if let Some(e) = &nmap.ssl.error {
            run.issues.push(Issue::new(Stage::PortScan, "NMAP_SSL_FAILED").with_detail(e.clone()));
            failed.push("ssl sweep");
        }
        let status = if failed.is_empty() {
            StageStatus::Completed
        } else {
            StageStatus::degraded(format!("{} failed", failed.join(" and ")))
        };
        run.record(Stage::PortScan, status);
    }

    async fn dispatch(&self, target: &Target, files: Vec<ArtifactFile>, run: &mut RunState) -> Option<WebhookResponse> {
        let dispatcher = match &self.dispatcher {
            Ok(d) => d,
            Err(issue) => {
                run.record(Stage::Dispatch, StageStatus::skipped(issue.code.clone()));
                run.issues.push(issue.clone());
                return None;
            }
        };

        let outcome = match WebhookPayload::new(target.as_str(), files) {
            Ok(payload) => dispatcher.dispatch(&payload).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(resp) if resp.is_success() => {
                run.record(Stage::Dispatch, StageStatus::Completed);
                Some(resp)
            }
            Ok(resp) => {
                let code = if resp.status_code >= 500 { "WEBHOOK_DOWNSTREAM_FAILED" } else { "WEBHOOK_REJECTED" };
                run.record(Stage::Dispatch, StageStatus::degraded(format!("HTTP {}", resp.status_code)));
                run.issues.push(Issue::new(Stage::Dispatch, code).with_detail(resp.body.to_string()));
                Some(resp)
            }
            Err(e) => {
                let code = match &e {
                    DispatchError::Transport(_) => "WEBHOOK_UNREACHABLE",
                    DispatchError::TooManyFiles(_) => "WEBHOOK_REJECTED",
                };
                run.record(Stage::Dispatch, StageStatus::degraded(e.to_string()));
                run.issues.push(Issue::new(Stage::Dispatch, code).with_detail(e.to_string()));
                None
            }
        }
    }

    fn artifact_path(&self, target: &Target, suffix: &str) -> PathBuf {
        self.settings.output_dir.join(format!("{target}_{suffix}"))
    }
}

struct RunState {
    started_at: chrono::DateTime<Utc>,
    stages: Vec<StageRecord>,
    issues: Vec<Issue>,
    artifacts: Vec<PathBuf>,
}

impl Default for RunState {
    fn default() -> Self {
        Self { started_at: Utc::now(), stages: Vec::new(), issues: Vec::new(), artifacts: Vec::new() }
    }
}

impl RunState {
    fn record(&mut self, stage: Stage, status: StageStatus) {
        info!(stage = %stage, status = ?status, "Stage finished.");
        self.stages.push(StageRecord { stage, status });
    }
}

fn enumeration_issue(e: &ToolError) -> &'static str {
    match e {
        ToolError::NotFound { .. } => "AMASS_NOT_FOUND",
        ToolError::TimedOut { .. } => "AMASS_TIMEOUT",
        ToolError::Failed { .. } | ToolError::Io { .. } => "AMASS_FAILED",
    }
}

async fn write_artifact(path: &Path, contents: &str) -> Result<(), PipelineError> {
    let wrap = |source| PipelineError::Artifact { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(wrap)?;
    }
    fs::write(path, contents).await.map_err(wrap)?;
    info!(path = %path.display(), "Wrote artifact.");
    Ok(())
}

/// Contents of `<domain>_shodan.json`, on disk and in the webhook payload alike.
fn host_records_json(report: &ServiceScanReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&report.subdomains)
}

/// The three blobs sent to the webhook: hostname list, service scan JSON and both nmap outputs.
async fn collect_files(
    target: &Target,
    subdomains: &[String],
    service_scan: Option<&ServiceScanReport>,
    nmap: &NmapArtifacts,
) -> Result<Vec<ArtifactFile>, PipelineError> {
    let mut files = vec![ArtifactFile::new(format!("{target}_amass.txt"), subdomains.join("\n"))];
    if let Some(report) = service_scan {
        files.push(ArtifactFile::new(format!("{target}_shodan.json"), host_records_json(report)?));
    }

    let mut nmap_text = String::new();
    for artifact in [&nmap.ports, &nmap.ssl] {
        let body = fs::read_to_string(&artifact.path)
            .await
            .map_err(|source| PipelineError::Artifact { path: artifact.path.clone(), source })?;
        let name = artifact.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        nmap_text.push_str(&format!("===== {name} =====\n{body}\n"));
    }
    files.push(ArtifactFile::new(format!("{target}_nmap.txt"), nmap_text));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::HostDetails;
    use crate::core::testing::{StubIntel, StubResolver, StubRunner};
    use crate::core::webhook::RetryPolicy;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use url::Url;

    fn settings(dir: &Path) -> Settings {
        Settings { output_dir: dir.to_path_buf(), ..Settings::default() }
    }

    fn target() -> Target {
        Target::parse("example.com").unwrap()
    }

    fn full_runner() -> StubRunner {
        StubRunner::new()
            .respond("amass", 0, "a.example.com\nexample.com\n")
            .respond_when("docker", "ssl-enum-ciphers", 0, "443/tcp open https\n|   TLSv1.3:\n")
            .respond("docker", 0, "80/tcp open http\n443/tcp open https\n")
    }

    #[tokio::test]
    async fn scenario_enumerate_resolve_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = StubResolver::new()
            .with("a.example.com", "93.184.216.34")
            .with("example.com", "93.184.216.34");
        let intel = StubIntel::new().with("93.184.216.34", HostDetails { ports: vec![80, 443], ..Default::default() });
        let pipeline = Pipeline::new(
            settings(dir.path()),
            Arc::new(full_runner()),
            Arc::new(resolver),
            Some(Arc::new(intel)),
            None,
        );

        let report = pipeline.run(&target()).await.unwrap();

        assert_eq!(report.subdomains, vec!["a.example.com", "example.com"]);
        let scan = report.service_scan.as_ref().unwrap();
        assert_eq!(scan.subdomains.len(), 2);
        for record in scan.subdomains.values() {
            assert_eq!(record.ip, Some("93.184.216.34".parse().unwrap()));
            assert_eq!(record.ports, vec![80, 443]);
        }
        assert_eq!(report.status_of(Stage::Enumeration), Some(&StageStatus::Completed));
        assert_eq!(report.status_of(Stage::ServiceScan), Some(&StageStatus::Completed));
        assert_eq!(report.status_of(Stage::PortScan), Some(&StageStatus::Completed));
        assert!(matches!(report.status_of(Stage::Dispatch), Some(StageStatus::Skipped { .. })));

        let amass = std::fs::read_to_string(dir.path().join("example.com_amass.txt")).unwrap();
        assert_eq!(amass, "a.example.com\nexample.com");
        let shodan = std::fs::read_to_string(dir.path().join("example.com_shodan.json")).unwrap();
        let back: std::collections::BTreeMap<String, crate::core::models::HostRecord> =
            serde_json::from_str(&shodan).unwrap();
        assert_eq!(&back, &scan.subdomains);
        assert_eq!(report.nmap.as_ref().unwrap().open_ports.len(), 2);
    }

    #[tokio::test]
    async fn scenario_missing_enumerator_degrades_to_empty_scan() {
        let dir = tempfile::tempdir().unwrap();
        let runner = StubRunner::new().missing("amass").respond("docker", 0, "");
        let intel = Arc::new(StubIntel::new());
        let pipeline = Pipeline::new(
            settings(dir.path()),
            Arc::new(runner),
            Arc::new(StubResolver::new()),
            Some(intel.clone()),
            None,
        );

        let report = pipeline.run(&target()).await.unwrap();

        assert!(report.subdomains.is_empty());
        let scan = report.service_scan.as_ref().unwrap();
        assert!(scan.subdomains.is_empty());
        assert_eq!(scan.scanned_subdomains, 0);
        assert!(intel.lookups().is_empty());
        assert!(matches!(report.status_of(Stage::Enumeration), Some(StageStatus::Degraded { .. })));
        assert!(report.issues.iter().any(|i| i.code == "AMASS_NOT_FOUND"));
    }

    #[tokio::test]
    async fn missing_api_key_skips_service_scan() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            settings(dir.path()),
            Arc::new(full_runner()),
            Arc::new(StubResolver::new()),
            None,
            None,
        );

        let report = pipeline.run(&target()).await.unwrap();

        assert!(report.service_scan.is_none());
        assert!(matches!(report.status_of(Stage::ServiceScan), Some(StageStatus::Skipped { .. })));
        assert!(!dir.path().join("example.com_shodan.json").exists());
        assert!(report.issues.iter().any(|i| i.code == "SHODAN_KEY_MISSING"));
    }

    #[tokio::test]
    async fn hostnames_sent_to_api_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = StubRunner::new()
            .respond("amass", 0, "a.example.com\nb.example.com\nc.example.com\n")
            .respond("docker", 0, "");
        let resolver = StubResolver::new()
            .with("a.example.com", "10.0.0.1")
            .with("b.example.com", "10.0.0.2")
            .with("c.example.com", "10.0.0.3");
        let intel = Arc::new(StubIntel::new());
        let pipeline = Pipeline::new(
            Settings { max_hosts: 2, ..settings(dir.path()) },
            Arc::new(runner),
            Arc::new(resolver),
            Some(intel.clone()),
            None,
        );

        let report = pipeline.run(&target()).await.unwrap();

        assert_eq!(report.subdomains.len(), 3);
        assert_eq!(report.service_scan.unwrap().total_subdomains, 2);
        assert_eq!(intel.lookups().len(), 2);
    }

    #[tokio::test]
    async fn failed_sweeps_degrade_port_stage() {
        let dir = tempfile::tempdir().unwrap();
        let runner = StubRunner::new().respond("amass", 0, "").missing("docker");
        let pipeline = Pipeline::new(settings(dir.path()), Arc::new(runner), Arc::new(StubResolver::new()), None, None);

        let report = pipeline.run(&target()).await.unwrap();

        assert!(matches!(report.status_of(Stage::PortScan), Some(StageStatus::Degraded { .. })));
        let codes: Vec<&str> = report.issues.iter().map(|i| i.code.as_str()).collect();
        assert!(codes.contains(&"NMAP_PORT_FAILED"));
        assert!(codes.contains(&"NMAP_SSL_FAILED"));
        assert!(codes.contains(&"NO_SUBDOMAINS"));
        let nmap = report.nmap.unwrap();
        assert_eq!(std::fs::read_to_string(nmap.ports.path).unwrap(), "[nmap port scan failed]\n");
    }

    /// Accepts one webhook delivery, answers with `status` and returns the raw request.
    async fn capture_delivery(status: &'static str, body: &'static str) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/hook", listener.local_addr().unwrap())).unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 8192];
            // Read until the JSON body's closing brace arrives.
            while !request.ends_with(b"}") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, server)
    }

    fn delivered_payload(request: &str) -> WebhookPayload {
        let (_, body) = request.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn rejected_webhook_is_reported_as_data() {
        let (url, server) = capture_delivery("410 Gone", "There is no scenario listening for this webhook.").await;
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = WebhookDispatcher::new(url, Duration::from_secs(5), RetryPolicy::default()).unwrap();
        let pipeline = Pipeline::new(
            settings(dir.path()),
            Arc::new(full_runner()),
            Arc::new(StubResolver::new()),
            None,
            Some(dispatcher),
        );

        let report = pipeline.run(&target()).await.unwrap();

        let webhook = report.webhook.as_ref().unwrap();
        assert_eq!(webhook.status_code, 410);
        assert!(matches!(report.status_of(Stage::Dispatch), Some(StageStatus::Degraded { .. })));
        assert!(report.issues.iter().any(|i| i.code == "WEBHOOK_REJECTED"));

        let payload = delivered_payload(&server.await.unwrap());
        let names: Vec<&str> = payload.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["example.com_amass.txt", "example.com_nmap.txt"]);
    }

    #[tokio::test]
    async fn delivered_service_scan_matches_file_on_disk() {
        let (url, server) = capture_delivery("200 OK", "Accepted").await;
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = WebhookDispatcher::new(url, Duration::from_secs(5), RetryPolicy::default()).unwrap();
        let resolver = StubResolver::new().with("a.example.com", "93.184.216.34");
        let intel = StubIntel::new().with("93.184.216.34", HostDetails { ports: vec![443], ..Default::default() });
        let pipeline = Pipeline::new(
            settings(dir.path()),
            Arc::new(full_runner()),
            Arc::new(resolver),
            Some(Arc::new(intel)),
            Some(dispatcher),
        );

        let report = pipeline.run(&target()).await.unwrap();
        assert_eq!(report.status_of(Stage::Dispatch), Some(&StageStatus::Completed));

        let payload = delivered_payload(&server.await.unwrap());
        let sent = payload.files.iter().find(|f| f.name == "example.com_shodan.json").unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("example.com_shodan.json")).unwrap();
        assert_eq!(sent.content, on_disk);
        let amass = payload.files.iter().find(|f| f.name == "example.com_amass.txt").unwrap();
        assert_eq!(amass.content, std::fs::read_to_string(dir.path().join("example.com_amass.txt")).unwrap());
    }
}
