// src/core/scanner/port_scanner.rs

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::core::models::{NmapArtifacts, OpenPort, SweepArtifact, TlsSummary};
use crate::core::runner::{probe_version, CommandRunner, ToolError};
use crate::core::target::Target;

static RE_PORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\d{1,5})/(tcp|udp)\s+open\s+(\S+)(?:[ \t]+([^\r\n]*?))?[ \t]*\r?$").unwrap()
});
static RE_TLS_PROTOCOL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(SSLv[23]|TLSv1(?:\.[0-3])?)\b").unwrap());
static RE_CIPHER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(TLS_[A-Z0-9_]+)\b").unwrap());
static RE_LEAST_STRENGTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"least strength:\s*([A-F])").unwrap());

/// How nmap is invoked through the container runtime.
#[derive(Debug, Clone)]
pub struct NmapOptions {
    pub docker_path: String,
    pub image: String,
    pub port_range: String,
    pub tls_port: u16,
    pub timeout: Duration,
    pub output_dir: PathBuf,
}

/// The two sweeps run against every target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    Ports,
    Ssl,
}

impl Sweep {
    fn label(self) -> &'static str {
        match self {
            Sweep::Ports => "ports",
            Sweep::Ssl => "ssl",
        }
    }

    /// Written in place of tool output when the sweep could not be run.
    pub fn sentinel(self) -> &'static str {
        match self {
            Sweep::Ports => "[nmap port scan failed]",
            Sweep::Ssl => "[nmap ssl scan failed]",
        }
    }

    fn nmap_args(self, target: &Target, options: &NmapOptions) -> Vec<String> {
        let mut args = vec!["-sV".to_string(), "-p".to_string()];
        match self {
            Sweep::Ports => args.push(options.port_range.clone()),
            Sweep::Ssl => {
                args.push(options.tls_port.to_string());
                args.push("--script".to_string());
                args.push("ssl-enum-ciphers,ssl-cert".to_string());
            }
        }
        args.push(target.to_string());
        args
    }
}

/// Port and TLS sweeps via `docker run <nmap image>`, each written to its own timestamped file.
pub struct PortScanner<'a> {
    runner: &'a dyn CommandRunner,
    options: &'a NmapOptions,
}

impl<'a> PortScanner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, options: &'a NmapOptions) -> Self {
        Self { runner, options }
    }

    /// Checks that the container runtime answers.
    pub async fn verify(&self) -> Result<String, ToolError> {
        probe_version(self.runner, &self.options.docker_path, "--version").await
    }

    fn docker_args(&self, sweep: Sweep, target: &Target) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--entrypoint".to_string(),
            "nmap".to_string(),
            self.options.image.clone(),
        ];
        args.extend(sweep.nmap_args(target, self.options));
        args
    }

    /// Runs both sweeps. A failed sweep leaves its sentinel line in the file; only
    /// filesystem errors are returned as `Err`.
    pub async fn scan(&self, target: &Target) -> io::Result<NmapArtifacts> {
        info!(target = %target, dir = %self.options.output_dir.display(), "Starting nmap sweeps.");
        fs::create_dir_all(&self.options.output_dir).await?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let (ports, ports_text) = self.run_sweep(Sweep::Ports, target, &stamp).await?;
        let (ssl, ssl_text) = self.run_sweep(Sweep::Ssl, target, &stamp).await?;

        let open_ports = if ports.succeeded { parse_open_ports(&ports_text) } else { Vec::new() };
        let tls = if ssl.succeeded { parse_tls_summary(&ssl_text) } else { TlsSummary::default() };

        info!(
            target = %target,
            open_ports = open_ports.len(),
            ciphers = tls.ciphers.len(),
            "Nmap sweeps finished."
        );
        Ok(NmapArtifacts { ports, ssl, open_ports, tls })
    }

    async fn run_sweep(&self, sweep: Sweep, target: &Target, stamp: &str) -> io::Result<(SweepArtifact, String)> {
        let args = self.docker_args(sweep, target);
        let result = self
            .runner
            .run(&self.options.docker_path, &args, self.options.timeout)
            .await
            .and_then(|out| {
                // nmap's report goes to stdout; docker's own failures land on stderr.
                let text = out.combined();
                out.into_success(&self.options.docker_path).map(|_| text)
            });

        let (text, error) = match result {
            Ok(text) => (text, None),
            Err(e) => {
                error!(target = %target, sweep = sweep.label(), error = %e, "Nmap sweep failed.");
                (format!("{}\n", sweep.sentinel()), Some(e.to_string()))
            }
        };

        let stem = format!("{}_nmap_{}_{}", target, sweep.label(), stamp);
        let path = write_new_artifact(&self.options.output_dir, &stem, &text).await?;
        debug!(path = %path.display(), bytes = text.len(), "Wrote nmap artifact.");

        let artifact = SweepArtifact { path, succeeded: error.is_none(), error };
        Ok((artifact, text))
    }
}

/// Creates `<dir>/<stem>.txt`, or `<stem>-N.txt` if that name is taken, and writes `contents`.
/// Existing files are never opened for writing.
pub async fn write_new_artifact(dir: &Path, stem: &str, contents: &str) -> io::Result<PathBuf> {
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 { format!("{stem}.txt") } else { format!("{stem}-{attempt}.txt") };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(mut file) => {
                file.write_all(contents.as_bytes()).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(path = %path.display(), "Artifact exists, picking another name.");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Open ports from nmap's normal output (`PORT STATE SERVICE VERSION` table).
pub fn parse_open_ports(output: &str) -> Vec<OpenPort> {
    let mut ports: Vec<OpenPort> = RE_PORT_LINE
        .captures_iter(output)
        .filter_map(|caps| {
            let port = caps[1].parse::<u16>().ok()?;
            let version = caps
                .get(4)
                .map(|m| m.as_str().trim().to_string())
                .filter(|v| !v.is_empty());
            Some(OpenPort {
                port,
                protocol: caps[2].to_string(),
                service: caps[3].to_string(),
                version,
            })
        })
        .collect();
    ports.sort_by_key(|p| p.port);
    ports.dedup_by(|a, b| a.port == b.port && a.protocol == b.protocol);
    ports
}

/// Protocols, cipher suites and the overall grade from `ssl-enum-ciphers` output.
pub fn parse_tls_summary(output: &str) -> TlsSummary {
    let mut summary = TlsSummary::default();
    for caps in RE_TLS_PROTOCOL.captures_iter(output) {
        let protocol = caps[1].to_string();
        if !summary.protocols.contains(&protocol) {
            summary.protocols.push(protocol);
        }
    }
    for caps in RE_CIPHER.captures_iter(output) {
        let cipher = caps[1].to_string();
        if !summary.ciphers.contains(&cipher) {
            summary.ciphers.push(cipher);
        }
    }
    summary.least_strength = RE_LEAST_STRENGTH.captures(output).map(|c| c[1].to_string());
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::StubRunner;

    const PORTS_OUTPUT: &str = "Starting Nmap 7.95 ( https://nmap.org )\n\
        Nmap scan report for example.com (93.184.216.34)\n\
        PORT    STATE  SERVICE  VERSION\n\
        22/tcp  closed ssh\n\
        80/tcp  open   http     ECAcc (nyb/1D13)\n\
        443/tcp open   ssl/http ECAcc (nyb/1D13)\n\
        8080/tcp open  http-proxy\n";

    const SSL_OUTPUT: &str = "PORT    STATE SERVICE  VERSION\n\
        443/tcp open  ssl/http nginx\n\
        | ssl-enum-ciphers:\n\
        |   TLSv1.2:\n\
        |     ciphers:\n\
        |       TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256 (ecdh_x25519) - A\n\
        |       TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384 (ecdh_x25519) - A\n\
        |   TLSv1.3:\n\
        |     ciphers:\n\
        |       TLS_AKE_WITH_AES_256_GCM_SHA384 (ecdh_x25519) - A\n\
        |_  least strength: A\n";

    fn options(dir: &Path) -> NmapOptions {
        NmapOptions {
            docker_path: "docker".to_string(),
            image: "instrumentisto/nmap:latest".to_string(),
            port_range: "1-1000".to_string(),
            tls_port: 443,
            timeout: Duration::from_secs(300),
            output_dir: dir.join("scans"),
        }
    }

    fn target() -> Target {
        Target::parse("example.com").unwrap()
    }

    #[test]
    fn parses_open_ports_only() {
        let ports = parse_open_ports(PORTS_OUTPUT);
        let numbers: Vec<u16> = ports.iter().map(|p| p.port).collect();
        assert_eq!(numbers, vec![80, 443, 8080]);
        assert_eq!(ports[1].service, "ssl/http");
        assert_eq!(ports[1].version.as_deref(), Some("ECAcc (nyb/1D13)"));
        assert_eq!(ports[2].version, None);
    }

    #[test]
    fn parses_tls_protocols_and_ciphers() {
        let tls = parse_tls_summary(SSL_OUTPUT);
        assert_eq!(tls.protocols, vec!["TLSv1.2", "TLSv1.3"]);
        assert_eq!(tls.ciphers.len(), 3);
        assert_eq!(tls.ciphers[0], "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256");
        assert_eq!(tls.least_strength.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn writes_both_sweeps_through_docker() {
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path());
        let runner = StubRunner::new()
            .respond_when("docker", "ssl-enum-ciphers", 0, SSL_OUTPUT)
            .respond("docker", 0, PORTS_OUTPUT);

        let artifacts = PortScanner::new(&runner, &options).scan(&target()).await.unwrap();

        assert!(artifacts.ports.succeeded && artifacts.ssl.succeeded);
        assert_eq!(std::fs::read_to_string(&artifacts.ports.path).unwrap(), PORTS_OUTPUT);
        assert_eq!(std::fs::read_to_string(&artifacts.ssl.path).unwrap(), SSL_OUTPUT);
        let ports_name = artifacts.ports.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(ports_name.starts_with("example.com_nmap_ports_"), "{ports_name}");
        assert_eq!(artifacts.open_ports.len(), 3);
        assert_eq!(artifacts.tls.protocols.len(), 2);

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].1,
            vec!["run", "--rm", "--entrypoint", "nmap", "instrumentisto/nmap:latest", "-sV", "-p", "1-1000", "example.com"]
        );
        assert!(calls[1].1.contains(&"443".to_string()));
    }

    #[tokio::test]
    async fn failed_sweeps_leave_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path());
        let runner = StubRunner::new()
            .timing_out_when("docker", "ssl-enum-ciphers")
            .respond("docker", 125, "");

        let artifacts = PortScanner::new(&runner, &options).scan(&target()).await.unwrap();

        assert!(!artifacts.ports.succeeded);
        assert!(!artifacts.ssl.succeeded);
        assert!(artifacts.ssl.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(
            std::fs::read_to_string(&artifacts.ports.path).unwrap(),
            "[nmap port scan failed]\n"
        );
        assert_eq!(
            std::fs::read_to_string(&artifacts.ssl.path).unwrap(),
            "[nmap ssl scan failed]\n"
        );
        assert!(artifacts.open_ports.is_empty());
    }

    #[tokio::test]
    async fn repeated_scans_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path());
        let runner = StubRunner::new().respond("docker", 0, PORTS_OUTPUT);
        let scanner = PortScanner::new(&runner, &options);

        let first = scanner.scan(&target()).await.unwrap();
        let second = scanner.scan(&target()).await.unwrap();

        let mut paths = vec![&first.ports.path, &first.ssl.path, &second.ports.path, &second.ssl.path];
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 4);
        assert_eq!(std::fs::read_dir(&options.output_dir).unwrap().count(), 4);
    }

    #[tokio::test]
    async fn artifact_names_get_a_suffix_on_clash() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_new_artifact(dir.path(), "x_nmap_ports_20250101_000000", "one").await.unwrap();
        let second = write_new_artifact(dir.path(), "x_nmap_ports_20250101_000000", "two").await.unwrap();

        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("-1.txt"));
        assert_eq!(std::fs::read_to_string(first).unwrap(), "one");
    }
}
