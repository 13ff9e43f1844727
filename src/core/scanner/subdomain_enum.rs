// src/core/scanner/subdomain_enum.rs

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::runner::{probe_version, CommandRunner, ToolError};
use crate::core::target::{is_hostname, Target};

/// Passive subdomain enumeration through an external `amass` binary.
pub struct SubdomainEnumerator<'a> {
    runner: &'a dyn CommandRunner,
    amass_path: &'a str,
    timeout: Duration,
}

impl<'a> SubdomainEnumerator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, amass_path: &'a str, timeout: Duration) -> Self {
        Self { runner, amass_path, timeout }
    }

    /// Returns the binary's version line, or why it could not be run.
    pub async fn verify(&self) -> Result<String, ToolError> {
        probe_version(self.runner, self.amass_path, "-version").await
    }

    /// Runs `amass enum -passive -d <domain>` and returns the sorted, deduplicated hostnames.
    ///
    /// Any failure (missing binary, timeout, non-zero exit) comes back as a `ToolError`;
    /// the caller decides whether an empty result is acceptable.
    pub async fn enumerate(&self, target: &Target) -> Result<Vec<String>, ToolError> {
        info!(target = %target, "Starting passive subdomain enumeration.");
        let args = vec![
            "enum".to_string(),
            "-passive".to_string(),
            "-d".to_string(),
            target.to_string(),
        ];

        let output = self
            .runner
            .run(self.amass_path, &args, self.timeout)
            .await
            .and_then(|out| out.into_success(self.amass_path))
            .inspect_err(|e| warn!(target = %target, error = %e, "Subdomain enumeration failed."))?;

        let subdomains = parse_amass_output(&output.stdout);
        info!(target = %target, count = subdomains.len(), "Subdomain enumeration finished.");
        Ok(subdomains)
    }
}

/// Extracts hostnames from amass' line-oriented output.
///
/// Newer amass releases print graph lines such as
/// `a.example.com (FQDN) --> a_record --> 1.2.3.4 (IPAddress)`; only the leading name is kept.
pub fn parse_amass_output(output: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('[') {
            continue;
        }
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        let name = token.trim_end_matches('.').to_lowercase();
        if name.contains('.') && is_hostname(&name) {
            names.insert(name);
        } else {
            debug!(line, "Skipping amass line that is not a hostname.");
        }
    }
    names.into_iter().collect()
}
