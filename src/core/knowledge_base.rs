//! Static, read-only table of every issue the pipeline can raise, with a
//! human-readable explanation and what to do about it. Issues carry only a code;
//! everything shown to the user is looked up here.

use crate::core::models::{Severity, Stage};

/// Human-readable information about one issue code.
pub struct IssueDetail {
    /// Machine-readable identifier, e.g. "AMASS_NOT_FOUND".
    pub code: &'static str,
    pub title: &'static str,
    /// The stage that raises this issue.
    pub stage: Stage,
    pub severity: Severity,
    pub description: &'static str,
    pub remediation: &'static str,
}

static ISSUES: &[IssueDetail] = &[
    // --- Enumeration ---
    IssueDetail {
        code: "AMASS_NOT_FOUND",
        title: "Enumeration binary not found",
        stage: Stage::Enumeration,
        severity: Severity::Critical,
        description: "The passive enumeration tool could not be started, so no subdomains were discovered and the service scan had nothing to look up.",
        remediation: "Install amass (https://github.com/owasp-amass/amass) or point AMASS_PATH / --amass-path at the binary.",
    },
    IssueDetail {
        code: "AMASS_TIMEOUT",
        title: "Enumeration timed out",
        stage: Stage::Enumeration,
        severity: Severity::Warning,
        description: "Passive enumeration queries many third-party data sources and did not finish within the configured timeout. Partial output is discarded.",
        remediation: "Raise --amass-timeout, or configure fewer data sources in the amass config file.",
    },
    IssueDetail {
        code: "AMASS_FAILED",
        title: "Enumeration failed",
        stage: Stage::Enumeration,
        severity: Severity::Warning,
        description: "The enumeration tool exited with an error status.",
        remediation: "Run the same amass command by hand and check its stderr, usually a config or network problem.",
    },
    IssueDetail {
        code: "NO_SUBDOMAINS",
        title: "No subdomains discovered",
        stage: Stage::Enumeration,
        severity: Severity::Info,
        description: "Enumeration succeeded but public sources know of no names under this domain.",
        remediation: "Nothing to fix. Adding API keys for more data sources to amass often finds more names.",
    },
    // --- Service scan ---
    IssueDetail {
        code: "SHODAN_KEY_MISSING",
        title: "Host-intelligence API key missing",
        stage: Stage::ServiceScan,
        severity: Severity::Warning,
        description: "No API credential is configured, so the service scan was skipped.",
        remediation: "Set SHODAN_API_KEY in the environment or in a .env file.",
    },
    IssueDetail {
        code: "SHODAN_CLIENT_FAILED",
        title: "Host-intelligence client could not be built",
        stage: Stage::ServiceScan,
        severity: Severity::Warning,
        description: "The API base URL or HTTP client configuration is invalid, so the service scan was skipped.",
        remediation: "Check SHODAN_API_URL / --shodan-api-url.",
    },
    IssueDetail {
        code: "DNS_FAILED",
        title: "Hostnames without an A record",
        stage: Stage::ServiceScan,
        severity: Severity::Info,
        description: "Some enumerated names no longer resolve. Passive sources often list stale names.",
        remediation: "Usually nothing to do. Dangling names pointing at released cloud resources are worth a manual look.",
    },
    IssueDetail {
        code: "SHODAN_LOOKUP_FAILED",
        title: "Host lookups failed",
        stage: Stage::ServiceScan,
        severity: Severity::Warning,
        description: "The API returned an error for some addresses: no data for the IP, an exhausted plan, or an invalid key.",
        remediation: "Inspect the per-host error strings; run `recon-bot check` to verify the key and remaining credits.",
    },
    // --- Port/TLS scan ---
    IssueDetail {
        code: "NMAP_PORT_FAILED",
        title: "Port sweep failed",
        stage: Stage::PortScan,
        severity: Severity::Warning,
        description: "The containerized port/service sweep could not run; its artifact only holds the failure marker.",
        remediation: "Check that docker is running and that the nmap image can be pulled (`docker pull <image>`).",
    },
    IssueDetail {
        code: "NMAP_SSL_FAILED",
        title: "TLS sweep failed",
        stage: Stage::PortScan,
        severity: Severity::Warning,
        description: "The containerized TLS cipher enumeration could not run; its artifact only holds the failure marker.",
        remediation: "Check that docker is running and that the target answers on the TLS port.",
    },
    // --- Dispatch ---
    IssueDetail {
        code: "WEBHOOK_NOT_CONFIGURED",
        title: "Webhook URL not configured",
        stage: Stage::Dispatch,
        severity: Severity::Info,
        description: "Artifacts were written locally but not delivered to the automation platform.",
        remediation: "Set MAKE_WEBHOOK_URL to the scenario's webhook address.",
    },
    IssueDetail {
        code: "WEBHOOK_REJECTED",
        title: "Webhook rejected the payload",
        stage: Stage::Dispatch,
        severity: Severity::Warning,
        description: "The endpoint answered with a 4xx status. 410 means no scenario is listening; 400 means the JSON did not match what the scenario expects.",
        remediation: "Turn the scenario on, or re-run its data structure detection against a fresh delivery.",
    },
    IssueDetail {
        code: "WEBHOOK_DOWNSTREAM_FAILED",
        title: "Automation scenario failed",
        stage: Stage::Dispatch,
        severity: Severity::Warning,
        description: "The endpoint answered with a 5xx status, usually the AI summary or the document creation step failing.",
        remediation: "Open the scenario's execution history on the automation platform.",
    },
    IssueDetail {
        code: "WEBHOOK_UNREACHABLE",
        title: "Webhook unreachable",
        stage: Stage::Dispatch,
        severity: Severity::Critical,
        description: "The HTTP request did not complete (DNS, TLS, connection or timeout error).",
        remediation: "Check network access and the webhook URL.",
    },
];

/// Looks up the detail for an issue code.
pub fn get_issue_detail(code: &str) -> Option<&'static IssueDetail> {
    ISSUES.iter().find(|i| i.code == code)
}
