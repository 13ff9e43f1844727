// src/config.rs

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use url::Url;

use crate::core::scanner::port_scanner::NmapOptions;
use crate::core::webhook::RetryPolicy;

pub const DEFAULT_SHODAN_API_URL: &str = "https://api.shodan.io";
pub const DEFAULT_NMAP_IMAGE: &str = "instrumentisto/nmap:latest";

/// Everything the pipeline needs to know about its collaborators.
#[derive(Debug, Clone)]
pub struct Settings {
    pub amass_path: String,
    pub amass_timeout: Duration,
    pub shodan_api_key: Option<String>,
    pub shodan_api_url: String,
    pub shodan_timeout: Duration,
    /// Cap on hostnames sent to the API; 0 means no cap.
    pub max_hosts: usize,
    pub docker_path: String,
    pub nmap_image: String,
    pub nmap_ports: String,
    pub tls_port: u16,
    pub nmap_timeout: Duration,
    pub output_dir: PathBuf,
    pub webhook_url: Option<Url>,
    pub webhook_timeout: Duration,
    pub webhook_retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            amass_path: "amass".to_string(),
            amass_timeout: Duration::from_secs(300),
            shodan_api_key: None,
            shodan_api_url: DEFAULT_SHODAN_API_URL.to_string(),
            shodan_timeout: Duration::from_secs(30),
            max_hosts: 5,
            docker_path: "docker".to_string(),
            nmap_image: DEFAULT_NMAP_IMAGE.to_string(),
            nmap_ports: "1-1000".to_string(),
            tls_port: 443,
            nmap_timeout: Duration::from_secs(300),
            output_dir: PathBuf::from("recon_output"),
            webhook_url: None,
            webhook_timeout: Duration::from_secs(30),
            webhook_retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    pub fn nmap_options(&self) -> NmapOptions {
        NmapOptions {
            docker_path: self.docker_path.clone(),
            image: self.nmap_image.clone(),
            port_range: self.nmap_ports.clone(),
            tls_port: self.tls_port,
            timeout: self.nmap_timeout,
            output_dir: self.output_dir.clone(),
        }
    }
}

/// Command-line options shared by every subcommand. Each one falls back to an
/// environment variable, which may also come from a `.env` file.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Path to the amass binary
    #[arg(long, env = "AMASS_PATH", default_value = "amass", global = true)]
    pub amass_path: String,

    /// Enumeration timeout in seconds
    #[arg(long, env = "AMASS_TIMEOUT", default_value_t = 300, value_name = "SECS", global = true)]
    pub amass_timeout: u64,

    /// Shodan API key
    #[arg(long, env = "SHODAN_API_KEY", hide_env_values = true, global = true)]
    pub shodan_api_key: Option<String>,

    /// Base URL of the Shodan REST API
    #[arg(long, env = "SHODAN_API_URL", default_value = DEFAULT_SHODAN_API_URL, global = true)]
    pub shodan_api_url: String,

    /// Maximum number of subdomains sent to Shodan (0 = all)
    #[arg(long, env = "RECON_MAX_HOSTS", default_value_t = 5, global = true)]
    pub max_hosts: usize,

    /// Container runtime binary
    #[arg(long, env = "DOCKER_PATH", default_value = "docker", global = true)]
    pub docker_path: String,

    /// Container image providing nmap
    #[arg(long, env = "NMAP_DOCKER_IMAGE", default_value = DEFAULT_NMAP_IMAGE, global = true)]
    pub nmap_image: String,

    /// Port range for the service sweep
    #[arg(long, env = "NMAP_PORTS", default_value = "1-1000", global = true)]
    pub nmap_ports: String,

    /// Port for the TLS cipher sweep
    #[arg(long, env = "NMAP_TLS_PORT", default_value_t = 443, global = true)]
    pub tls_port: u16,

    /// Timeout in seconds for each nmap sweep
    #[arg(long, env = "NMAP_TIMEOUT", default_value_t = 300, value_name = "SECS", global = true)]
    pub nmap_timeout: u64,

    /// Directory receiving scan artifacts
    #[arg(long, env = "RECON_OUTPUT_DIR", default_value = "recon_output", global = true)]
    pub output_dir: PathBuf,

    /// Automation platform webhook receiving the report
    #[arg(long, env = "MAKE_WEBHOOK_URL", hide_env_values = true, global = true)]
    pub webhook_url: Option<Url>,

    /// Webhook request timeout in seconds
    #[arg(long, env = "WEBHOOK_TIMEOUT", default_value_t = 30, value_name = "SECS", global = true)]
    pub webhook_timeout: u64,

    /// Retries with exponential backoff on webhook transport errors and 5xx answers
    #[arg(long, env = "WEBHOOK_RETRIES", default_value_t = 0, global = true)]
    pub webhook_retries: u32,
}

impl From<ConfigArgs> for Settings {
    fn from(args: ConfigArgs) -> Self {
        let defaults = Settings::default();
        Self {
            amass_path: args.amass_path,
            amass_timeout: Duration::from_secs(args.amass_timeout),
            // An exported-but-empty variable counts as unset.
            shodan_api_key: args.shodan_api_key.filter(|k| !k.trim().is_empty()),
            shodan_api_url: args.shodan_api_url,
            max_hosts: args.max_hosts,
            docker_path: args.docker_path,
            nmap_image: args.nmap_image,
            nmap_ports: args.nmap_ports,
            tls_port: args.tls_port,
            nmap_timeout: Duration::from_secs(args.nmap_timeout),
            output_dir: args.output_dir,
            webhook_url: args.webhook_url,
            webhook_timeout: Duration::from_secs(args.webhook_timeout),
            webhook_retry: RetryPolicy { max_retries: args.webhook_retries, ..defaults.webhook_retry },
            ..defaults
        }
    }
}
