// src/main.rs

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use tracing::{info, warn};

mod config;
mod core;
mod logging;

use crate::config::{ConfigArgs, Settings};
use crate::core::knowledge_base::get_issue_detail;
use crate::core::models::{Issue, Stage, StageStatus};
use crate::core::pipeline::Pipeline;
use crate::core::scanner::port_scanner::PortScanner;
use crate::core::scanner::service_scanner::{scan_hosts, ShodanClient};
use crate::core::target::Target;
use crate::core::webhook::{ArtifactFile, WebhookPayload, MAX_FILES};

#[derive(Debug, Parser)]
#[command(name = "recon-bot", version, about = "Passive recon pipeline: amass, Shodan, nmap, webhook report")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Only log warnings and errors to stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full pipeline against a domain and print the report as JSON
    Run {
        domain: String,
        /// Also write the report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Only enumerate subdomains
    Enumerate { domain: String },
    /// Resolve hostnames and look them up in Shodan
    Shodan {
        #[arg(required = true)]
        hosts: Vec<String>,
    },
    /// Only run the port and TLS sweeps
    Nmap { domain: String },
    /// Send existing files to the webhook
    Dispatch {
        domain: String,
        #[arg(short, long = "file", value_name = "PATH", required = true)]
        files: Vec<PathBuf>,
    },
    /// Check that every external tool and credential is usable
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    let cli = Cli::parse();
    let log_path = logging::initialize_logging(cli.quiet)?;
    info!(log = %log_path.display(), "recon-bot {} starting.", env!("CARGO_PKG_VERSION"));

    let pipeline = Pipeline::from_settings(Settings::from(cli.config));

    match cli.command {
        Command::Run { domain, output } => run(&pipeline, &domain, output).await,
        Command::Enumerate { domain } => {
            let target = parse_target(&domain)?;
            let names = pipeline.enumerator().enumerate(&target).await?;
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
        Command::Shodan { hosts } => {
            let intel = pipeline
                .intel()
                .ok_or_else(|| eyre!("SHODAN_API_KEY is required for the shodan command"))?;
            let report = scan_hosts(&hosts, pipeline.resolver(), intel).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Nmap { domain } => {
            let target = parse_target(&domain)?;
            let options = pipeline.settings().nmap_options();
            let artifacts = PortScanner::new(pipeline.runner(), &options)
                .scan(&target)
                .await
                .wrap_err_with(|| format!("could not write nmap artifacts to {}", options.output_dir.display()))?;
            println!("{}", serde_json::to_string_pretty(&artifacts)?);
            Ok(())
        }
        Command::Dispatch { domain, files } => dispatch(&pipeline, &domain, files).await,
        Command::Check => check(&pipeline).await,
    }
}

fn parse_target(domain: &str) -> Result<Target> {
    Target::parse(domain).wrap_err_with(|| format!("invalid target {domain:?}"))
}

async fn run(pipeline: &Pipeline, domain: &str, output: Option<PathBuf>) -> Result<()> {
    let target = parse_target(domain)?;
    let report = pipeline.run(&target).await?;
    let json = serde_json::to_string_pretty(&report)?;

    if let Some(path) = output {
        tokio::fs::write(&path, &json)
            .await
            .wrap_err_with(|| format!("could not write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written.");
    }
    println!("{json}");

    for issue in &report.issues {
        explain(issue);
    }
    if let Some(StageStatus::Degraded { reason }) = report.status_of(Stage::Dispatch) {
        warn!(reason = %reason, "Report was not delivered to the webhook.");
    }
    Ok(())
}

/// Prints the knowledge-base explanation of an issue to stderr.
fn explain(issue: &Issue) {
    let detail = issue.detail.as_deref().unwrap_or("");
    match get_issue_detail(&issue.code) {
        Some(info) => {
            eprintln!("[{:?}] {} ({}): {} {}", info.severity, info.title, info.stage, info.description, detail);
            eprintln!("    fix: {}", info.remediation);
        }
        None => eprintln!("[{}] {} {}", issue.stage, issue.code, detail),
    }
}

async fn dispatch(pipeline: &Pipeline, domain: &str, paths: Vec<PathBuf>) -> Result<()> {
    let target = parse_target(domain)?;
    if paths.len() > MAX_FILES {
        bail!("at most {MAX_FILES} files can be dispatched, got {}", paths.len());
    }
    let dispatcher = pipeline
        .dispatcher()
        .ok_or_else(|| eyre!("MAKE_WEBHOOK_URL is required for the dispatch command"))?;

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let content = tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("could not read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| eyre!("{} has no file name", path.display()))?;
        files.push(ArtifactFile::new(name, content));
    }

    let payload = WebhookPayload::new(target.as_str(), files)?;
    let response = dispatcher.dispatch(&payload).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if let Some(hint) = response.hint() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

async fn check(pipeline: &Pipeline) -> Result<()> {
    let settings = pipeline.settings();
    let mut failures = 0;

    match pipeline.enumerator().verify().await {
        Ok(version) => println!("amass     ok    {version}"),
        Err(e) => {
            failures += 1;
            println!("amass     FAIL  {e}");
        }
    }

    let options = settings.nmap_options();
    match PortScanner::new(pipeline.runner(), &options).verify().await {
        Ok(version) => println!("docker    ok    {version} (image {})", options.image),
        Err(e) => {
            failures += 1;
            println!("docker    FAIL  {e}");
        }
    }

    match settings.shodan_api_key.as_deref() {
        None => println!("shodan    skip  SHODAN_API_KEY not set"),
        Some(key) => {
            let info = match ShodanClient::new(key, &settings.shodan_api_url, settings.shodan_timeout) {
                Ok(client) => client.api_info().await,
                Err(e) => Err(e),
            };
            match info {
                Ok(info) => println!(
                    "shodan    ok    plan {}, {} query / {} scan credits",
                    info.plan.as_deref().unwrap_or("unknown"),
                    info.query_credits.unwrap_or_default(),
                    info.scan_credits.unwrap_or_default()
                ),
                Err(e) => {
                    failures += 1;
                    println!("shodan    FAIL  {e}");
                }
            }
        }
    }

    match &settings.webhook_url {
        Some(url) => println!("webhook   ok    {}", url.host_str().unwrap_or_default()),
        None => println!("webhook   skip  MAKE_WEBHOOK_URL not set"),
    }

    if failures > 0 {
        warn!(failures, "Some checks failed.");
        bail!("{failures} check(s) failed");
    }
    Ok(())
}
