// src/main.rs

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use crossterm::style::{StyledContent, Stylize};
use tracing::info;

use domain_posture::config::ScanConfig;
use domain_posture::core::clock::{Clock, SystemClock};
use domain_posture::core::interpretation::{interpret, overall_severity};
use domain_posture::core::models::{
    DomainScanAggregate, ExecutedScannerResult, ScannerStatus, Severity,
};
use domain_posture::core::scanner::build_engine;
use domain_posture::{logging, normalize_domain};

/// Passive security posture scan of a domain: DNS, email authentication,
/// certificates, registration, TLS and HTTP headers.
#[derive(Debug, Parser)]
#[command(name = "domain-posture", version, about)]
struct Cli {
    /// Domain or URL to scan, e.g. example.com or https://example.com/login
    domain: String,

    /// Print the full JSON report to stdout instead of the text summary
    #[arg(long)]
    json: bool,

    /// Also write the JSON report to this file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Run a single module by id (dns, email-auth, certificates, rdap, tls, headers)
    #[arg(long, value_name = "ID")]
    only: Option<String>,

    /// Mirror log output to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let log_path = logging::initialize_logging(cli.verbose)?;
    info!(log = %log_path.display(), "Logging initialized.");

    let config = ScanConfig::load().wrap_err("Could not load configuration")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = build_engine(&config, clock.clone())?;

    let aggregate = match &cli.only {
        Some(id) => {
            let domain = normalize_domain(&cli.domain);
            eprintln!("{} {} on {}", "Running".bold(), id, domain);
            let result = engine.run_one(&domain, id).await?;
            print_progress(&result);
            DomainScanAggregate::new(domain, clock.now(), vec![result])
        }
        None => {
            eprintln!("{} {}", "Scanning".bold(), normalize_domain(&cli.domain));
            engine
                .run_all_with_progress(&cli.domain, |results| {
                    if let Some(latest) = results.last() {
                        print_progress(latest);
                    }
                })
                .await
        }
    };

    if cli.json {
        println!("{}", aggregate.to_json_pretty()?);
    } else {
        print_report(&aggregate);
    }

    if let Some(path) = &cli.output {
        std::fs::write(path, aggregate.to_json_pretty()?)
            .wrap_err_with(|| format!("Could not write report to {}", path.display()))?;
        eprintln!("Report written to {}", path.display());
    }

    Ok(())
}

fn print_progress(result: &ExecutedScannerResult) {
    match result.status {
        ScannerStatus::Idle => {}
        ScannerStatus::Running => eprintln!("  {} {}", "…".dark_grey(), result.label),
        ScannerStatus::Success => eprintln!(
            "  {} {}: {}",
            "✓".green(),
            result.label,
            result.summary.as_deref().unwrap_or_default()
        ),
        ScannerStatus::Error => eprintln!(
            "  {} {}: {}",
            "✗".red(),
            result.label,
            result.error.as_deref().unwrap_or_default()
        ),
    }
}

fn severity_tag(severity: Severity) -> StyledContent<String> {
    let tag = format!("[{}]", severity.to_string().to_uppercase());
    match severity {
        Severity::Success => tag.green().bold(),
        Severity::Info => tag.blue().bold(),
        Severity::Warning => tag.yellow().bold(),
        Severity::Critical => tag.red().bold(),
        Severity::Error => tag.magenta().bold(),
    }
}

fn print_report(aggregate: &DomainScanAggregate) {
    println!();
    println!(
        "{} {}  {}",
        "Security posture for".bold(),
        aggregate.domain.as_str().bold(),
        severity_tag(overall_severity(&aggregate.scanners))
    );

    for result in &aggregate.scanners {
        let verdict = interpret(result);
        println!();
        println!("{} {}", severity_tag(verdict.severity), result.label.as_str().bold());
        println!("  {}", verdict.message);
        for issue in &result.issues {
            println!("    - {issue}");
        }
        if verdict.severity > Severity::Info {
            println!("  {} {}", "→".cyan(), verdict.recommendation);
        }
    }

    println!();
    println!(
        "{} issue(s) found across {} module(s)",
        aggregate.issues.len(),
        aggregate.scanners.len()
    );
}
