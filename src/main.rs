//! Cisco IMC certificate renewal tool.
//!
//! Logs in to each configured CIMC over its XML API and requests either a
//! self-signed certificate or a CSR for submission to a certificate authority.
//!
//! Usage:
//!   cimc-cert -c /etc/cimc-cert.conf
//!   cimc-cert -c /etc/cimc-cert.conf --server 10.1.1.20 --server 10.1.1.21
//!   cimc-cert -c /etc/cimc-cert.conf --syslog --strict   # cron

mod cimc;
mod config;
mod error;
mod runner;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "cimc-cert", about = "Request new TLS certificates from Cisco IMC controllers")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = "cimc-cert.conf")]
    config: PathBuf,

    /// Target CIMC host; repeat to list several. Replaces `servers` from the file.
    #[arg(long = "server", value_name = "HOST")]
    servers: Vec<String>,

    /// Print the per-host report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Exit with status 2 if any host failed (default: always exit 0).
    #[arg(long)]
    strict: bool,

    /// Log to syslog instead of stderr.
    #[arg(long)]
    syslog: bool,

    /// Load and validate the configuration, then exit without contacting any host.
    #[arg(long)]
    check: bool,
}

/// Exit status used by `--strict` when at least one host failed.
const EXIT_HOST_FAILURE: i32 = 2;

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("cimc-cert: config error: {e}");
            process::exit(1);
        }
    };
    let cfg = config::apply_env_overrides(cfg, |key| std::env::var(key).ok());
    let cfg = with_cli_servers(cfg, &cli.servers);
    if let Err(e) = config::validate_config(&cfg) {
        eprintln!("cimc-cert: config validation: {e}");
        process::exit(1);
    }

    if let Err(e) = setup_logging(cli.syslog) {
        eprintln!("cimc-cert: {e:#}");
        process::exit(1);
    }

    if cli.check {
        info!("configuration OK: {cfg:?}");
        return;
    }

    let http = match cimc::build_http_client(Duration::from_secs(cfg.timeout_secs)) {
        Ok(c) => c,
        Err(e) => {
            error!("cannot build HTTP client: {e}");
            process::exit(1);
        }
    };

    info!("Starting the CIMC certificate renewal tool ({} mode, {} host(s))", cfg.mode, cfg.servers.len());
    let report = runner::run_all(&cfg, &http).await;
    runner::log_summary(&report);
    info!("The CIMC certificate renewal tool has completed");

    if cli.json {
        match render_json(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("cannot encode report: {e}"),
        }
    }

    let code = exit_code(cli.strict, &report);
    if code != 0 {
        process::exit(code);
    }
}

/// `--server` entries replace the configured host list when any are given.
fn with_cli_servers(cfg: config::ToolConfig, servers: &[String]) -> config::ToolConfig {
    if servers.is_empty() {
        cfg
    } else {
        config::ToolConfig { servers: servers.to_vec(), ..cfg }
    }
}

fn render_json(report: &runner::RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// 0 unless `--strict` was given and at least one host failed.
fn exit_code(strict: bool, report: &runner::RunReport) -> i32 {
    if strict && report.failed() > 0 {
        EXIT_HOST_FAILURE
    } else {
        0
    }
}

// ── Logging setup ─────────────────────────────────────────────────────────────

fn setup_logging(use_syslog: bool) -> anyhow::Result<()> {
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process:  "cimc-cert".into(),
            pid:      process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(log::LevelFilter::Info))
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init()
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    }
    Ok(())
}
