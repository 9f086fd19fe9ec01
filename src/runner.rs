//! Per-host certificate run.
//!
//! Hosts are processed strictly one after another. Every error is caught at
//! the host boundary and turned into a `HostOutcome`; nothing a single
//! controller does can stop the remaining hosts from being processed.

use log::{error, info, warn};
use reqwest::Client;
use serde::Serialize;
use url::Url;

use crate::cimc::{xml, CimcClient, RawResponse};
use crate::config::{self, RequestMode, Subject, ToolConfig};
use crate::error::Result;

/// Result of one login → action → logout cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HostResult {
    /// The certificate command reached the controller. `status_code` is
    /// whatever the controller answered; it is reported, not judged.
    Success { status_code: u16, response: String },
    Failure { kind: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct HostOutcome {
    pub server:      String,
    pub common_name: String,
    pub mode:        RequestMode,
    #[serde(flatten)]
    pub result:      HostResult,
}

impl HostOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.result, HostResult::Success { .. })
    }
}

/// Outcomes for the whole host list, in configuration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<HostOutcome>,
}

impl RunReport {
    /// No hosts were configured, so no request was made.
    pub fn nothing_to_do(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Run the configured certificate request against every host.
pub async fn run_all(cfg: &ToolConfig, http: &Client) -> RunReport {
    run_all_with(cfg, http, config::endpoint_url).await
}

/// As [`run_all`], resolving each host's XML API endpoint with `resolve`.
pub async fn run_all_with<F>(cfg: &ToolConfig, http: &Client, resolve: F) -> RunReport
where
    F: Fn(&str) -> Result<Url>,
{
    let mut report = RunReport::default();
    for server in &cfg.servers {
        let outcome = run_host(cfg, http, server, &resolve).await;
        report.outcomes.push(outcome);
    }
    report
}

async fn run_host<F>(cfg: &ToolConfig, http: &Client, server: &str, resolve: &F) -> HostOutcome
where
    F: Fn(&str) -> Result<Url>,
{
    let subject = cfg.subject_for(server);

    let result = match resolve(server) {
        Ok(url) => {
            let client = CimcClient::with_url(http.clone(), server, url);
            certify(cfg, &client, &subject).await
        }
        Err(e) => Err(e),
    };

    let result = match result {
        Ok(resp) => HostResult::Success { status_code: resp.status, response: resp.body },
        Err(e) => {
            error!("{} failed for {server} ({}): {e}", describe(cfg.mode), e.kind());
            HostResult::Failure { kind: e.kind().to_string(), message: e.to_string() }
        }
    };

    HostOutcome {
        server:      server.to_string(),
        common_name: subject.common_name,
        mode:        cfg.mode,
        result,
    }
}

fn describe(mode: RequestMode) -> &'static str {
    match mode {
        RequestMode::SelfSigned => "Self-Signed Certificate Signing Request",
        RequestMode::Csr        => "Certificate Signing Request",
    }
}

/// Login, issue the mode's command, then log out. Logout is attempted
/// whenever login succeeded, whether or not the command did.
async fn certify(cfg: &ToolConfig, client: &CimcClient, subject: &Subject) -> Result<RawResponse> {
    let server = client.server();

    info!("Logging in to {server}...");
    let token = client.login(&cfg.username, &cfg.password).await?;

    let action = match cfg.mode {
        RequestMode::SelfSigned => {
            info!("Generating the self-signed certificate for {server} (CN={})...", subject.common_name);
            client.generate_self_signed_certificate(&token, subject).await
        }
        RequestMode::Csr => {
            info!("Generating the certificate signing request for {server} (CN={})...", subject.common_name);
            client.generate_certificate_signing_request(&token, subject, &cfg.csr).await
        }
    };

    if let Ok(resp) = &action {
        info!("- {} Status Code: {}", describe(cfg.mode), resp.status);
        info!("- {} Response: {}", describe(cfg.mode), resp.body);
        if let Some(detail) = xml::response_error(&resp.body) {
            warn!("{server} reported an error: {detail}");
        }
    }

    info!("Logging out of {server}...");
    if let Err(e) = client.logout(token).await {
        warn!("logout of {server} failed (session will expire on the controller): {e}");
    }

    action
}

/// Log the end-of-run summary.
pub fn log_summary(report: &RunReport) {
    if report.nothing_to_do() {
        info!("There are no certificate signing requests to perform: no CIMC servers were provided");
        return;
    }
    for outcome in &report.outcomes {
        match &outcome.result {
            HostResult::Success { status_code, .. } => {
                info!("{}: ok (HTTP {status_code}, CN={})", outcome.server, outcome.common_name);
            }
            HostResult::Failure { kind, .. } => {
                warn!("{}: FAILED ({kind} error)", outcome.server);
            }
        }
    }
    info!("{} succeeded, {} failed", report.succeeded(), report.failed());
}
