//! # cmpscan
//!
//! Launches Chrome, runs one consent-collection visit against a URL and
//! prints the report as JSON on stdout. Logs go to stderr.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cmpscan_cdp::{CdpSession, LaunchOptions, chrome::find_chrome};
use cmpscan_collector::{AgentProgram, CmpCollector};
use cmpscan_core::{AutoAction, VisitReport};
use cmpscan_settings::{CmpscanSettings, load_settings_from_path, settings_path};

/// Detect consent banners and privacy signals on a web page.
#[derive(Parser, Debug)]
#[command(name = "cmpscan", about = "Detect consent banners and privacy signals on a web page")]
struct Cli {
    /// Page to visit.
    url: String,

    /// Consent action to perform when a banner is found (`opt-in` or `opt-out`).
    #[arg(long)]
    action: Option<AutoAction>,

    /// Path to the consent agent bundle injected into each frame.
    #[arg(long)]
    agent_script: PathBuf,

    /// Settings file (defaults to `~/.cmpscan/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Collapse every protocol wait to a single check.
    #[arg(long)]
    short_timeouts: bool,

    /// Log filter (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    fn apply(&self, settings: &mut CmpscanSettings) {
        if self.action.is_some() {
            settings.collector.auto_action = self.action;
        }
        if self.short_timeouts {
            settings.collector.short_timeouts = true;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);

    if settings.logging.json {
        cmpscan_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        cmpscan_core::logging::init_subscriber(&settings.logging.level);
    }

    let agent = AgentProgram::from_file(&args.agent_script).with_context(|| {
        format!("Failed to read agent script {}", args.agent_script.display())
    })?;

    let report = visit(&args.url, &settings, agent).await?;
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    println!("{json}");
    Ok(())
}

/// Run one visit in a fresh browser.
async fn visit(url: &str, settings: &CmpscanSettings, agent: AgentProgram) -> Result<VisitReport> {
    let chrome = find_chrome(settings.browser.chrome_path.as_deref().map(Path::new))
        .context("Chrome not found; set CHROME_PATH or browser.chromePath")?;
    tracing::info!(path = %chrome.display(), "launching Chrome");

    let command_timeout = Duration::from_millis(settings.browser.command_timeout_ms);
    let session = Arc::new(
        CdpSession::launch(
            &chrome,
            LaunchOptions {
                headless: settings.browser.headless,
                command_timeout,
            },
        )
        .await
        .context("Failed to launch Chrome")?,
    );

    let result = run_collector(&session, url, settings, agent, command_timeout).await;
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "failed to close browser");
    }
    result
}

async fn run_collector(
    session: &Arc<CdpSession>,
    url: &str,
    settings: &CmpscanSettings,
    agent: AgentProgram,
    load_timeout: Duration,
) -> Result<VisitReport> {
    let collector = CmpCollector::new(session.clone(), settings.collector.clone(), agent)
        .context("Invalid collector configuration")?;
    collector
        .attach()
        .await
        .context("Failed to attach collector")?;

    tracing::info!(url, "navigating");
    session
        .navigate(url, load_timeout)
        .await
        .with_context(|| format!("Failed to load {url}"))?;
    tokio::time::sleep(Duration::from_millis(settings.browser.settle_ms)).await;

    let _ = collector.post_load().await;
    let report = collector.finish().await;
    tracing::info!(outcome = ?report.outcome, cmps = report.cmps.len(), "visit finished");
    Ok(report)
}
