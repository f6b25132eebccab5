use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use multipost_core::browser::{ChromiumLauncher, TabSurface};
use multipost_core::config::MultipostConfig;
use multipost_core::model::PublishRequest;
use multipost_core::orchestrator::{DispatchReport, Orchestrator, PlatformResult};
use multipost_core::registry::PlatformRegistry;
use tracing::{info, warn};

use crate::{AppError, DisplayFallback, Result};

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// JSON file holding the publish request
    #[arg(long)]
    pub request: PathBuf,
    /// Click publish controls regardless of the request's own setting
    #[arg(long)]
    pub auto_publish: bool,
    /// Run Chromium without a window
    #[arg(long)]
    pub headless: bool,
    /// Upper bound on waiting for every tab to finish
    #[arg(long, default_value_t = 600)]
    pub wait_seconds: u64,
    /// Leave the browser open for manual review until Ctrl-C
    #[arg(long)]
    pub keep_open: bool,
}

pub fn prepare(mut request: PublishRequest, args: &PublishArgs) -> PublishRequest {
    if args.auto_publish {
        request.auto_publish = true;
    }
    request
}

pub async fn publish(
    mut config: MultipostConfig,
    registry: PlatformRegistry,
    request: PublishRequest,
    args: &PublishArgs,
) -> Result<DispatchReport> {
    if args.headless {
        config.chromium.headless = true;
    }
    let surface = Arc::new(ChromiumLauncher::new(config.clone()).launch().await?);
    let orchestrator = Orchestrator::from_config(
        Arc::clone(&surface) as Arc<dyn TabSurface>,
        Arc::new(registry),
        &config,
    )?;

    let dispatch = orchestrator.publish(request).await;
    info!(batch = %dispatch.batch_id(), tabs = dispatch.bindings().len(), "waiting for composers");
    let joined = tokio::time::timeout(Duration::from_secs(args.wait_seconds), dispatch.join()).await;

    if args.keep_open {
        info!("browser left open, press Ctrl-C to close");
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
        }
    }
    surface.shutdown().await?;
    joined.map_err(|_| AppError::Timeout(args.wait_seconds))
}

impl DisplayFallback for DispatchReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "batch {} started {}: {}/{} completed",
            self.batch_id,
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.completed(),
            self.outcomes.len()
        )];
        for outcome in &self.outcomes {
            let status = match &outcome.result {
                PlatformResult::Completed { report } => format!(
                    "completed (fields {}, media {}, publish {:?})",
                    report.fields_filled, report.media_attached, report.published
                ),
                PlatformResult::Failed { reason } => format!("failed: {reason}"),
                PlatformResult::NeverLoaded { reason } => format!("never loaded: {reason}"),
            };
            lines.push(format!("  {:<20} tab {:<4} {status}", outcome.platform, outcome.tab.to_string()));
        }
        if !self.unresolved.is_empty() {
            lines.push(format!("unknown platforms: {}", self.unresolved.join(", ")));
        }
        if !self.not_opened.is_empty() {
            lines.push(format!("tabs not opened: {}", self.not_opened.join(", ")));
        }
        lines.join("\n")
    }
}
