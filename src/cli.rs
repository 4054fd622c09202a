use anyhow::{Context, Result, bail};
use clap::Args;
use dindtest::{DaemonConfig, DaemonHandle};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args)]
pub struct DaemonOptions {
    /// TOML file with daemon settings (repository, readiness, auth, ...)
    #[arg(long, env = "DINDTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Docker version of the nested daemon (e.g. 1.10)
    #[arg(long = "docker-version")]
    docker_version: Option<String>,
}

impl DaemonOptions {
    /// File (or defaults), then `DINDTEST_*` variables, then flags.
    pub fn resolve(&self) -> Result<DaemonConfig> {
        let base = match &self.config {
            Some(path) => DaemonConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => DaemonConfig::default(),
        };

        let mut config = base
            .with_overrides(|key| std::env::var(key).ok())
            .context("reading DINDTEST_* environment")?;

        if let Some(version) = &self.docker_version {
            config = config.with_version(version);
        }

        Ok(config)
    }
}

fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

/// Starts `daemon`, force-removing whatever a failed start could not clean up.
async fn start_or_reclaim(daemon: &mut DaemonHandle, cancel: &CancellationToken) -> Result<()> {
    if let Err(e) = daemon.start_with_cancel(cancel).await {
        // non-forced cleanup refuses running containers; force it here
        if e.cleanup_error().is_some() {
            if let Err(close) = daemon.close().await {
                warn!(error = %close, "container left behind");
            }
        }
        return Err(e).context("starting nested daemon");
    }
    Ok(())
}

pub async fn up(config: DaemonConfig) -> Result<()> {
    let cancel = shutdown_token();

    let mut daemon = DaemonHandle::connect(config)?;
    start_or_reclaim(&mut daemon, &cancel).await?;

    println!("{}", daemon.url());
    println!("DOCKER_HOST={}", daemon.endpoint().address());
    info!("nested daemon up, Ctrl-C to remove it");

    cancel.cancelled().await;
    daemon.close().await.context("removing nested daemon")?;
    Ok(())
}

pub async fn check(config: DaemonConfig) -> Result<()> {
    let mut daemon = DaemonHandle::connect(config)?;
    start_or_reclaim(&mut daemon, &shutdown_token()).await?;

    let outcome = report_version(&daemon).await;

    if let Err(e) = daemon.close().await {
        warn!(error = %e, "removing nested daemon");
        if outcome.is_ok() {
            return Err(e).context("removing nested daemon");
        }
    }
    outcome
}

async fn report_version(daemon: &DaemonHandle) -> Result<()> {
    let client = daemon.client()?;
    client
        .ping()
        .await
        .with_context(|| format!("pinging {}", daemon.url()))?;

    let version = client.version().await.context("querying version")?;
    let Some(reported) = version.version else {
        bail!("nested daemon at {} did not report a version", daemon.url());
    };

    println!("{} docker {}", daemon.url(), reported);
    Ok(())
}
