use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use srvbench::api::{self, AppState};
use srvbench::bench::{JobRegistry, JobScheduler};
use srvbench::config::ServiceConfig;

/// How long shutdown waits for canceled jobs to unwind
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "srvbench", version, about = "Server benchmark job service")]
struct Args {
    /// Configuration file (defaults to <config dir>/srvbench/srvbench.toml)
    #[arg(long, env = "SRVBENCH_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SRVBENCH_HOST")]
    host: Option<String>,

    #[arg(long, env = "SRVBENCH_PORT")]
    port: Option<u16>,

    /// Bearer token required on /benchmark routes
    #[arg(long, env = "SRVBENCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Directory for disk benchmark scratch files
    #[arg(long, env = "SRVBENCH_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Serve benchmark routes without authentication when no token is set
    #[arg(long, env = "SRVBENCH_INSECURE_NO_AUTH")]
    insecure_no_auth: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::load_from(path)?,
            None => ServiceConfig::load()?,
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(token) = &self.token {
            config.api_token = Some(token.clone());
        }
        if let Some(dir) = &self.scratch_dir {
            config.scratch_dir = dir.clone();
        }
        if self.insecure_no_auth {
            config.allow_anonymous = true;
        }

        config.validate()?;
        config.check_auth()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("srvbench=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(args.load_config().context("failed to load configuration")?);

    if config.api_token.is_none() {
        warn!("anonymous access allowed, benchmark endpoints are unauthenticated");
    }

    let registry = Arc::new(JobRegistry::new());
    let scheduler = Arc::new(JobScheduler::new(registry, Arc::clone(&config)));
    let reaper = scheduler.spawn_reaper();

    let app = api::router(AppState::new(Arc::clone(&scheduler)));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(
        %addr,
        scratch_dir = %config.scratch_dir.display(),
        max_concurrent_jobs = config.limits.max_concurrent_jobs,
        "srvbench listening"
    );

    let shutdown_scheduler = Arc::clone(&scheduler);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
            shutdown_scheduler.shutdown();
        })
        .await
        .context("server error")?;

    reaper.abort();
    if !scheduler.wait_idle(SHUTDOWN_DRAIN).await {
        warn!(
            active = scheduler.registry().active_count(),
            "jobs still running at exit"
        );
    }
    info!("srvbench stopped");

    Ok(())
}
