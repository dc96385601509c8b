use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use opswatch::core::telemetry::AlertSink;
use opswatch::server::{self, AppState};
use opswatch::{AlertManager, Config, SnapshotHub};

/// Live host telemetry over websockets, with threshold alerting.
#[derive(Parser, Debug)]
#[command(name = "opswatch", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "OPSWATCH_LISTEN")]
    listen: Option<String>,

    /// Directory for persisted alert documents
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Shared secret clients must present
    #[arg(long, env = "OPSWATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Host filesystem mount prefix (empty to read the local host)
    #[arg(long, env = "HOST_FS")]
    host_fs: Option<String>,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::from_env();
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(token) = self.token.filter(|t| !t.is_empty()) {
            config.token = Some(token);
        }
        if let Some(root) = self.host_fs {
            config.host_fs = opswatch::utils::HostFs::new(root);
        }
        config
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    opswatch::init_logging();
    let config = Cli::parse().into_config();

    config.validate()?;

    let alerts = AlertManager::open(config.data_dir.clone());
    let sink: Arc<dyn AlertSink> = Arc::new(alerts.clone());
    let hub = SnapshotHub::start(&config, Some(sink));
    let state = AppState::new(Arc::clone(&hub), alerts, &config);

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    let addr = listener.local_addr().context("Failed to read listen address")?;
    println!("opswatch {} listening on {}", env!("CARGO_PKG_VERSION"), addr);
    log::info!("Alert data directory: {}", config.data_dir.display());

    let served = server::serve(listener, state, shutdown_signal()).await;
    hub.shutdown().await;
    served.context("HTTP server failed")?;

    log::info!("opswatch stopped");
    Ok(())
}
