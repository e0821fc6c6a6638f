use anyhow::{Context, anyhow};
use clap::Parser;
use common::log_error;
use log::info;
use rustls::crypto::CryptoProvider;
use sidekick::cli::Cli;
use sidekick::{Config, ConsulClient, KubeDiscovery, PollLoop, Sidekick};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .map_err(|_| anyhow!("failed to install default CryptoProvider"))?;

    let cfg = Config::from_cli(Cli::parse())?;

    let membership = Arc::new(
        ConsulClient::try_new(
            &cfg.consul_api_host,
            cfg.consul_token.as_deref(),
            cfg.consul_timeout,
        )
        .context("cannot create consul client")?,
    );
    let discovery = Arc::new(KubeDiscovery::try_new(cfg.kubeconfig.as_deref()).await?);

    let sidekick = Sidekick::try_new(discovery, membership, &cfg).await?;
    info!(
        target: "sidekick::main",
        "watching consul pod {}/{} through {} (identity policy {:?})",
        cfg.namespace, cfg.pod_name, cfg.consul_api_host, cfg.identity_policy
    );

    if cfg.once {
        let report = sidekick.run_cycle().await?;
        info!(target: "sidekick::main", "single cycle finished: {report}");
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!(target: "sidekick::main", "received shutdown signal, stopping after the current cycle");
        let _ = stop_tx.send(true);
    });

    PollLoop::new(sidekick, cfg.poll_period).run(stop_rx).await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => log_error!(res, "cannot listen for ctrl-c"),
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("cannot listen for SIGTERM: {e}");
                log_error!(tokio::signal::ctrl_c().await, "cannot listen for ctrl-c");
            }
        }
    }
    #[cfg(not(unix))]
    log_error!(tokio::signal::ctrl_c().await, "cannot listen for ctrl-c");
}
