use anyhow::{Context, Result};
use clap::Parser;
use insights_cluster_monitor::monitor::{register_local_cluster, watch_managed_clusters};
use insights_cluster_monitor::{logging, ClusterMonitor, Config, ReportPoller};
use kube::config::{KubeConfigOptions, Kubeconfig};
use tokio::{
    select,
    signal::unix::{signal, SignalKind},
};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
struct Opts {
    /// Turn debug logs on
    #[clap(long, env = "DEBUG")]
    debug: bool,
}

async fn kube_client(config: &Config) -> Result<kube::Client> {
    let kube_config = match config.kube_config() {
        Some(path) => {
            info!("Using kubeconfig {path}");
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed reading kubeconfig {path}"))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => kube::Config::infer().await?,
    };
    Ok(kube::Client::try_from(kube_config)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    logging::init(opts.debug)?;
    info!("Starting insights cluster monitor");

    let config = Config::from_env();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let client = kube_client(&config).await?;
    let monitor = ClusterMonitor::new();
    let poller = ReportPoller::new(&config, monitor.clone())?;

    if let Err(err) = register_local_cluster(client.clone(), &monitor).await {
        error!("Could not register the local cluster: {err:?}");
    }

    select! {
        _ = sigterm.recv() => {
            warn!("SIGTERM received, exiting");
            Ok(())
        }

        _ = sigint.recv() => {
            warn!("SIGINT received, exiting");
            Ok(())
        }

        result = watch_managed_clusters(client, monitor.clone()) => {
            warn!("ManagedCluster watch finished");
            result
        }

        result = poller.run() => {
            warn!("Report poller finished");
            result
        }
    }
}
