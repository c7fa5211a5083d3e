use crate::config::Config;
use crate::monitor::{ClusterMonitor, ClusterSnapshot};
use anyhow::{Context, Result};
use chrono::prelude::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::{select, time};
use tracing::{debug, error, info};
use url::Url;

/// Longest wait between two rounds. `Instant` arithmetic overflows well
/// before `Duration::MAX`.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Periodically fetches insights reports for the clusters that need them.
#[derive(Clone)]
pub struct ReportPoller {
    monitor: ClusterMonitor,
    client: reqwest::Client,
    server: Url,
    token: Option<String>,
    use_mock: bool,
    poll_interval: Duration,
    request_interval: Duration,
    reports: Arc<RwLock<HashMap<String, ClusterReport>>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClusterReport {
    pub cluster_id: String,
    pub timestamp: DateTime<Utc>,
    pub content: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ClusterReport {
    fn new(cluster_id: &str, content: serde_json::Value) -> Self {
        Self {
            cluster_id: cluster_id.to_owned(),
            timestamp: Utc::now(),
            content: Some(content),
            error: None,
        }
    }

    fn new_error(cluster_id: &str, err: anyhow::Error) -> Self {
        Self {
            cluster_id: cluster_id.to_owned(),
            timestamp: Utc::now(),
            content: None,
            error: Some(format!("{err:#}")),
        }
    }
}

impl ReportPoller {
    pub fn new(config: &Config, monitor: ClusterMonitor) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("Failed building the report HTTP client")?;
        let server = config
            .ccx_server()
            .with_context(|| format!("Invalid CCX_SERVER {:?}", config.ccx_server))?;

        Ok(Self {
            monitor,
            client,
            server,
            token: config.ccx_token().map(ToOwned::to_owned),
            use_mock: config.use_mock,
            poll_interval: config
                .poll_interval()
                .clamp(Duration::from_secs(1), MAX_POLL_INTERVAL),
            request_interval: config.request_interval(),
            reports: Default::default(),
        })
    }

    #[tracing::instrument(skip_all, name = "report-poller")]
    pub async fn run(&self) -> Result<()> {
        let mut interval = time::interval(self.poll_interval);
        let mut changes = self.monitor.subscribe();

        loop {
            select! {
                _ = interval.tick() => {}
                result = changes.changed() => {
                    result.context("Cluster monitor notifications closed")?;
                    debug!("Cluster list changed, polling early");
                    interval.reset();
                }
            }
            self.poll_once().await;
        }
    }

    /// Fetches one report per cluster that needs one, and forgets reports of
    /// clusters that are gone.
    pub async fn poll_once(&self) {
        let snapshot = self.monitor.snapshot();
        self.forget_unknown(&snapshot);

        let local_cluster = self.monitor.get_local_cluster();
        let mut first = true;
        for cluster in snapshot.clusters_needing_ccx() {
            if !first && !self.request_interval.is_zero() {
                time::sleep(self.request_interval).await;
            }
            first = false;

            debug!(
                namespace = %cluster.namespace,
                cluster_id = %cluster.cluster_id,
                is_local = cluster.cluster_id == local_cluster,
                "Fetching report"
            );
            let report = match self.fetch_report(&cluster.cluster_id).await {
                Ok(content) => ClusterReport::new(&cluster.cluster_id, content),
                Err(err) => {
                    error!(
                        "Failed fetching report for {} ({}): {err:?}",
                        cluster.namespace, cluster.cluster_id
                    );
                    ClusterReport::new_error(&cluster.cluster_id, err)
                }
            };
            self.reports
                .write()
                .insert(cluster.cluster_id.clone(), report);
        }
        info!(reports = self.reports.read().len(), "Polling round finished");
    }

    pub fn reports(&self) -> HashMap<String, ClusterReport> {
        self.reports.read().clone()
    }

    pub fn report_url(&self, cluster_id: &str) -> Result<Url> {
        let base = self.server.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{cluster_id}/reports"))?)
    }

    async fn fetch_report(&self, cluster_id: &str) -> Result<serde_json::Value> {
        if self.use_mock {
            return Ok(json!({ "cluster": cluster_id, "reports": [] }));
        }

        let mut request = self.client.get(self.report_url(cluster_id)?);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }
        Ok(request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    fn forget_unknown(&self, snapshot: &ClusterSnapshot) {
        self.reports
            .write()
            .retain(|cluster_id, _| snapshot.needs_ccx(cluster_id));
    }
}
