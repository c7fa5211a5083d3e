use super::identity::{is_cluster_missing, LOCAL_CLUSTER_NAMESPACE};
use super::registry::ClusterMonitor;
use super::resources::{cluster_version_api_resource, ManagedCluster, CLUSTER_VERSION_NAME};
use crate::error::{LookupError, MonitorError};
use anyhow::{anyhow, Result};
use futures::{Future, StreamExt};
use kube::api::{Api, DynamicObject};
use kube::runtime::watcher;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use tryhard::RetryPolicy;

const CLUSTER_VERSION_RETRIES: u32 = 3;
const CLUSTER_VERSION_BACKOFF: Duration = Duration::from_secs(2);

/// Fetches the current state of a single ManagedCluster.
pub trait ClusterLookup {
    fn lookup(&self, name: &str)
        -> impl Future<Output = Result<ManagedCluster, LookupError>> + Send;
}

impl ClusterLookup for Api<ManagedCluster> {
    async fn lookup(&self, name: &str) -> Result<ManagedCluster, LookupError> {
        self.get(name)
            .await
            .map_err(|err| LookupError::from_kube(name, err))
    }
}

/// Fetches the hub's ClusterVersion object.
pub trait ClusterVersionLookup {
    fn lookup_version(&self) -> impl Future<Output = Result<DynamicObject, LookupError>> + Send;
}

impl ClusterVersionLookup for Api<DynamicObject> {
    async fn lookup_version(&self) -> Result<DynamicObject, LookupError> {
        self.get(CLUSTER_VERSION_NAME)
            .await
            .map_err(|err| LookupError::from_kube(CLUSTER_VERSION_NAME, err))
    }
}

#[tracing::instrument(skip_all, name = "cluster-watch")]
pub async fn watch_managed_clusters(client: kube::Client, monitor: ClusterMonitor) -> Result<()> {
    let api = Api::<ManagedCluster>::all(client);
    let mut events = watcher(api.clone(), watcher::Config::default()).boxed();
    let mut relisted = HashSet::new();

    info!("Watching ManagedClusters");
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => handle_event(&monitor, event, &mut relisted, &api).await,
            Err(err) => warn!("Recovering from watcher error: {err:?}"),
        }
    }

    Err(anyhow!("ManagedCluster watch stream terminated"))
}

pub async fn handle_event<L: ClusterLookup>(
    monitor: &ClusterMonitor,
    event: watcher::Event<ManagedCluster>,
    relisted: &mut HashSet<String>,
    lookup: &L,
) {
    match event {
        watcher::Event::Apply(cluster) => apply_cluster(monitor, &cluster),
        watcher::Event::Delete(cluster) => monitor.delete_cluster(&cluster),
        watcher::Event::Init => {
            debug!("ManagedCluster re-list started");
            relisted.clear();
        }
        watcher::Event::InitApply(cluster) => {
            if let Some(name) = cluster.name() {
                relisted.insert(name.to_owned());
            }
            apply_cluster(monitor, &cluster);
        }
        watcher::Event::InitDone => {
            debug!(clusters = relisted.len(), "ManagedCluster re-list done");
            prune_stale_clusters(monitor, relisted, lookup).await;
        }
    }
}

fn apply_cluster(monitor: &ClusterMonitor, cluster: &ManagedCluster) {
    match cluster.name() {
        Some(name) if monitor.contains(name) => monitor.update_cluster(cluster),
        _ => monitor.add_cluster(cluster),
    }
}

/// Looks up every registered cluster a re-list did not mention, dropping the
/// ones that no longer exist.
pub async fn prune_stale_clusters<L: ClusterLookup>(
    monitor: &ClusterMonitor,
    seen: &HashSet<String>,
    lookup: &L,
) {
    let stale = monitor
        .namespaces()
        .into_iter()
        .filter(|namespace| namespace != LOCAL_CLUSTER_NAMESPACE && !seen.contains(namespace));

    for namespace in stale {
        match lookup.lookup(&namespace).await {
            Ok(cluster) => apply_cluster(monitor, &cluster),
            Err(err) => {
                let err = anyhow::Error::from(err);
                if is_cluster_missing(Some(&err)) {
                    info!("{}, removing it", MonitorError::ClusterMissing(namespace.clone()));
                    monitor.remove_namespace(&namespace);
                } else {
                    warn!("Keeping {namespace}, lookup failed: {err:?}");
                }
            }
        }
    }
}

/// Registers the hub itself from its ClusterVersion object.
#[tracing::instrument(err, skip_all)]
pub async fn register_local_cluster(client: kube::Client, monitor: &ClusterMonitor) -> Result<()> {
    let api: Api<DynamicObject> = Api::all_with(client, &cluster_version_api_resource());
    register_local_cluster_with(&api, monitor, CLUSTER_VERSION_BACKOFF).await
}

/// Transient lookup errors are retried every `backoff`. A missing
/// ClusterVersion is final.
pub async fn register_local_cluster_with<L: ClusterVersionLookup>(
    lookup: &L,
    monitor: &ClusterMonitor,
    backoff: Duration,
) -> Result<()> {
    let result = tryhard::retry_fn(|| lookup.lookup_version())
        .retries(CLUSTER_VERSION_RETRIES)
        .custom_backoff(|attempt, err: &LookupError| match err {
            LookupError::NotFound(_) => RetryPolicy::Break,
            LookupError::Kube { .. } => {
                debug!(attempt, "Retrying ClusterVersion lookup: {err}");
                RetryPolicy::Delay(backoff)
            }
        })
        .await
        .map_err(anyhow::Error::from);

    match result {
        Ok(version) => {
            monitor.add_local_cluster(&version);
            let cluster_id = monitor.get_local_cluster();
            if cluster_id.is_empty() {
                warn!("ClusterVersion has no cluster ID, local cluster not registered");
            } else {
                info!(%cluster_id, "Registered local cluster");
            }
            Ok(())
        }
        Err(err) if is_cluster_missing(Some(&err)) => {
            info!("No ClusterVersion found, the hub is not an OpenShift cluster");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn server_error(name: &str) -> LookupError {
        LookupError::Kube {
            name: name.to_owned(),
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_owned(),
                message: "etcdserver: request timed out".to_owned(),
                reason: "InternalError".to_owned(),
                code: 500,
            }),
        }
    }

    #[derive(Default)]
    struct FakeLookup {
        clusters: HashMap<String, ManagedCluster>,
        broken: HashSet<String>,
    }

    impl ClusterLookup for FakeLookup {
        async fn lookup(&self, name: &str) -> Result<ManagedCluster, LookupError> {
            if self.broken.contains(name) {
                return Err(server_error(name));
            }
            self.clusters
                .get(name)
                .cloned()
                .ok_or_else(|| LookupError::NotFound(name.to_owned()))
        }
    }

    /// Fails `failures` times, then answers with `version` or not found.
    struct FakeVersionLookup {
        version: Option<DynamicObject>,
        failures: usize,
        calls: AtomicUsize,
    }

    impl FakeVersionLookup {
        fn new(version: Option<DynamicObject>, failures: usize) -> Self {
            Self {
                version,
                failures,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ClusterVersionLookup for FakeVersionLookup {
        async fn lookup_version(&self) -> Result<DynamicObject, LookupError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(server_error(CLUSTER_VERSION_NAME));
            }
            self.version
                .clone()
                .ok_or_else(|| LookupError::NotFound(CLUSTER_VERSION_NAME.to_owned()))
        }
    }

    fn cluster(name: &str, id: &str) -> ManagedCluster {
        serde_json::from_value(json!({
            "metadata": {"name": name},
            "status": {"clusterClaims": [
                {"name": "id.openshift.io", "value": id},
                {"name": "product.open-cluster-management.io", "value": "OpenShift"},
            ]}
        }))
        .unwrap()
    }

    fn local_cluster() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "ClusterVersion",
            "metadata": {"name": "version"},
            "spec": {"clusterID": "58bd7441-812e-4fab-9aa6-eec452059c59"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn apply_adds_then_updates() {
        let monitor = ClusterMonitor::new();
        let lookup = FakeLookup::default();
        let mut relisted = HashSet::new();

        let first = cluster("spoke", "11111111-1111-1111-1111-111111111111");
        let second = cluster("spoke", "22222222-2222-2222-2222-222222222222");
        handle_event(&monitor, watcher::Event::Apply(first), &mut relisted, &lookup).await;
        handle_event(&monitor, watcher::Event::Apply(second), &mut relisted, &lookup).await;

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.clusters.len(), 1);
        assert_eq!(snapshot.clusters[0].cluster_id, "22222222-2222-2222-2222-222222222222");
        assert_eq!(snapshot.needs_ccx.len(), 1);
    }

    #[tokio::test]
    async fn delete_event_removes_cluster() {
        let monitor = ClusterMonitor::new();
        let lookup = FakeLookup::default();
        let mut relisted = HashSet::new();
        let spoke = cluster("spoke", "11111111-1111-1111-1111-111111111111");

        handle_event(&monitor, watcher::Event::Apply(spoke.clone()), &mut relisted, &lookup).await;
        handle_event(&monitor, watcher::Event::Delete(spoke), &mut relisted, &lookup).await;
        assert!(monitor.snapshot().is_empty());
    }

    #[tokio::test]
    async fn relist_prunes_vanished_clusters() -> anyhow::Result<()> {
        let monitor = ClusterMonitor::new();
        monitor.add_local_cluster(&local_cluster());
        monitor.add_cluster(&cluster("gone", "11111111-1111-1111-1111-111111111111"));
        monitor.add_cluster(&cluster("renamed", "22222222-2222-2222-2222-222222222222"));
        monitor.add_cluster(&cluster("flaky", "33333333-3333-3333-3333-333333333333"));
        monitor.add_cluster(&cluster("kept", "44444444-4444-4444-4444-444444444444"));

        let lookup = FakeLookup {
            clusters: HashMap::from([(
                "renamed".to_owned(),
                cluster("renamed", "55555555-5555-5555-5555-555555555555"),
            )]),
            broken: HashSet::from(["flaky".to_owned()]),
        };

        let mut relisted = HashSet::new();
        for event in [
            watcher::Event::Init,
            watcher::Event::InitApply(cluster("kept", "44444444-4444-4444-4444-444444444444")),
            watcher::Event::InitDone,
        ] {
            handle_event(&monitor, event, &mut relisted, &lookup).await;
        }

        assert_eq!(
            monitor.namespaces(),
            vec!["local-cluster", "renamed", "flaky", "kept"]
        );
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.clusters[1].cluster_id, "55555555-5555-5555-5555-555555555555");
        assert!(!snapshot.needs_ccx.contains_key("11111111-1111-1111-1111-111111111111"));
        assert_eq!(
            monitor.get_local_cluster(),
            "58bd7441-812e-4fab-9aa6-eec452059c59"
        );
        Ok(())
    }

    #[tokio::test]
    async fn local_cluster_is_registered_after_transient_errors() -> anyhow::Result<()> {
        let monitor = ClusterMonitor::new();
        let lookup = FakeVersionLookup::new(Some(local_cluster()), 2);

        register_local_cluster_with(&lookup, &monitor, Duration::ZERO).await?;
        assert_eq!(lookup.calls(), 3);
        assert_eq!(
            monitor.get_local_cluster(),
            "58bd7441-812e-4fab-9aa6-eec452059c59"
        );
        assert!(monitor.snapshot().needs_ccx("58bd7441-812e-4fab-9aa6-eec452059c59"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_cluster_version_is_skipped_without_retrying() -> anyhow::Result<()> {
        let monitor = ClusterMonitor::new();
        let lookup = FakeVersionLookup::new(None, 0);

        register_local_cluster_with(&lookup, &monitor, Duration::from_secs(3600)).await?;
        assert_eq!(lookup.calls(), 1);
        assert!(monitor.snapshot().is_empty());
        assert_eq!(monitor.get_local_cluster(), "");
        Ok(())
    }

    #[tokio::test]
    async fn cluster_version_without_id_is_skipped() -> anyhow::Result<()> {
        let monitor = ClusterMonitor::new();
        let version: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "ClusterVersion",
            "metadata": {"name": "version"},
            "spec": {"channel": "stable-4.6"}
        }))?;
        let lookup = FakeVersionLookup::new(Some(version), 0);

        register_local_cluster_with(&lookup, &monitor, Duration::ZERO).await?;
        assert_eq!(lookup.calls(), 1);
        assert!(monitor.snapshot().is_empty());
        assert_eq!(monitor.get_local_cluster(), "");
        Ok(())
    }

    #[tokio::test]
    async fn persistent_lookup_errors_are_returned() {
        let monitor = ClusterMonitor::new();
        let lookup = FakeVersionLookup::new(Some(local_cluster()), usize::MAX);

        let result = register_local_cluster_with(&lookup, &monitor, Duration::ZERO).await;
        assert!(result.is_err());
        assert_eq!(lookup.calls(), CLUSTER_VERSION_RETRIES as usize + 1);
        assert!(monitor.snapshot().is_empty());
    }
}
