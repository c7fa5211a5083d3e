use super::identity::{resolve, ClusterIdentity, ClusterSource, LocalCluster, LOCAL_CLUSTER_NAMESPACE};
use super::resources::ManagedCluster;
use super::types::{ClusterSnapshot, ManagedClusterInfo};
use crate::error::MonitorError;
use kube::api::DynamicObject;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Registry of the clusters known to the hub.
///
/// The ordered cluster list and the `cluster_id -> needs CCX` map are guarded
/// by a single lock, every mutation touches both.
#[derive(Clone)]
pub struct ClusterMonitor {
    inner: Arc<RwLock<Inner>>,
}

struct Inner {
    clusters: Vec<ManagedClusterInfo>,
    needs_ccx: HashMap<String, bool>,
    notifications_tx: watch::Sender<()>,
}

impl Default for ClusterMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterMonitor {
    pub fn new() -> Self {
        let (notifications_tx, _) = watch::channel(());
        Self {
            inner: Arc::new(RwLock::new(Inner {
                clusters: Vec::new(),
                needs_ccx: HashMap::new(),
                notifications_tx,
            })),
        }
    }

    #[tracing::instrument(skip_all, fields(cluster = ?cluster.name()))]
    pub fn add_cluster(&self, cluster: &ManagedCluster) {
        debug!("Processing cluster addition");
        if let Some(identity) = resolve_or_log(cluster) {
            self.append(identity);
        }
    }

    #[tracing::instrument(skip_all, fields(cluster = ?cluster.name()))]
    pub fn update_cluster(&self, cluster: &ManagedCluster) {
        debug!("Processing cluster update");
        let Some(identity) = resolve_or_log(cluster) else {
            return;
        };
        let mut inner = self.inner.write();
        match inner.replace(&identity) {
            Some(true) => inner.notify(),
            Some(false) => debug!("Cluster identity unchanged"),
            None => warn!(
                "{}",
                MonitorError::ResolutionAnomaly {
                    event: "update",
                    namespace: identity.namespace,
                }
            ),
        }
    }

    #[tracing::instrument(skip_all, fields(cluster = ?cluster.name()))]
    pub fn delete_cluster(&self, cluster: &ManagedCluster) {
        debug!("Processing cluster deletion");
        match cluster.name() {
            Some(namespace) => {
                self.remove_namespace(namespace);
            }
            None => error!(
                "{}",
                MonitorError::MalformedResource {
                    kind: "ManagedCluster",
                    reason: "deleted cluster has no name".to_owned(),
                }
            ),
        }
    }

    #[tracing::instrument(skip_all)]
    pub fn add_local_cluster(&self, version: &DynamicObject) {
        debug!("Processing local cluster addition");
        if let Some(identity) = resolve_or_log(&LocalCluster(version)) {
            self.append(identity);
        }
    }

    /// Cluster ID registered for the hub itself, empty when unknown.
    pub fn get_local_cluster(&self) -> String {
        self.inner
            .read()
            .clusters
            .iter()
            .find(|cluster| cluster.namespace == LOCAL_CLUSTER_NAMESPACE)
            .map(|cluster| cluster.cluster_id.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        let inner = self.inner.read();
        ClusterSnapshot {
            clusters: inner.clusters.clone(),
            needs_ccx: inner.needs_ccx.clone(),
        }
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.inner.read().position(namespace).is_some()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.inner
            .read()
            .clusters
            .iter()
            .map(|cluster| cluster.namespace.clone())
            .collect()
    }

    /// Removes the entry registered under `namespace`. Returns whether
    /// anything was removed.
    pub fn remove_namespace(&self, namespace: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.remove(namespace) {
            Some(removed) => {
                info!(cluster_id = %removed.cluster_id, "Removed {namespace} from the cluster list");
                inner.notify();
                true
            }
            None => {
                debug!(
                    "{}",
                    MonitorError::ResolutionAnomaly {
                        event: "delete",
                        namespace: namespace.to_owned(),
                    }
                );
                false
            }
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.clusters.clear();
        inner.needs_ccx.clear();
        inner.notify();
    }

    /// Notified after every membership change.
    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.inner.read().notifications_tx.subscribe()
    }

    fn append(&self, identity: ClusterIdentity) {
        let mut inner = self.inner.write();
        if inner.position(&identity.namespace).is_some() {
            warn!(
                namespace = %identity.namespace,
                "Cluster added twice, applying it as an update"
            );
            if inner.replace(&identity) != Some(true) {
                return;
            }
        } else {
            info!(
                cluster_id = %identity.cluster_id,
                needs_ccx = identity.needs_ccx,
                "Adding {} to the cluster list",
                identity.namespace
            );
            inner.needs_ccx.insert(identity.cluster_id.clone(), identity.needs_ccx);
            inner.clusters.push(ManagedClusterInfo {
                namespace: identity.namespace,
                cluster_id: identity.cluster_id,
            });
        }
        inner.notify();
    }
}

impl Inner {
    fn position(&self, namespace: &str) -> Option<usize> {
        self.clusters
            .iter()
            .position(|cluster| cluster.namespace == namespace)
    }

    /// Swaps in the identity of an existing entry. `None` when the namespace
    /// is unknown, otherwise whether the ID or the flag changed.
    fn replace(&mut self, identity: &ClusterIdentity) -> Option<bool> {
        let index = self.position(&identity.namespace)?;
        let old_id = std::mem::replace(
            &mut self.clusters[index].cluster_id,
            identity.cluster_id.clone(),
        );
        let id_changed = old_id != identity.cluster_id;
        if id_changed {
            info!(
                namespace = %identity.namespace,
                %old_id,
                new_id = %identity.cluster_id,
                "Cluster ID changed"
            );
            self.release_flag(&old_id);
        }
        let old_flag = self
            .needs_ccx
            .insert(identity.cluster_id.clone(), identity.needs_ccx);
        Some(id_changed || old_flag != Some(identity.needs_ccx))
    }

    fn remove(&mut self, namespace: &str) -> Option<ManagedClusterInfo> {
        let index = self.position(namespace)?;
        let removed = self.clusters.remove(index);
        self.release_flag(&removed.cluster_id);
        Some(removed)
    }

    /// Drops the flag of `cluster_id` unless another entry still uses it.
    fn release_flag(&mut self, cluster_id: &str) {
        if !self
            .clusters
            .iter()
            .any(|cluster| cluster.cluster_id == cluster_id)
        {
            self.needs_ccx.remove(cluster_id);
        }
    }

    fn notify(&self) {
        self.notifications_tx.send_replace(());
    }
}

fn resolve_or_log<S: ClusterSource + ?Sized>(source: &S) -> Option<ClusterIdentity> {
    match resolve(source) {
        Ok(identity) => Some(identity),
        Err(err) => {
            error!("Ignoring cluster event: {err}");
            None
        }
    }
}
