use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One registered cluster, keyed by the namespace the hub knows it under.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedClusterInfo {
    pub namespace: String,
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
}

impl ManagedClusterInfo {
    pub fn new(namespace: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            cluster_id: cluster_id.into(),
        }
    }
}

/// Owned copy of the registry state handed to readers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClusterSnapshot {
    pub clusters: Vec<ManagedClusterInfo>,
    pub needs_ccx: HashMap<String, bool>,
}

impl ClusterSnapshot {
    pub fn needs_ccx(&self, cluster_id: &str) -> bool {
        self.needs_ccx.get(cluster_id).copied().unwrap_or_default()
    }

    pub fn clusters_needing_ccx(&self) -> impl Iterator<Item = &ManagedClusterInfo> {
        self.clusters
            .iter()
            .filter(|cluster| self.needs_ccx(&cluster.cluster_id))
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
