mod identity;
mod registry;
mod resources;
mod types;
mod watch;

pub use identity::{
    is_cluster_missing, resolve, ClusterIdentity, ClusterSource, LocalCluster,
    LOCAL_CLUSTER_NAMESPACE, NOT_FOUND_MESSAGE,
};
pub use registry::ClusterMonitor;
pub use resources::{ClusterClaim, ManagedCluster, ManagedClusterStatus};
pub use types::{ClusterSnapshot, ManagedClusterInfo};
pub use watch::{
    handle_event, prune_stale_clusters, register_local_cluster, register_local_cluster_with,
    watch_managed_clusters, ClusterLookup, ClusterVersionLookup,
};
