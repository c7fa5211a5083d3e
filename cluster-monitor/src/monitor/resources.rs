use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, GroupVersionKind};
use serde::{Deserialize, Serialize};

pub const CLUSTER_VERSION_NAME: &str = "version";

/// `cluster.open-cluster-management.io/v1` ManagedCluster, reduced to the
/// fields the monitor reads.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ManagedCluster {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ManagedClusterStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    #[serde(default)]
    pub cluster_claims: Vec<ClusterClaim>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClusterClaim {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl ManagedCluster {
    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref().filter(|name| !name.is_empty())
    }

    pub fn claim(&self, name: &str) -> Option<&str> {
        self.status
            .as_ref()?
            .cluster_claims
            .iter()
            .find(|claim| claim.name == name)
            .map(|claim| claim.value.as_str())
            .filter(|value| !value.is_empty())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()?
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

impl k8s_openapi::Resource for ManagedCluster {
    const API_VERSION: &'static str = "cluster.open-cluster-management.io/v1";
    const GROUP: &'static str = "cluster.open-cluster-management.io";
    const KIND: &'static str = "ManagedCluster";
    const VERSION: &'static str = "v1";
    const URL_PATH_SEGMENT: &'static str = "managedclusters";
    type Scope = k8s_openapi::ClusterResourceScope;
}

impl k8s_openapi::Metadata for ManagedCluster {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// `config.openshift.io/v1` ClusterVersion is read untyped.
pub fn cluster_version_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("config.openshift.io", "v1", "ClusterVersion"),
        "clusterversions",
    )
}
