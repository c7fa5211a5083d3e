use super::resources::ManagedCluster;
use crate::error::{LookupError, MonitorError, MonitorResult};
use kube::api::DynamicObject;
use tracing::{debug, warn};
use uuid::Uuid;

pub const LOCAL_CLUSTER_NAMESPACE: &str = "local-cluster";

pub const CLAIM_OPENSHIFT_ID: &str = "id.openshift.io";
pub const CLAIM_K8S_ID: &str = "id.k8s.io";
pub const CLAIM_PRODUCT: &str = "product.open-cluster-management.io";
pub const LABEL_VENDOR: &str = "vendor";

const OPENSHIFT_PRODUCTS: &[&str] = &[
    "OpenShift",
    "OpenShiftDedicated",
    "ROSA",
    "ARO",
    "ROKS",
    "OCP",
];

/// Message the API server returns for lookups of deleted objects.
pub const NOT_FOUND_MESSAGE: &str = "could not find the requested resource";

/// What the registry needs to know about a cluster resource.
pub trait ClusterSource {
    fn namespace(&self) -> MonitorResult<String>;
    fn cluster_id(&self) -> MonitorResult<String>;
    fn needs_ccx(&self) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub namespace: String,
    pub cluster_id: String,
    pub needs_ccx: bool,
}

pub fn resolve<S: ClusterSource + ?Sized>(source: &S) -> MonitorResult<ClusterIdentity> {
    let identity = ClusterIdentity {
        namespace: source.namespace()?,
        cluster_id: source.cluster_id()?,
        needs_ccx: source.needs_ccx(),
    };
    debug!(?identity, "Resolved cluster identity");
    Ok(identity)
}

impl ManagedCluster {
    pub fn is_openshift(&self) -> bool {
        self.claim(CLAIM_PRODUCT)
            .or_else(|| self.label(LABEL_VENDOR))
            .is_some_and(|product| {
                OPENSHIFT_PRODUCTS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(product))
            })
    }

    fn openshift_id(&self) -> Option<&str> {
        let id = self.claim(CLAIM_OPENSHIFT_ID)?;
        if Uuid::parse_str(id).is_err() {
            warn!(cluster = ?self.name(), id, "OpenShift cluster ID is not a UUID");
        }
        Some(id)
    }
}

impl ClusterSource for ManagedCluster {
    fn namespace(&self) -> MonitorResult<String> {
        self.name()
            .map(ToOwned::to_owned)
            .ok_or_else(|| MonitorError::MalformedResource {
                kind: "ManagedCluster",
                reason: "metadata.name is missing".to_owned(),
            })
    }

    fn cluster_id(&self) -> MonitorResult<String> {
        if let Some(id) = self.openshift_id().or_else(|| self.claim(CLAIM_K8S_ID)) {
            return Ok(id.to_owned());
        }
        let namespace = self.namespace()?;
        debug!(
            cluster = %namespace,
            "No cluster ID claim, using the cluster name as its ID"
        );
        Ok(namespace)
    }

    fn needs_ccx(&self) -> bool {
        self.is_openshift() && self.openshift_id().is_some()
    }
}

/// The hub cluster, seen through its ClusterVersion object.
pub struct LocalCluster<'a>(pub &'a DynamicObject);

impl ClusterSource for LocalCluster<'_> {
    fn namespace(&self) -> MonitorResult<String> {
        Ok(LOCAL_CLUSTER_NAMESPACE.to_owned())
    }

    fn cluster_id(&self) -> MonitorResult<String> {
        self.0
            .data
            .pointer("/spec/clusterID")
            .and_then(serde_json::Value::as_str)
            .filter(|id| !id.is_empty())
            .map(ToOwned::to_owned)
            .ok_or_else(|| MonitorError::MalformedResource {
                kind: "ClusterVersion",
                reason: "spec.clusterID is missing".to_owned(),
            })
    }

    fn needs_ccx(&self) -> bool {
        true
    }
}

/// Whether a lookup failed because the object is gone.
pub fn is_cluster_missing(err: Option<&anyhow::Error>) -> bool {
    let Some(err) = err else {
        return false;
    };
    if matches!(err.downcast_ref::<LookupError>(), Some(LookupError::NotFound(_))) {
        return true;
    }
    if let Some(kube::Error::Api(response)) = err.downcast_ref::<kube::Error>() {
        if response.code == 404 {
            return true;
        }
    }
    err.chain()
        .any(|cause| cause.to_string().contains(NOT_FOUND_MESSAGE))
}
