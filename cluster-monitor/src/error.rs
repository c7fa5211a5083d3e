#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Cluster {0} no longer exists")]
    ClusterMissing(String),

    #[error("Got {event} for cluster {namespace} which is not registered")]
    ResolutionAnomaly {
        event: &'static str,
        namespace: String,
    },

    #[error("Malformed {kind} resource: {reason}")]
    MalformedResource { kind: &'static str, reason: String },

    #[error("Error parsing env [{env}], expected {expected}, got {value:?}")]
    ConfigParse {
        env: String,
        expected: &'static str,
        value: String,
    },
}

/// Failure of a single resource lookup against the API server.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("could not find the requested resource: {0}")]
    NotFound(String),

    #[error("Failed looking up {name}: {source}")]
    Kube {
        name: String,
        #[source]
        source: kube::Error,
    },
}

impl LookupError {
    pub fn from_kube(name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound(name.to_owned()),
            source => Self::Kube {
                name: name.to_owned(),
                source,
            },
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
