pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod poller;

pub use config::Config;
pub use error::{LookupError, MonitorError};
pub use monitor::{ClusterMonitor, ClusterSnapshot, ManagedClusterInfo};
pub use poller::ReportPoller;
