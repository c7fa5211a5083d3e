use crate::error::{MonitorError, MonitorResult};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

pub const DEFAULT_SERVICE_PORT: &str = ":3030";
/// Milliseconds
pub const DEFAULT_HTTP_TIMEOUT: u64 = 180_000;
pub const DEFAULT_USE_MOCK: bool = false;
pub const DEFAULT_CCX_SERVER: &str = "http://localhost:8080/api/v1/clusters";
/// Minutes
pub const DEFAULT_POLL_INTERVAL: u64 = 10;
/// Seconds
pub const DEFAULT_REQUEST_INTERVAL: u64 = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub service_port: String,
    /// Timeout of report requests, in milliseconds
    pub http_timeout: u64,
    /// Serve empty reports instead of calling the report server
    pub use_mock: bool,
    pub ccx_server: String,
    /// Token for the report server, when the pull secret cannot be used
    pub ccx_token: String,
    pub kube_config: String,
    /// Minutes between two polling rounds
    pub poll_interval: u64,
    /// Seconds between two consecutive report requests
    pub request_interval: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| env::var(key).ok());
        config
    }

    /// Fills every option from `lookup`. A present override wins, otherwise
    /// an unset option gets its default and a set one is kept.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        set_default(&mut self.service_port, "SERVICE_PORT", DEFAULT_SERVICE_PORT.to_owned(), &lookup);
        set_default(&mut self.ccx_server, "CCX_SERVER", DEFAULT_CCX_SERVER.to_owned(), &lookup);
        set_default(&mut self.ccx_token, "CCX_TOKEN", String::new(), &lookup);
        set_default(&mut self.http_timeout, "HTTP_TIMEOUT", DEFAULT_HTTP_TIMEOUT, &lookup);
        set_default(&mut self.poll_interval, "POLL_INTERVAL", DEFAULT_POLL_INTERVAL, &lookup);
        set_default(&mut self.request_interval, "REQUEST_INTERVAL", DEFAULT_REQUEST_INTERVAL, &lookup);
        set_default(&mut self.use_mock, "USE_MOCK", DEFAULT_USE_MOCK, &lookup);

        let default_kube_config = lookup("HOME")
            .map(|home| PathBuf::from(home).join(".kube").join("config"))
            .filter(|path| path.exists())
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();
        set_default(&mut self.kube_config, "KUBECONFIG", default_kube_config, &lookup);
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.saturating_mul(60))
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_secs(self.request_interval)
    }

    pub fn ccx_server(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.ccx_server)
    }

    pub fn ccx_token(&self) -> Option<&str> {
        Some(self.ccx_token.as_str()).filter(|token| !token.is_empty())
    }

    pub fn kube_config(&self) -> Option<&str> {
        Some(self.kube_config.as_str()).filter(|path| !path.is_empty())
    }
}

trait EnvValue: Sized + Display {
    const EXPECTED: &'static str;

    fn parse_env(raw: &str) -> Option<Self>;

    fn is_unset(&self) -> bool;
}

impl EnvValue for String {
    const EXPECTED: &'static str = "a string";

    fn parse_env(raw: &str) -> Option<Self> {
        Some(raw.to_owned())
    }

    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl EnvValue for u64 {
    const EXPECTED: &'static str = "an integer";

    fn parse_env(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }

    fn is_unset(&self) -> bool {
        *self == 0
    }
}

impl EnvValue for bool {
    const EXPECTED: &'static str = "a boolean";

    fn parse_env(raw: &str) -> Option<Self> {
        match raw.trim() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
            _ => None,
        }
    }

    fn is_unset(&self) -> bool {
        !*self
    }
}

fn parse_override<T: EnvValue>(env: &str, raw: &str) -> MonitorResult<T> {
    T::parse_env(raw).ok_or_else(|| MonitorError::ConfigParse {
        env: env.to_owned(),
        expected: T::EXPECTED,
        value: raw.to_owned(),
    })
}

fn set_default<T, F>(field: &mut T, env: &str, default: T, lookup: &F)
where
    T: EnvValue,
    F: Fn(&str) -> Option<String>,
{
    match lookup(env) {
        Some(raw) => match parse_override(env, &raw) {
            Ok(value) => {
                info!("Using {env} from environment: {value}");
                *field = value;
            }
            Err(err) => {
                error!("{err}");
                if field.is_unset() {
                    *field = default;
                }
            }
        },
        None if field.is_unset() => {
            debug!("{env} not set, using default value: {default}");
            *field = default;
        }
        None => debug!("{env} not set, keeping {field}"),
    }
}
