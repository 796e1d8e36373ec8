use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_PHOTOMAKER_VERSION: &str =
    "tencentarc/photomaker:ddfc2b08d209f9fa8c1eca692712918bd449f695dabb4a958da31802a9570fe4";
pub const DEFAULT_STORAGE_ROOT: &str = "generated_images";

const DEFAULT_POLL_INTERVAL_S: f64 = 1.0;
const DEFAULT_POLL_TIMEOUT_S: f64 = 600.0;
const DEFAULT_HTTP_TIMEOUT_S: f64 = 120.0;

/// Everything the engine reads from the outside world, resolved up front.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_token: Option<String>,
    pub api_base: String,
    pub model_version: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub http_timeout: Duration,
    pub storage_root: PathBuf,
    pub blob_connection_string: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model_version: DEFAULT_PHOTOMAKER_VERSION.to_string(),
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_S),
            poll_timeout: Duration::from_secs_f64(DEFAULT_POLL_TIMEOUT_S),
            http_timeout: Duration::from_secs_f64(DEFAULT_HTTP_TIMEOUT_S),
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            blob_connection_string: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key/value source. Unparsable numbers fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let seconds = |key: &str, default: f64, min: f64, max: f64| {
            let value = get(key)
                .and_then(|raw| raw.parse::<f64>().ok())
                .filter(|value| value.is_finite())
                .unwrap_or(default)
                .clamp(min, max);
            Duration::from_secs_f64(value)
        };

        let defaults = Self::default();
        Self {
            api_token: get("REPLICATE_API_TOKEN").or_else(|| get("REPLICATE_API_KEY")),
            api_base: get("REPLICATE_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            model_version: get("REPLICATE_PHOTOMAKER_VERSION").unwrap_or(defaults.model_version),
            poll_interval: seconds("REPLICATE_POLL_INTERVAL", DEFAULT_POLL_INTERVAL_S, 0.2, 5.0),
            poll_timeout: seconds("REPLICATE_POLL_TIMEOUT", DEFAULT_POLL_TIMEOUT_S, 10.0, 3600.0),
            http_timeout: seconds("REPLICATE_HTTP_TIMEOUT", DEFAULT_HTTP_TIMEOUT_S, 5.0, 600.0),
            storage_root: get("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            blob_connection_string: get("AZURE_STORAGE_CONNECTION_STRING"),
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    pub fn with_blob_connection_string(mut self, connection_string: Option<String>) -> Self {
        self.blob_connection_string = connection_string;
        self
    }

    pub fn with_poll(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_token.is_some()
    }

    /// The version hash Replicate expects in the `version` field.
    pub fn version_id(&self) -> &str {
        match self.model_version.rsplit_once(':') {
            Some((_, hash)) => hash,
            None => &self.model_version,
        }
    }
}
