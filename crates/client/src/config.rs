use serde::Deserialize;

/// Client configuration loaded from TOML with env var overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Relay server base URL. Default: "http://127.0.0.1:8080"
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds. Default: 30
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// User-Agent header sent on every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    "openrelay-client/0.1".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_seconds: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file with environment variable
    /// overrides.
    ///
    /// Reads `relay.toml` from CWD (or the path in the `RELAY_CONFIG_PATH`
    /// env var), then overrides individual fields from env vars.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path =
            std::env::var("RELAY_CONFIG_PATH").unwrap_or_else(|_| "relay.toml".to_string());
        let contents = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&contents)
    }

    /// Load configuration from a TOML string, then apply env var overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: ClientConfig = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the config.
    ///
    /// Returns an error if an env var is set but has an invalid format
    /// (e.g., RELAY_REQUEST_TIMEOUT_SECONDS=abc).
    pub fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Ok(val) = std::env::var("RELAY_BASE_URL") {
            self.base_url = val;
        }
        if let Ok(val) = std::env::var("RELAY_REQUEST_TIMEOUT_SECONDS") {
            self.request_timeout_seconds = val
                .parse()
                .map_err(|_| format!("invalid RELAY_REQUEST_TIMEOUT_SECONDS value: {val}"))?;
        }
        if let Ok(val) = std::env::var("RELAY_USER_AGENT") {
            self.user_agent = val;
        }
        Ok(())
    }
}
