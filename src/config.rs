use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub frontend: FrontendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Vehicle-telemetry provider OAuth settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_profile_url")]
    pub profile_url: String,
    /// Must match the redirect URI registered with the provider exactly.
    #[serde(default)]
    pub redirect_uri: String,
    /// Outbound request timeout. A slow provider must not hold an inbound
    /// request open indefinitely.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            profile_url: default_profile_url(),
            redirect_uri: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// HMAC secret for signing session tokens.
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_secs: default_session_ttl(),
        }
    }
}

/// Landing URLs the flow redirects to once the interactive path terminates.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrontendConfig {
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_error_url")]
    pub error_url: String,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            success_url: default_success_url(),
            error_url: default_error_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}
const fn default_port() -> u16 {
    8080
}
fn default_db_path() -> PathBuf {
    PathBuf::from("evlink.db")
}
fn default_auth_url() -> String {
    "https://auth.vehicle-provider.example/oauth2/v3/authorize".to_string()
}
fn default_token_url() -> String {
    "https://auth.vehicle-provider.example/oauth2/v3/token".to_string()
}
fn default_profile_url() -> String {
    "https://owner-api.vehicle-provider.example/api/1/users/me".to_string()
}
const fn default_request_timeout() -> u64 {
    10
}
const fn default_session_ttl() -> i64 {
    86_400
}
fn default_success_url() -> String {
    "http://localhost:3000/auth/success".to_string()
}
fn default_error_url() -> String {
    "http://localhost:3000/auth/error".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `EVLINK_` takes precedence over
    /// the file value.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Reject a configuration that cannot run the linking flow.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.provider.client_id.is_empty() {
            anyhow::bail!("provider.client_id is required (or EVLINK_PROVIDER_CLIENT_ID)");
        }
        if self.provider.client_secret.is_empty() {
            anyhow::bail!("provider.client_secret is required (or EVLINK_PROVIDER_CLIENT_SECRET)");
        }
        if self.provider.redirect_uri.is_empty() {
            anyhow::bail!("provider.redirect_uri is required (or EVLINK_PROVIDER_REDIRECT_URI)");
        }
        if self.session.secret.is_empty() {
            anyhow::bail!("session.secret is required (or EVLINK_SESSION_SECRET)");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        macro_rules! env_str {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                }
            };
        }
        macro_rules! env_bool {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                }
            };
        }
        macro_rules! env_parse {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                    }
                }
            };
        }

        // -- Server --
        env_str!("EVLINK_SERVER_HOST", self.server.host);
        env_parse!("EVLINK_SERVER_PORT", self.server.port);
        if let Ok(val) = std::env::var("EVLINK_SERVER_CORS_ORIGINS") {
            self.server.cors_origins = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // -- Database --
        if let Ok(val) = std::env::var("EVLINK_DATABASE_PATH") {
            self.database.path = PathBuf::from(val);
        }

        // -- Provider --
        env_str!("EVLINK_PROVIDER_CLIENT_ID", self.provider.client_id);
        env_str!("EVLINK_PROVIDER_CLIENT_SECRET", self.provider.client_secret);
        env_str!("EVLINK_PROVIDER_AUTH_URL", self.provider.auth_url);
        env_str!("EVLINK_PROVIDER_TOKEN_URL", self.provider.token_url);
        env_str!("EVLINK_PROVIDER_PROFILE_URL", self.provider.profile_url);
        env_str!("EVLINK_PROVIDER_REDIRECT_URI", self.provider.redirect_uri);
        env_parse!(
            "EVLINK_PROVIDER_REQUEST_TIMEOUT_SECS",
            self.provider.request_timeout_secs
        );

        // -- Session --
        env_str!("EVLINK_SESSION_SECRET", self.session.secret);
        env_parse!("EVLINK_SESSION_TTL_SECS", self.session.ttl_secs);

        // -- Frontend --
        env_str!("EVLINK_FRONTEND_SUCCESS_URL", self.frontend.success_url);
        env_str!("EVLINK_FRONTEND_ERROR_URL", self.frontend.error_url);

        // -- Logging --
        env_str!("EVLINK_LOG_LEVEL", self.logging.level);
        env_bool!("EVLINK_LOG_JSON", self.logging.json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.ttl_secs, 86_400);
        assert_eq!(config.provider.request_timeout_secs, 10);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_listen_addr() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/evlink.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
port = 9999

[provider]
client_id = "cid"
client_secret = "csec"
redirect_uri = "https://app.example.com/redirect"

[session]
secret = "test-secret"
ttl_secs = 3600

[frontend]
success_url = "https://app.example.com/auth/success"
error_url = "https://app.example.com/back"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.provider.client_id, "cid");
        assert_eq!(config.session.ttl_secs, 3600);
        assert_eq!(config.frontend.error_url, "https://app.example.com/back");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server]\nhost = \"0.0.0.0\"\n").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.ttl_secs, 86_400);
    }

    #[test]
    fn test_env_override_takes_precedence() {
        std::env::set_var("EVLINK_SESSION_SECRET", "from-env");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.session.secret, "from-env");

        std::env::remove_var("EVLINK_SESSION_SECRET");
    }

    #[test]
    fn test_validate_rejects_missing_secrets() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.provider.client_id = "cid".into();
        config.provider.client_secret = "csec".into();
        config.provider.redirect_uri = "https://app.example.com/redirect".into();
        assert!(config.validate().is_err(), "session secret still missing");

        config.session.secret = "s".into();
        assert!(config.validate().is_ok());
    }
}
