use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use cvdesk_core::RateLimitConfig;
use serde::Deserialize;

/// A customer account. Stands in for the user table.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
}

/// A delivered order. Stands in for the order table.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderConfig {
    pub id: i64,
    pub user_id: i64,
    /// `http(s)://` blob URL, `file://` URL, or plain local path.
    pub file_url: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Origin used when composing links that leave the server (emails).
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub orders: Vec<OrderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default)]
    pub download_secret: String,
    #[serde(default = "default_jwt_ttl_hours")]
    pub jwt_ttl_hours: u64,
    #[serde(default = "default_download_link_ttl_minutes")]
    pub download_link_ttl_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            download_secret: String::new(),
            jwt_ttl_hours: default_jwt_ttl_hours(),
            download_link_ttl_minutes: default_download_link_ttl_minutes(),
        }
    }
}

fn default_jwt_ttl_hours() -> u64 { 24 }
fn default_download_link_ttl_minutes() -> u32 { cvdesk_core::DEFAULT_EXPIRY_MINUTES }
fn default_max_attempts() -> u32 { 5 }
fn default_window_secs() -> u64 { 15 * 60 }
fn default_block_secs() -> u64 { 15 * 60 }
fn default_cleanup_interval_secs() -> u64 { 5 * 60 }

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_secs: default_window_secs(),
            block_secs: default_block_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl RateLimitSettings {
    pub fn to_limiter_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_attempts: self.max_attempts,
            window: Duration::from_secs(self.window_secs),
            block_duration: Duration::from_secs(self.block_secs),
            // A zero period would panic inside tokio::time::interval.
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

fn default_public_base_url() -> String {
    "http://localhost:9090".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_base_url: default_public_base_url(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitSettings::default(),
            tls: TlsConfig::default(),
            users: Vec::new(),
            orders: Vec::new(),
        }
    }
}

const WEAK_SECRETS: &[&str] = &[
    "change-me-to-a-random-secret",
    "secret",
    "password",
    "jwt-secret",
    "download-secret",
];

impl ServerConfig {
    /// Emails compare case-insensitively.
    pub fn find_user_by_email(&self, email: &str) -> Option<&UserConfig> {
        self.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
    }

    pub fn find_order(&self, order_id: i64) -> Option<&OrderConfig> {
        self.orders.iter().find(|o| o.id == order_id)
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("CVDESK_WEB_CONFIG")
            .map(PathBuf::from)
            .ok();

        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(&path)?;
            Self::from_toml(&contents)?
        } else {
            ServerConfig::default()
        };

        config.apply_env_overrides()?;
        config.finalize_secrets()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(secret) = std::env::var("CVDESK_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(secret) = std::env::var("CVDESK_DOWNLOAD_SECRET") {
            self.auth.download_secret = secret;
        }
        if let Ok(url) = std::env::var("CVDESK_PUBLIC_URL") {
            self.public_base_url = url;
        }
        if let Ok(addr) = std::env::var("CVDESK_BIND_ADDR") {
            self.bind_addr = addr.parse()?;
        }
        if let Ok(cert) = std::env::var("CVDESK_TLS_CERT") {
            self.tls.cert_path = Some(cert);
        }
        if let Ok(key) = std::env::var("CVDESK_TLS_KEY") {
            self.tls.key_path = Some(key);
        }
        Ok(())
    }

    /// Rejects placeholder secrets and fills empty ones with random values.
    fn finalize_secrets(&mut self) -> anyhow::Result<()> {
        for (name, secret) in [
            ("JWT", &mut self.auth.jwt_secret),
            ("Download", &mut self.auth.download_secret),
        ] {
            if WEAK_SECRETS.contains(&secret.as_str()) {
                anyhow::bail!(
                    "{name} secret matches a known weak/placeholder value. \
                     Set a strong random secret via the environment."
                );
            }
            if secret.is_empty() {
                *secret = uuid::Uuid::new_v4().to_string();
                tracing::warn!(
                    "No {name} secret configured. Generated random secret (will change on restart)."
                );
            } else if secret.len() < 32 {
                tracing::warn!("{name} secret is shorter than 32 characters.");
            }
        }

        if self.auth.jwt_secret == self.auth.download_secret {
            tracing::warn!("JWT and download secrets are identical; use separate keys.");
        }
        Ok(())
    }
}
