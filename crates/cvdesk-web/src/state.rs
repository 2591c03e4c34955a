use std::sync::Arc;

use cvdesk_core::{DownloadTokenSigner, RateLimiter};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Login attempt limiter. Its sweep task is started in `main`.
    pub login_limiter: RateLimiter,
    pub download_signer: Arc<DownloadTokenSigner>,
    /// Shared client for fetching remote order files.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let login_limiter = RateLimiter::new(config.rate_limit.to_limiter_config());
        let download_signer = DownloadTokenSigner::new(&config.auth.download_secret)?;
        Ok(Self {
            config: Arc::new(config),
            login_limiter,
            download_signer: Arc::new(download_signer),
            http: reqwest::Client::new(),
        })
    }
}
