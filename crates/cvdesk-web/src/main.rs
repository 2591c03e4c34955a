mod api;
mod auth;
mod config;
mod dto;
mod error;
mod middleware;
mod state;

use std::future::Future;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::state::AppState;

/// How long in-flight TLS connections get to finish after the signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cvdesk_web=debug,cvdesk_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load()?;
    let bind_addr = config.bind_addr;
    let tls_config = config.tls.clone();
    let tls_enabled = tls_config.cert_path.is_some() && tls_config.key_path.is_some();
    tracing::info!(
        "Loaded {} users and {} orders; login limit {} attempts per {}s",
        config.users.len(),
        config.orders.len(),
        config.rate_limit.max_attempts,
        config.rate_limit.window_secs
    );

    let state = AppState::new(config)?;

    // Periodic eviction of expired login-attempt entries
    state.login_limiter.start();
    let limiter = state.login_limiter.clone();

    let app = api::app(state, tls_enabled);

    if let (Some(cert), Some(key)) = (&tls_config.cert_path, &tls_config.key_path) {
        use axum_server::tls_rustls::RustlsConfig;
        let rustls_config = RustlsConfig::from_pem_file(cert, key).await?;
        tracing::info!("cvdesk-web listening on https://{}", bind_addr);
        axum_server::bind_rustls(bind_addr, rustls_config)
            .handle(shutdown_handle(shutdown_signal()))
            .serve(app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        tracing::info!("cvdesk-web listening on http://{}", bind_addr);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    }

    limiter.stop();
    Ok(())
}

/// An `axum_server` handle that starts a graceful shutdown once `signal`
/// resolves, mirroring `with_graceful_shutdown` on the plain listener.
fn shutdown_handle<F>(signal: F) -> axum_server::Handle
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = axum_server::Handle::new();
    let trigger = handle.clone();
    tokio::spawn(async move {
        signal.await;
        trigger.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });
    handle
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
