use axum::extract::State;
use axum::Json;
use cvdesk_core::{KeyKind, RateLimitDecision};

use crate::auth::client_ip::ClientIp;
use crate::auth::{jwt, password};
use crate::dto::{LoginRequest, LoginResponse};
use crate::error::AppError;
use crate::state::AppState;

/// Rate-limited sign-in.
///
/// Attempts are counted per account (`email:`) and per client/account pair
/// (`combined:`). Both are cleared after a successful sign-in.
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let email = body.email.trim().to_lowercase();
    let email_key = KeyKind::Email.key(&[email.as_str()]);
    let combined_key = KeyKind::Combined.key(&[ip.as_str(), email.as_str()]);

    for key in [&combined_key, &email_key] {
        let decision = state.login_limiter.check(key);
        if !decision.allowed {
            tracing::warn!(
                "Login throttled: ip={ip}, retry in {}s",
                decision.retry_after_secs.unwrap_or_default()
            );
            return Err(throttled(&decision));
        }
    }

    let user = match state.config.find_user_by_email(&email) {
        Some(user) => user.clone(),
        None => {
            tracing::warn!("Failed login attempt for unknown email from {ip}");
            return Err(AppError::Auth("Invalid credentials".to_string()));
        }
    };

    let valid =
        password::verify_password_blocking(user.password_hash.clone(), body.password).await?;
    if !valid {
        tracing::warn!("Failed login attempt for user {} from {ip}", user.id);
        return Err(AppError::Auth("Invalid credentials".to_string()));
    }

    state.login_limiter.reset(&combined_key);
    state.login_limiter.reset(&email_key);

    let (token, expires_at) = jwt::create_token(
        &state.config.auth.jwt_secret,
        state.config.auth.jwt_ttl_hours,
        user.id,
        &user.email,
    )?;
    tracing::info!("User {} signed in", user.id);

    Ok(Json(LoginResponse { token, expires_at }))
}

fn throttled(decision: &RateLimitDecision) -> AppError {
    AppError::TooManyRequests {
        retry_after_secs: decision.retry_after_secs.unwrap_or(1),
    }
}
