//! Signed, expiring download tokens.
//!
//! A token proves that the server issued a download link for one order file
//! to one user. Nothing is stored server-side: the HS256 signature and the
//! `exp` claim are the whole proof, so a token cannot be revoked early.

use std::fmt;
use std::sync::Arc;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};

/// Link lifetime used when the caller has no preference.
pub const DEFAULT_EXPIRY_MINUTES: u32 = 60;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by a download token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadClaims {
    pub order_id: i64,
    pub user_id: i64,
    /// Backing-storage location of the file. Only revealed after verification.
    pub file_url: String,
    pub iat: u64,
    pub exp: u64,
}

/// Issues and verifies download tokens with a server-held secret.
#[derive(Clone)]
pub struct DownloadTokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for DownloadTokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTokenSigner")
            .field("algorithm", &ALGORITHM)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl DownloadTokenSigner {
    pub fn new(secret: &str) -> CoreResult<Self> {
        Self::with_clock(secret, Arc::new(SystemClock))
    }

    pub fn with_clock(secret: &str, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        if secret.is_empty() {
            return Err(CoreError::MissingSecret);
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.algorithms = vec![ALGORITHM];
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            clock,
        })
    }

    /// Signs a token for `file_url` that expires `expires_in_minutes` from now.
    pub fn generate(
        &self,
        order_id: i64,
        user_id: i64,
        file_url: &str,
        expires_in_minutes: u32,
    ) -> CoreResult<String> {
        let now = self.clock.now_secs();
        let claims = DownloadClaims {
            order_id,
            user_id,
            file_url: file_url.to_string(),
            iat: now,
            exp: now + u64::from(expires_in_minutes) * 60,
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Returns the claims of a valid, unexpired token and `None` for anything else.
    ///
    /// The reason for a rejection is deliberately not surfaced to the caller.
    pub fn verify(&self, token: &str) -> Option<DownloadClaims> {
        if token.is_empty() {
            return None;
        }

        let claims = match decode::<DownloadClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!("Download token rejected: {e}");
                return None;
            }
        };

        if claims.exp <= self.clock.now_secs() {
            tracing::debug!("Download token rejected: expired for order {}", claims.order_id);
            return None;
        }

        Some(claims)
    }

    /// Builds `{base_url}/api/orders/{order_id}/download?token=…` with a fresh token.
    pub fn signed_download_url(
        &self,
        base_url: &str,
        order_id: i64,
        user_id: i64,
        file_url: &str,
        expires_in_minutes: u32,
    ) -> CoreResult<String> {
        let token = self.generate(order_id, user_id, file_url, expires_in_minutes)?;
        let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
        Ok(format!(
            "{}/api/orders/{order_id}/download?token={encoded}",
            base_url.trim_end_matches('/')
        ))
    }
}
