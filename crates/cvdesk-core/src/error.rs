//! Error types for `cvdesk-core`.
//!
//! Only token *generation* is fallible. Rate limiting never fails and token
//! verification reports every problem as `None`.

/// Unified error type for core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The signing secret is empty.
    #[error("download token secret is not configured")]
    MissingSecret,

    /// The JWT library refused to sign the claims.
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Convenience alias used throughout `cvdesk-core`.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_secret_displays_message() {
        let err = CoreError::MissingSecret;
        assert_eq!(err.to_string(), "download token secret is not configured");
    }

    #[test]
    fn signing_error_from_jsonwebtoken() {
        let jwt_err: jsonwebtoken::errors::Error =
            jsonwebtoken::errors::ErrorKind::InvalidKeyFormat.into();
        let core_err: CoreError = jwt_err.into();
        assert!(matches!(core_err, CoreError::Signing(_)));
        assert!(core_err.to_string().starts_with("token signing failed"));
    }

    #[test]
    fn core_result_err() {
        let result: CoreResult<()> = Err(CoreError::MissingSecret);
        assert!(result.is_err());
    }
}
