//! cvdesk core library — security utilities for the order service.
//!
//! `cvdesk-core` holds the two pieces of the order service that carry real
//! invariants. It has no HTTP dependency so the web crate (and tests) can
//! drive it directly.
//!
//! # Modules
//!
//! - [`rate_limit`] — Per-identifier attempt throttling: [`RateLimiter`], [`RateLimitDecision`], [`rate_limit_key`].
//! - [`download_token`] — Expiring, signed download tokens: [`DownloadTokenSigner`], [`DownloadClaims`].
//! - [`clock`] — Time source abstraction ([`Clock`], [`SystemClock`], [`ManualClock`]).
//! - [`error`] — Unified error type ([`CoreError`]) and result alias ([`CoreResult`]).

pub mod clock;
pub mod download_token;
pub mod error;
pub mod rate_limit;

pub use clock::{Clock, ManualClock, SystemClock};
pub use download_token::{DownloadClaims, DownloadTokenSigner, DEFAULT_EXPIRY_MINUTES};
pub use error::{CoreError, CoreResult};
pub use rate_limit::{
    rate_limit_key, KeyKind, RateLimitConfig, RateLimitDecision, RateLimitEntry, RateLimiter,
};
