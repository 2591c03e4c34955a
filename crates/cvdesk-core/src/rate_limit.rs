//! In-memory attempt throttling per identifier.
//!
//! Each identifier (an IP, an email, or a composite of both) gets a counting
//! window. Exceeding `max_attempts` inside the window blocks the identifier
//! for `block_duration`. State lives in process memory only and is lost on
//! restart; instances do not share state with each other.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{Clock, SystemClock};

/// Tuning knobs for [`RateLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
    pub block_duration: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            block_duration: Duration::from_secs(15 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Attempt bookkeeping for one identifier. Timestamps are Unix millis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub first_attempt_at: u64,
    pub blocked_until: Option<u64>,
}

impl RateLimitEntry {
    fn fresh(now: u64) -> Self {
        Self {
            count: 1,
            first_attempt_at: now,
            blocked_until: None,
        }
    }
}

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Attempts left in the current window. Always 0 when denied.
    pub remaining: u32,
    /// When the window (allowed) or the block (denied) ends, in Unix millis.
    pub reset_at: Option<u64>,
    /// Seconds until the block lifts; only set when denied.
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    fn allowed(remaining: u32, reset_at: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at: Some(reset_at),
            retry_after_secs: None,
        }
    }

    fn denied(now: u64, blocked_until: u64) -> Self {
        let wait_ms = blocked_until.saturating_sub(now);
        Self {
            allowed: false,
            remaining: 0,
            reset_at: Some(blocked_until),
            retry_after_secs: Some(wait_ms.div_ceil(1000)),
        }
    }
}

/// Identifier families used to build rate-limit keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Ip,
    Email,
    Combined,
}

impl KeyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyKind::Ip => "ip",
            KeyKind::Email => "email",
            KeyKind::Combined => "combined",
        }
    }

    /// Shorthand for [`rate_limit_key`] with this kind.
    pub fn key(self, parts: &[&str]) -> String {
        rate_limit_key(self.as_str(), parts)
    }
}

/// Builds a `kind:part1:part2` key so different identifier families never collide.
pub fn rate_limit_key(kind: &str, parts: &[&str]) -> String {
    let mut key = String::from(kind);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

/// Per-identifier attempt limiter with an optional background sweep.
///
/// Clones share the same store. Each check runs under the DashMap shard lock
/// for its key, so concurrent checks for one identifier never interleave.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, RateLimitEntry>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                entries: DashMap::new(),
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.inner.config
    }

    /// Records an attempt for `identifier` and decides whether it may proceed.
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        let config = &self.inner.config;
        let max = config.max_attempts;
        let window_ms = millis(config.window);
        let now = self.inner.clock.now_millis();
        let window_end = now.saturating_add(window_ms);

        let mut entry = match self.inner.entries.entry(identifier.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(RateLimitEntry::fresh(now));
                return RateLimitDecision::allowed(max.saturating_sub(1), window_end);
            }
            Entry::Occupied(occupied) => occupied.into_ref(),
        };

        if let Some(blocked_until) = entry.blocked_until {
            if now < blocked_until {
                return RateLimitDecision::denied(now, blocked_until);
            }
            *entry = RateLimitEntry::fresh(now);
            return RateLimitDecision::allowed(max.saturating_sub(1), window_end);
        }

        if now.saturating_sub(entry.first_attempt_at) > window_ms {
            *entry = RateLimitEntry::fresh(now);
            return RateLimitDecision::allowed(max.saturating_sub(1), window_end);
        }

        entry.count = entry.count.saturating_add(1);
        if entry.count > max {
            let blocked_until = now.saturating_add(millis(config.block_duration));
            entry.blocked_until = Some(blocked_until);
            tracing::warn!(
                "Rate limit exceeded: kind={}, attempts={}, blocked for {:?}",
                key_kind(identifier),
                entry.count,
                config.block_duration
            );
            return RateLimitDecision::denied(now, blocked_until);
        }

        RateLimitDecision::allowed(
            max - entry.count,
            entry.first_attempt_at.saturating_add(window_ms),
        )
    }

    /// Forgets every recorded attempt for `identifier`.
    pub fn reset(&self, identifier: &str) {
        if self.inner.entries.remove(identifier).is_some() {
            tracing::debug!("Rate limit reset: kind={}", key_kind(identifier));
        }
    }

    /// Current bookkeeping for `identifier`, if any.
    pub fn entry(&self, identifier: &str) -> Option<RateLimitEntry> {
        self.inner.entries.get(identifier).map(|e| e.value().clone())
    }

    /// Number of identifiers currently tracked.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Drops entries whose window has passed and which are not blocked.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Starts the periodic sweep on the current tokio runtime.
    ///
    /// Calling it while a sweep task is already running does nothing. The task
    /// holds a weak reference and exits once every limiter clone is dropped.
    pub fn start(&self) {
        let mut sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.cleanup_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        inner.sweep();
                    }
                    None => break,
                }
            }
        }));
        tracing::debug!("Rate limit sweeper started (every {period:?})");
    }

    /// Cancels the periodic sweep, if running.
    pub fn stop(&self) {
        let handle = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("Rate limit sweeper stopped");
        }
    }

    /// Returns `true` while a sweep task is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Inner {
    fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let window_ms = millis(self.config.window);
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let window_expired = now.saturating_sub(entry.first_attempt_at) > window_ms;
            let block_expired = entry.blocked_until.map_or(true, |until| now >= until);
            !(window_expired && block_expired)
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!("Rate limit sweep removed {removed} entries");
        }
        removed
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

/// Leading `kind` segment of a key. Logs carry this instead of the full key,
/// which may hold an email address.
fn key_kind(identifier: &str) -> &str {
    identifier.split(':').next().unwrap_or_default()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let limiter = RateLimiter::with_clock(RateLimitConfig::default(), Arc::new(clock.clone()));
        (limiter, clock)
    }

    #[test]
    fn default_config_values() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.window, Duration::from_secs(900));
        assert_eq!(config.block_duration, Duration::from_secs(900));
        assert_eq!(config.cleanup_interval, Duration::from_secs(300));
    }

    #[test]
    fn first_attempts_count_down_remaining() {
        let (limiter, _clock) = limiter();
        let remaining: Vec<u32> = (0..5)
            .map(|_| {
                let d = limiter.check("ip:1.1.1.1");
                assert!(d.allowed);
                assert!(d.retry_after_secs.is_none());
                d.remaining
            })
            .collect();
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn attempt_past_max_is_blocked() {
        let (limiter, _clock) = limiter();
        for _ in 0..5 {
            limiter.check("ip:1.1.1.1");
        }
        let d = limiter.check("ip:1.1.1.1");
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.retry_after_secs, Some(900));

        let entry = limiter.entry("ip:1.1.1.1").unwrap();
        assert_eq!(entry.count, 6);
        assert!(entry.blocked_until.is_some());
    }

    #[test]
    fn blocked_identifier_stays_blocked_and_retry_shrinks() {
        let (limiter, clock) = limiter();
        for _ in 0..6 {
            limiter.check("k");
        }
        clock.advance(Duration::from_millis(100_500));
        let d = limiter.check("k");
        assert!(!d.allowed);
        // 799.5s left rounds up
        assert_eq!(d.retry_after_secs, Some(800));
        assert_eq!(limiter.entry("k").unwrap().count, 6);
    }

    #[test]
    fn block_expiry_starts_fresh_window() {
        let (limiter, clock) = limiter();
        let decisions: Vec<u32> = (0..5).map(|_| limiter.check("ip:9.9.9.9").remaining).collect();
        assert_eq!(decisions, vec![4, 3, 2, 1, 0]);

        let blocked = limiter.check("ip:9.9.9.9");
        assert!(!blocked.allowed);
        let retry = blocked.retry_after_secs.unwrap();
        assert!((899..=900).contains(&retry));

        clock.advance(Duration::from_secs(15 * 60 + 1));
        let d = limiter.check("ip:9.9.9.9");
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
        assert_eq!(limiter.entry("ip:9.9.9.9").unwrap().blocked_until, None);
    }

    #[test]
    fn window_expiry_resets_count() {
        let (limiter, clock) = limiter();
        for _ in 0..4 {
            limiter.check("email:a@b.com");
        }
        clock.advance(Duration::from_secs(15 * 60 + 1));
        let d = limiter.check("email:a@b.com");
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
    }

    #[test]
    fn attempts_exactly_at_window_edge_still_count() {
        let (limiter, clock) = limiter();
        limiter.check("k");
        clock.advance(Duration::from_secs(15 * 60));
        let d = limiter.check("k");
        assert_eq!(d.remaining, 3);
    }

    #[test]
    fn reset_makes_next_check_look_first() {
        let (limiter, _clock) = limiter();
        for _ in 0..6 {
            limiter.check("k");
        }
        limiter.reset("k");
        assert!(limiter.entry("k").is_none());

        let d = limiter.check("k");
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
    }

    #[test]
    fn reset_unknown_identifier_is_noop() {
        let (limiter, _clock) = limiter();
        limiter.reset("never-seen");
        assert!(limiter.is_empty());
    }

    #[test]
    fn identifiers_are_independent() {
        let (limiter, _clock) = limiter();
        for _ in 0..6 {
            limiter.check("ip:1.1.1.1");
        }
        let d = limiter.check("ip:2.2.2.2");
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
    }

    #[test]
    fn allowed_decision_reports_window_end() {
        let (limiter, clock) = limiter();
        let start = clock.now_millis();
        limiter.check("k");
        clock.advance(Duration::from_secs(10));
        let d = limiter.check("k");
        assert_eq!(d.reset_at, Some(start + 900_000));
    }

    #[test]
    fn rate_limit_key_joins_parts() {
        assert_eq!(rate_limit_key("ip", &["1.2.3.4"]), "ip:1.2.3.4");
        assert_eq!(
            rate_limit_key("combined", &["1.2.3.4", "a@b.com"]),
            "combined:1.2.3.4:a@b.com"
        );
        assert_eq!(rate_limit_key("ip", &[]), "ip");
    }

    #[test]
    fn key_kinds_do_not_collide() {
        assert_eq!(KeyKind::Ip.key(&["x"]), "ip:x");
        assert_eq!(KeyKind::Email.key(&["x"]), "email:x");
        assert_ne!(KeyKind::Ip.key(&["x"]), KeyKind::Email.key(&["x"]));
        assert_eq!(KeyKind::Combined.key(&["1.2.3.4", "a@b.com"]), "combined:1.2.3.4:a@b.com");
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let (limiter, clock) = limiter();
        for _ in 0..6 {
            limiter.check("blocked");
        }
        limiter.check("stale");
        clock.advance(Duration::from_secs(10 * 60));
        limiter.check("fresh");
        clock.advance(Duration::from_secs(6 * 60));

        // t=16m: "stale" and "blocked" are past both window and block.
        let removed = limiter.sweep();
        assert_eq!(removed, 2);
        assert!(limiter.entry("fresh").is_some());
        assert!(limiter.entry("stale").is_none());
        assert!(limiter.entry("blocked").is_none());
    }

    #[test]
    fn sweep_keeps_block_that_outlives_window() {
        let clock = ManualClock::new(0);
        let config = RateLimitConfig {
            max_attempts: 1,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(30),
        };
        let limiter = RateLimiter::with_clock(config, Arc::new(clock.clone()));
        limiter.check("k");
        assert!(!limiter.check("k").allowed);

        clock.advance(Duration::from_secs(120));
        assert_eq!(limiter.sweep(), 0);
        assert!(limiter.entry("k").is_some());

        clock.advance(Duration::from_secs(600));
        assert_eq!(limiter.sweep(), 1);
        assert!(limiter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_evicts_expired_entries() {
        let (limiter, clock) = limiter();
        limiter.check("a");
        limiter.check("b");
        clock.advance(Duration::from_secs(16 * 60));

        limiter.start();
        assert!(limiter.is_running());
        tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;

        assert!(limiter.is_empty());
        limiter.stop();
        assert!(!limiter.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_sweeper_leaves_entries() {
        let (limiter, clock) = limiter();
        limiter.check("a");
        clock.advance(Duration::from_secs(16 * 60));

        limiter.start();
        limiter.stop();
        tokio::time::sleep(Duration::from_secs(10 * 60)).await;

        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (limiter, _clock) = limiter();
        limiter.start();
        limiter.start();
        assert!(limiter.is_running());
        limiter.stop();
        limiter.stop();
        assert!(!limiter.is_running());
    }

    #[test]
    fn instances_do_not_share_state() {
        let (a, _) = limiter();
        let (b, _) = limiter();
        for _ in 0..6 {
            a.check("k");
        }
        assert!(b.check("k").allowed);
    }

    #[test]
    fn oversized_window_saturates_instead_of_overflowing() {
        let config = RateLimitConfig {
            window: Duration::from_secs(u64::MAX),
            ..RateLimitConfig::default()
        };
        let clock = ManualClock::new(1_700_000_000_000);
        let limiter = RateLimiter::with_clock(config, Arc::new(clock));

        let first = limiter.check("k");
        assert!(first.allowed);
        assert_eq!(first.reset_at, Some(u64::MAX));

        let second = limiter.check("k");
        assert!(second.allowed);
        assert_eq!(second.remaining, 3);
        assert_eq!(second.reset_at, Some(u64::MAX));
    }

    #[test]
    fn oversized_block_saturates_instead_of_overflowing() {
        let config = RateLimitConfig {
            max_attempts: 0,
            block_duration: Duration::from_secs(u64::MAX / 1000),
            ..RateLimitConfig::default()
        };
        let clock = ManualClock::new(1_700_000_000_000);
        let limiter = RateLimiter::with_clock(config, Arc::new(clock));

        assert!(limiter.check("k").allowed);
        let denied = limiter.check("k");
        assert!(!denied.allowed);
        assert_eq!(denied.reset_at, Some(u64::MAX));
        assert!(denied.retry_after_secs.is_some_and(|s| s > 0));
    }

    #[test]
    fn key_kind_drops_identifying_parts() {
        assert_eq!(key_kind("email:ada@example.com"), "email");
        assert_eq!(key_kind("combined:1.2.3.4:ada@example.com"), "combined");
        assert_eq!(key_kind("bare"), "bare");
    }

    #[test]
    fn concurrent_checks_never_lose_attempts() {
        let config = RateLimitConfig {
            max_attempts: 1000,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::with_clock(config, Arc::new(ManualClock::new(0)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        limiter.check("shared");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(limiter.entry("shared").unwrap().count, 400);
    }
}
