//! Handler configuration.
//!
//! Supplied once when the handler is built and never mutated afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::error::InnerError;
use crate::info::AuthInfo;

/// Keepalive period for the inner connection, in seconds.
pub const PING_TIMEOUT_SERVER_SECS: u64 = 30;

/// Top-level configuration consumed by the inner handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InnerConfig {
    /// `host:port` of the inner control server.
    pub inner_host: String,
    /// Credentials presented on `who_are_you`.
    pub auth: AuthInfo,
    /// Timers and deadlines.
    pub timing: TimingConfig,
    /// Size limits and probe tuning.
    pub limits: LimitsConfig,
}

/// Timers and deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Keepalive ping period; also the ping's response deadline.
    pub ping_interval_secs: u64,
    /// Deadline for a `Response` after a request is sent.
    pub response_timeout_ms: u64,
    /// Deadline for an `Approve` after its `Response` arrived.
    pub approve_timeout_ms: u64,
    /// TCP connect timeout for the inner connection and probes.
    pub connect_timeout_ms: u64,
}

/// Size limits and probe tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest frame payload accepted or produced.
    pub max_frame_size: usize,
    /// A probe completes after receiving this many bytes.
    pub probe_target_bytes: u64,
    /// A probe completes after this long, whatever it received.
    pub probe_max_duration_ms: u64,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for InnerConfig {
    fn default() -> Self {
        Self {
            inner_host: "127.0.0.1:6317".into(),
            auth: AuthInfo::default(),
            timing: TimingConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: PING_TIMEOUT_SERVER_SECS,
            response_timeout_ms: 10_000,
            approve_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            probe_target_bytes: 4 * 1024 * 1024,
            probe_max_duration_ms: 3_000,
        }
    }
}

// ── Accessors ────────────────────────────────────────────────────

impl TimingConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn approve_timeout(&self) -> Duration {
        Duration::from_millis(self.approve_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl LimitsConfig {
    pub fn probe_max_duration(&self) -> Duration {
        Duration::from_millis(self.probe_max_duration_ms)
    }
}

impl InnerConfig {
    pub fn new(inner_host: impl Into<String>, auth: AuthInfo) -> Self {
        Self {
            inner_host: inner_host.into(),
            auth,
            ..Default::default()
        }
    }

    /// Reject configurations the handler cannot run with.
    pub fn validate(&self) -> Result<(), InnerError> {
        if self.inner_host.is_empty() {
            return Err(InnerError::Config("inner_host is empty".into()));
        }
        if self.timing.ping_interval_secs == 0 {
            return Err(InnerError::Config("ping_interval_secs must be > 0".into()));
        }
        if self.limits.probe_max_duration_ms == 0 {
            return Err(InnerError::Config("probe_max_duration_ms must be > 0".into()));
        }
        if self.limits.max_frame_size == 0 || self.limits.max_frame_size > u32::MAX as usize {
            return Err(InnerError::Config(
                "max_frame_size must be within 1..=u32::MAX".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = InnerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.timing.ping_interval(), Duration::from_secs(30));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: InnerConfig =
            serde_json::from_str(r#"{"inner_host":"tv.example:6317","timing":{"response_timeout_ms":250}}"#)
                .unwrap();
        assert_eq!(cfg.inner_host, "tv.example:6317");
        assert_eq!(cfg.timing.response_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.timing.ping_interval_secs, PING_TIMEOUT_SERVER_SECS);
    }

    #[test]
    fn rejects_zero_ping_interval() {
        let mut cfg = InnerConfig::default();
        cfg.timing.ping_interval_secs = 0;
        assert!(matches!(cfg.validate(), Err(InnerError::Config(_))));
    }

    #[test]
    fn rejects_zero_probe_duration() {
        let mut cfg = InnerConfig::default();
        cfg.limits.probe_max_duration_ms = 0;
        assert!(matches!(cfg.validate(), Err(InnerError::Config(_))));
    }
}
