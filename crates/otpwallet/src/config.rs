//! configuration for wallets and the commit-reveal coordinator

use std::sync::Arc;
use std::time::Duration;

use otp_merkle::{Hasher, Keccak256Hasher, Sha256Hasher};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// exponential backoff for submissions and confirmation polls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// no waiting between attempts (tests, local verifiers)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// delay before retry `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        // a shrinking or non-finite multiplier degrades to a constant delay
        let multiplier = if self.multiplier.is_finite() { self.multiplier.max(1.0) } else { 1.0 };
        let secs = self.initial_delay.as_secs_f64() * multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub retry: RetryConfig,
    /// lookups before a submitted commit counts as dropped
    pub confirm_polls: u32,
    /// how long after its commit a reveal is still accepted
    pub reveal_window: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            confirm_polls: 10,
            reveal_window: Duration::from_secs(60),
        }
    }
}

/// hash function of the authentication tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
    #[default]
    Sha256,
    Keccak256,
}

impl HashFunction {
    pub fn hasher(self) -> Arc<dyn Hasher> {
        match self {
            HashFunction::Sha256 => Arc::new(Sha256Hasher),
            HashFunction::Keccak256 => Arc::new(Keccak256Hasher),
        }
    }
}

/// shape of a new wallet's authentication tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    pub interval: Duration,
    pub duration: Duration,
    /// operations allowed per interval
    pub slot_size: usize,
    pub double_otp: bool,
    pub randomness_bits: u8,
    /// inner trees for code-based restore (also the number of codes to enter)
    pub inner_trees: usize,
    #[serde(default)]
    pub hash: HashFunction,
}

/// restore asks for six consecutive codes
pub const DEFAULT_RESTORE_WINDOW: usize = 6;

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            duration: Duration::from_secs(3600 * 24 * 364),
            slot_size: 1,
            double_otp: false,
            randomness_bits: 0,
            inner_trees: DEFAULT_RESTORE_WINDOW,
            hash: HashFunction::Sha256,
        }
    }
}

impl WalletConfig {
    pub fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.subsec_millis() != 0 || self.interval_ms() == 0 {
            return Err(Error::Config("interval must be a whole number of seconds".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_multiplier_does_not_panic() {
        for multiplier in [-3.0, 0.0, 0.5, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let retry = RetryConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                multiplier,
            };
            for attempt in 1..6 {
                assert_eq!(retry.delay_for_attempt(attempt), Duration::from_millis(100));
            }
        }
        let json = r#"{"max_attempts":3,"initial_delay":{"secs":1,"nanos":0},"max_delay":{"secs":4,"nanos":0},"multiplier":-1.0}"#;
        let retry: RetryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(30), Duration::from_millis(500));
    }

    #[test]
    fn test_immediate_never_waits() {
        let retry = RetryConfig::immediate(3);
        assert_eq!(retry.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn test_wallet_config_json() {
        let config = WalletConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: WalletConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
        assert_eq!(back.interval_ms(), 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_subsecond_interval_rejected() {
        let config = WalletConfig { interval: Duration::from_millis(1500), ..Default::default() };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_hash_function_names() {
        let json = serde_json::to_string(&HashFunction::Keccak256).unwrap();
        assert_eq!(json, "\"keccak256\"");
        let keccak = HashFunction::Keccak256.hasher();
        let sha = HashFunction::Sha256.hasher();
        assert_ne!(keccak.hash(b"x"), sha.hash(b"x"));
    }
}
