//! Engine configuration.

use std::{path::PathBuf, time::Duration};

use postrider_common::{CertificatePolicy, Timeouts};
use serde::{Deserialize, Serialize};

use crate::rotation::RotationStrategy;

/// Tunables for the delivery engine.
///
/// Every field has a default, so an empty `[engine]` table is a valid
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum number of attempts before a send is abandoned. The engine
    /// always tries at least once per pooled credential, even when this is
    /// smaller than the pool.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Sends through one credential before rotating to the next.
    #[serde(default = "default_emails_per_rotation")]
    pub emails_per_rotation: u32,

    /// How the next credential is picked at rotation points.
    #[serde(default)]
    pub strategy: RotationStrategy,

    /// First cooldown period for a failing credential, in seconds.
    #[serde(default = "default_cooldown_base_secs")]
    pub cooldown_base_secs: u64,

    /// Ceiling for escalated cooldowns, in seconds.
    #[serde(default = "default_cooldown_max_secs")]
    pub cooldown_max_secs: u64,

    /// Suspicion level at which a credential is forced into cooldown.
    #[serde(default = "default_suspicion_threshold")]
    pub suspicion_threshold: u8,

    /// Consecutive connection failures before the operator is advised to
    /// check the host and port.
    #[serde(default = "default_advisory_streak")]
    pub advisory_streak: u32,

    /// Pause between credential rotations, in milliseconds.
    #[serde(default = "default_rotate_delay_ms")]
    pub rotate_delay_ms: u64,

    /// Base step for the exponential backoff between retries, in
    /// milliseconds.
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    /// Ceiling for the retry backoff, in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// SMTP transport timeouts.
    #[serde(default)]
    pub timeouts: Timeouts,

    /// TLS certificate validation policy.
    #[serde(default)]
    pub certificates: CertificatePolicy,

    /// Where learned endpoint preferences are persisted.
    #[serde(default = "default_preference_path")]
    pub preference_path: PathBuf,

    /// Directory searched for DKIM signing keys by sender domain.
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,

    /// Hostname announced in EHLO.
    #[serde(default = "default_helo_domain")]
    pub helo_domain: String,
}

const fn default_retry_limit() -> u32 {
    5
}

const fn default_emails_per_rotation() -> u32 {
    1
}

const fn default_cooldown_base_secs() -> u64 {
    300
}

const fn default_cooldown_max_secs() -> u64 {
    1800
}

const fn default_suspicion_threshold() -> u8 {
    5
}

const fn default_advisory_streak() -> u32 {
    3
}

const fn default_rotate_delay_ms() -> u64 {
    150
}

const fn default_backoff_step_ms() -> u64 {
    100
}

const fn default_backoff_cap_ms() -> u64 {
    1000
}

fn default_preference_path() -> PathBuf {
    PathBuf::from("endpoint-prefs.toml")
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("keys")
}

fn default_helo_domain() -> String {
    String::from("localhost")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            emails_per_rotation: default_emails_per_rotation(),
            strategy: RotationStrategy::default(),
            cooldown_base_secs: default_cooldown_base_secs(),
            cooldown_max_secs: default_cooldown_max_secs(),
            suspicion_threshold: default_suspicion_threshold(),
            advisory_streak: default_advisory_streak(),
            rotate_delay_ms: default_rotate_delay_ms(),
            backoff_step_ms: default_backoff_step_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            timeouts: Timeouts::default(),
            certificates: CertificatePolicy::default(),
            preference_path: default_preference_path(),
            key_dir: default_key_dir(),
            helo_domain: default_helo_domain(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn cooldown_base(&self) -> Duration {
        Duration::from_secs(self.cooldown_base_secs)
    }

    #[must_use]
    pub const fn cooldown_max(&self) -> Duration {
        Duration::from_secs(self.cooldown_max_secs)
    }

    #[must_use]
    pub const fn rotate_delay(&self) -> Duration {
        Duration::from_millis(self.rotate_delay_ms)
    }

    #[must_use]
    pub const fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    #[must_use]
    pub const fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}
