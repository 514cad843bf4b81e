//! Engine tunables
//!
//! Retry counts, backoff delays and debounce windows are configuration
//! defaults tuned per feature, not invariants. They live in one struct that is
//! loaded from the `[engine]` TOML section and validated against a single
//! metadata table.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Constant,
    /// `base * attempt`
    #[default]
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

impl BackoffStrategy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// Monotonic non-decreasing in `attempt` and never above `cap`.
    pub fn delay(&self, base: Duration, attempt: u32, cap: Duration) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        };
        delay.min(cap)
    }
}

/// Tunable engine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// Freshness window of the response cache
    pub cache_duration_ms: u64,
    /// Observer debounce for latency-sensitive fragments
    pub fast_debounce_ms: u64,
    /// Observer debounce for expensive full-page scans (subtitles)
    pub slow_debounce_ms: u64,
    /// Delay between attempts to arm the observer before the body exists
    pub observer_arm_retry_ms: u64,
    /// Attempts per task per cycle unless the task overrides it
    pub default_max_attempts: u32,
    /// Base backoff between attempts
    pub default_backoff_ms: u64,
    pub backoff_strategy: BackoffStrategy,
    /// Upper bound on any single backoff delay
    pub max_backoff_ms: u64,
    /// Maximum age of a staged form record
    pub staging_max_age_ms: u64,
    /// Attribute stamped on every injected fragment
    pub marker_attribute: String,
    pub event_bus_capacity: usize,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            cache_duration_ms: 300_000,
            fast_debounce_ms: 150,
            slow_debounce_ms: 750,
            observer_arm_retry_ms: 100,
            default_max_attempts: 10,
            default_backoff_ms: 200,
            backoff_strategy: BackoffStrategy::Linear,
            max_backoff_ms: 5_000,
            staging_max_age_ms: 1_800_000,
            marker_attribute: "data-stagehand".to_string(),
            event_bus_capacity: 256,
        }
    }
}

/// Metadata for one numeric tunable
///
/// Single source of truth for name, default and valid range; validators take
/// the value as a string so the same table serves TOML and API input.
pub struct ParamMetadata {
    pub key: &'static str,
    pub default_value: &'static str,
    pub validation_range: &'static str,
    pub validator: fn(&str) -> Result<(), String>,
}

fn check_range(key: &str, raw: &str, min: u64, max: u64) -> Result<(), String> {
    let v: u64 = raw
        .parse()
        .map_err(|_| format!("{}: invalid number format", key))?;
    if !(min..=max).contains(&v) {
        return Err(format!("{}: value {} out of range [{}, {}]", key, v, min, max));
    }
    Ok(())
}

impl EngineParams {
    /// Metadata for every numeric tunable
    pub fn metadata() -> &'static [ParamMetadata] {
        &[
            ParamMetadata {
                key: "cache_duration_ms",
                default_value: "300000",
                validation_range: "1000-86400000",
                validator: |s| check_range("cache_duration_ms", s, 1_000, 86_400_000),
            },
            ParamMetadata {
                key: "fast_debounce_ms",
                default_value: "150",
                validation_range: "10-5000",
                validator: |s| check_range("fast_debounce_ms", s, 10, 5_000),
            },
            ParamMetadata {
                key: "slow_debounce_ms",
                default_value: "750",
                validation_range: "50-10000",
                validator: |s| check_range("slow_debounce_ms", s, 50, 10_000),
            },
            ParamMetadata {
                key: "observer_arm_retry_ms",
                default_value: "100",
                validation_range: "10-5000",
                validator: |s| check_range("observer_arm_retry_ms", s, 10, 5_000),
            },
            ParamMetadata {
                key: "default_max_attempts",
                default_value: "10",
                validation_range: "1-50",
                validator: |s| check_range("default_max_attempts", s, 1, 50),
            },
            ParamMetadata {
                key: "default_backoff_ms",
                default_value: "200",
                validation_range: "10-10000",
                validator: |s| check_range("default_backoff_ms", s, 10, 10_000),
            },
            ParamMetadata {
                key: "max_backoff_ms",
                default_value: "5000",
                validation_range: "10-60000",
                validator: |s| check_range("max_backoff_ms", s, 10, 60_000),
            },
            ParamMetadata {
                key: "staging_max_age_ms",
                default_value: "1800000",
                validation_range: "1000-604800000",
                validator: |s| check_range("staging_max_age_ms", s, 1_000, 604_800_000),
            },
            ParamMetadata {
                key: "event_bus_capacity",
                default_value: "256",
                validation_range: "8-65536",
                validator: |s| check_range("event_bus_capacity", s, 8, 65_536),
            },
        ]
    }

    fn raw_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "cache_duration_ms" => self.cache_duration_ms.to_string(),
            "fast_debounce_ms" => self.fast_debounce_ms.to_string(),
            "slow_debounce_ms" => self.slow_debounce_ms.to_string(),
            "observer_arm_retry_ms" => self.observer_arm_retry_ms.to_string(),
            "default_max_attempts" => self.default_max_attempts.to_string(),
            "default_backoff_ms" => self.default_backoff_ms.to_string(),
            "max_backoff_ms" => self.max_backoff_ms.to_string(),
            "staging_max_age_ms" => self.staging_max_age_ms.to_string(),
            "event_bus_capacity" => self.event_bus_capacity.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Validate every tunable, collecting all errors
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors: Vec<String> = Self::metadata()
            .iter()
            .filter_map(|meta| {
                let raw = self.raw_value(meta.key)?;
                (meta.validator)(&raw).err()
            })
            .collect();

        if self.marker_attribute.trim().is_empty() {
            errors.push("marker_attribute: must not be empty".to_string());
        }
        if self.fast_debounce_ms > self.slow_debounce_ms {
            errors.push(format!(
                "fast_debounce_ms: {} exceeds slow_debounce_ms {}",
                self.fast_debounce_ms, self.slow_debounce_ms
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_millis(self.cache_duration_ms)
    }

    pub fn fast_debounce(&self) -> Duration {
        Duration::from_millis(self.fast_debounce_ms)
    }

    pub fn slow_debounce(&self) -> Duration {
        Duration::from_millis(self.slow_debounce_ms)
    }

    pub fn observer_arm_retry(&self) -> Duration {
        Duration::from_millis(self.observer_arm_retry_ms)
    }

    pub fn default_backoff(&self) -> Duration {
        Duration::from_millis(self.default_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn staging_max_age(&self) -> Duration {
        Duration::from_millis(self.staging_max_age_ms)
    }
}

/// Per-task override of the retry tunables (`[tasks.<name>]`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOverride {
    pub max_attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub strategy: Option<BackoffStrategy>,
}
