//! Rate-limit signal payload and cooldown resolution
//!
//! The external monitor reports throttle events as JSON. `type` and
//! `timestamp` are required; the reset hint is optional and comes as an
//! absolute deadline (`resetsAt` or `resetTimestamp`, unix seconds) or a
//! relative `retryAfter` (seconds). Absent any hint, a configured default
//! cooldown applies.

use serde::Deserialize;

/// Cooldown assumed when a signal carries no reset hint (seconds).
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;

/// A throttle notification from the rate-limit monitor.
///
/// Every field is optional at the serde layer; the engine validates the
/// required ones and rejects malformed payloads with a validation error
/// rather than a transport-level decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitSignal {
    #[serde(rename = "type")]
    pub signal_type: Option<String>,
    /// Detection time, unix seconds
    pub timestamp: Option<u64>,
    /// Upstream request URL that triggered the throttle
    pub url: Option<String>,
    /// Absolute reset deadline, unix seconds
    pub resets_at: Option<u64>,
    /// Alternate absolute reset field some monitor builds send
    pub reset_timestamp: Option<u64>,
    /// Relative cooldown, seconds
    pub retry_after: Option<u64>,
    pub limit_type: Option<String>,
}

/// Cooldown resolved from a signal: duration plus its absolute deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCooldown {
    pub cooldown_seconds: u64,
    pub reset_at: u64,
}

/// Compute the cooldown a signal asks for.
///
/// Preference order: absolute deadline (`resetsAt`, then
/// `resetTimestamp`), then relative `retryAfter`, then `default_cooldown`.
/// Arithmetic is relative to the signal's own detection `timestamp`; an
/// absolute deadline already in the past yields a zero-length cooldown,
/// and relative offsets saturate at the top of the range.
pub fn resolve_cooldown(
    signal: &RateLimitSignal,
    timestamp: u64,
    default_cooldown: u64,
) -> ResolvedCooldown {
    if let Some(reset_at) = signal.resets_at.or(signal.reset_timestamp) {
        ResolvedCooldown {
            cooldown_seconds: reset_at.saturating_sub(timestamp),
            reset_at,
        }
    } else if let Some(retry_after) = signal.retry_after {
        ResolvedCooldown {
            cooldown_seconds: retry_after,
            reset_at: timestamp.saturating_add(retry_after),
        }
    } else {
        ResolvedCooldown {
            cooldown_seconds: default_cooldown,
            reset_at: timestamp.saturating_add(default_cooldown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_reset_takes_priority() {
        let signal = RateLimitSignal {
            resets_at: Some(2_000),
            retry_after: Some(50),
            ..Default::default()
        };
        let resolved = resolve_cooldown(&signal, 1_400, DEFAULT_COOLDOWN_SECS);
        assert_eq!(resolved.reset_at, 2_000);
        assert_eq!(resolved.cooldown_seconds, 600);
    }

    #[test]
    fn reset_timestamp_used_when_resets_at_absent() {
        let signal = RateLimitSignal {
            reset_timestamp: Some(3_000),
            retry_after: Some(50),
            ..Default::default()
        };
        let resolved = resolve_cooldown(&signal, 2_500, DEFAULT_COOLDOWN_SECS);
        assert_eq!(resolved.reset_at, 3_000);
        assert_eq!(resolved.cooldown_seconds, 500);
    }

    #[test]
    fn retry_after_offsets_from_detection_time() {
        let signal = RateLimitSignal {
            retry_after: Some(120),
            ..Default::default()
        };
        let resolved = resolve_cooldown(&signal, 10_000, DEFAULT_COOLDOWN_SECS);
        assert_eq!(resolved.reset_at, 10_120);
        assert_eq!(resolved.cooldown_seconds, 120);
    }

    #[test]
    fn default_cooldown_when_no_hint() {
        let signal = RateLimitSignal::default();
        let resolved = resolve_cooldown(&signal, 10_000, DEFAULT_COOLDOWN_SECS);
        assert_eq!(resolved.reset_at, 10_300);
        assert_eq!(resolved.cooldown_seconds, 300);
    }

    #[test]
    fn relative_offsets_saturate_at_range_top() {
        let signal = RateLimitSignal {
            retry_after: Some(120),
            ..Default::default()
        };
        let resolved = resolve_cooldown(&signal, u64::MAX, DEFAULT_COOLDOWN_SECS);
        assert_eq!(resolved.reset_at, u64::MAX);
        assert_eq!(resolved.cooldown_seconds, 120);

        let resolved =
            resolve_cooldown(&RateLimitSignal::default(), u64::MAX - 10, DEFAULT_COOLDOWN_SECS);
        assert_eq!(resolved.reset_at, u64::MAX);
        assert_eq!(resolved.cooldown_seconds, DEFAULT_COOLDOWN_SECS);
    }

    #[test]
    fn past_absolute_reset_yields_zero_cooldown() {
        let signal = RateLimitSignal {
            resets_at: Some(900),
            ..Default::default()
        };
        let resolved = resolve_cooldown(&signal, 1_000, DEFAULT_COOLDOWN_SECS);
        assert_eq!(resolved.reset_at, 900);
        assert_eq!(resolved.cooldown_seconds, 0);
    }

    #[test]
    fn deserializes_monitor_payload() {
        let payload = r#"{
            "type": "rate_limit",
            "timestamp": 1700000000,
            "url": "https://upstream.example/api/organizations/org-9f2/usage",
            "retryAfter": 90,
            "limitType": "requests"
        }"#;
        let signal: RateLimitSignal = serde_json::from_str(payload).unwrap();
        assert_eq!(signal.signal_type.as_deref(), Some("rate_limit"));
        assert_eq!(signal.timestamp, Some(1_700_000_000));
        assert_eq!(signal.retry_after, Some(90));
        assert_eq!(signal.limit_type.as_deref(), Some("requests"));
        assert_eq!(signal.resets_at, None);
    }

    #[test]
    fn deserializes_with_missing_and_unknown_fields() {
        // Required-field enforcement happens in the engine, not serde
        let signal: RateLimitSignal =
            serde_json::from_str(r#"{"resetsAt": 123, "extra": true}"#).unwrap();
        assert_eq!(signal.signal_type, None);
        assert_eq!(signal.timestamp, None);
        assert_eq!(signal.resets_at, Some(123));
    }
}
