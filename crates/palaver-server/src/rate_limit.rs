//! Per-connection rate limiting
//!
//! Each connection owns one tracker: a bounded list of accepted-frame
//! timestamps inside the widest rule window. Rules gate independently; a
//! frame is rejected as soon as any enabled rule's window is full. Rejected
//! frames are not recorded, so a flooding client does not extend its own
//! penalty. Rule `scope` values other than per-client are accepted in
//! configuration but not distinguished.

use crate::config::RateLimitRule;

/// Timestamps older than this are pruned on every check (no rule window may
/// exceed it)
const PRUNE_HORIZON_MS: i64 = 60_000;

/// Sliding-window tracker for one connection
#[derive(Debug)]
pub struct RateLimiter {
    rules: Vec<RateLimitRule>,
    timestamps: Vec<i64>,
}

impl RateLimiter {
    /// Build a tracker over the enabled rules
    pub fn new(rules: &[RateLimitRule]) -> Self {
        Self {
            rules: rules.iter().filter(|r| r.enabled).cloned().collect(),
            timestamps: Vec::new(),
        }
    }

    /// Gate one inbound frame
    ///
    /// Returns true and records the frame when every applicable rule admits
    /// it; returns false (recording nothing) when any rule's window is full.
    pub fn check_and_record(&mut self, message_type: &str, now_ms: i64) -> bool {
        self.timestamps.retain(|&t| now_ms - t <= PRUNE_HORIZON_MS);

        for rule in &self.rules {
            if let Some(types) = &rule.message_types {
                if !types.iter().any(|t| t == message_type) {
                    continue;
                }
            }
            let window_start = now_ms - rule.window_ms;
            let in_window = self
                .timestamps
                .iter()
                .filter(|&&t| t >= window_start)
                .count();
            if in_window >= rule.max_messages as usize {
                return false;
            }
        }

        self.timestamps.push(now_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(max: u32, window_ms: i64, types: Option<&[&str]>) -> RateLimitRule {
        RateLimitRule {
            enabled: true,
            max_messages: max,
            window_ms,
            message_types: types.map(|ts| ts.iter().map(|s| s.to_string()).collect()),
            scope: None,
        }
    }

    #[test]
    fn test_accepts_up_to_max_then_rejects() {
        let mut limiter = RateLimiter::new(&[rule(3, 10_000, None)]);
        assert!(limiter.check_and_record("custom", 1_000));
        assert!(limiter.check_and_record("custom", 1_001));
        assert!(limiter.check_and_record("custom", 1_002));
        assert!(!limiter.check_and_record("custom", 1_003));
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = RateLimiter::new(&[rule(2, 1_000, None)]);
        assert!(limiter.check_and_record("custom", 0));
        assert!(limiter.check_and_record("custom", 10));
        assert!(!limiter.check_and_record("custom", 999));
        // The frame at t=0 has left the window at t=1001
        assert!(limiter.check_and_record("custom", 1_001));
    }

    #[test]
    fn test_rejected_frames_are_not_recorded() {
        let mut limiter = RateLimiter::new(&[rule(1, 1_000, None)]);
        assert!(limiter.check_and_record("custom", 0));
        assert!(!limiter.check_and_record("custom", 500));
        assert!(!limiter.check_and_record("custom", 900));
        // Only the accepted frame at t=0 counts toward the window
        assert!(limiter.check_and_record("custom", 1_001));
    }

    #[test]
    fn test_type_filter_skips_other_types() {
        let mut limiter = RateLimiter::new(&[rule(1, 10_000, Some(&["custom"]))]);
        assert!(limiter.check_and_record("custom", 0));
        assert!(!limiter.check_and_record("custom", 1));
        // offers are outside the rule's type set
        assert!(limiter.check_and_record("offer", 2));
        assert!(limiter.check_and_record("offer", 3));
    }

    #[test]
    fn test_disabled_rules_are_ignored() {
        let mut disabled = rule(1, 10_000, None);
        disabled.enabled = false;
        let mut limiter = RateLimiter::new(&[disabled]);
        for t in 0..20 {
            assert!(limiter.check_and_record("custom", t));
        }
    }

    #[test]
    fn test_multiple_rules_all_apply() {
        let mut limiter = RateLimiter::new(&[
            rule(10, 10_000, None),
            rule(2, 1_000, Some(&["offer"])),
        ]);
        assert!(limiter.check_and_record("offer", 0));
        assert!(limiter.check_and_record("offer", 1));
        // Second rule is full even though the first still has room
        assert!(!limiter.check_and_record("offer", 2));
        assert!(limiter.check_and_record("answer", 3));
    }

    #[test]
    fn test_prune_horizon_bounds_tracker() {
        let mut limiter = RateLimiter::new(&[rule(100, 10_000, None)]);
        for t in 0..50 {
            assert!(limiter.check_and_record("custom", t));
        }
        assert!(limiter.check_and_record("custom", 70_000));
        assert_eq!(limiter.timestamps.len(), 1);
    }

    #[test]
    fn test_no_rules_accepts_everything() {
        let mut limiter = RateLimiter::new(&[]);
        for t in 0..100 {
            assert!(limiter.check_and_record("custom", t));
        }
    }
}
