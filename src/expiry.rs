//! Expiry arithmetic for the dead man's switch.
//!
//! The deadline is `last_active + timeout_secs`. It is never stored: every poll
//! recomputes it from the freshest on-chain value.

/// Outcome of evaluating one observed `lastactive()` value against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    /// Seconds until the deadline. Zero or negative once it has passed.
    pub remaining: i64,
    /// `true` when `remaining <= 0`. The boundary is inclusive.
    pub expired: bool,
    deadline: i64,
}

impl Expiry {
    /// Absolute deadline in seconds since the epoch.
    pub fn deadline(&self) -> i64 {
        self.deadline
    }
}

/// Evaluate a last-active timestamp against `now`.
///
/// Zero or negative timeouts are accepted and simply expire immediately.
/// Arithmetic saturates at the `i64` bounds instead of wrapping.
pub fn evaluate(last_active: i64, timeout_secs: i64, now: i64) -> Expiry {
    let deadline = last_active.saturating_add(timeout_secs);
    let remaining = deadline.saturating_sub(now);
    Expiry {
        remaining,
        expired: remaining <= 0,
        deadline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_is_exact() {
        let e = evaluate(1000, 300, 1100);
        assert_eq!(e.remaining, 200);
        assert!(!e.expired);
        assert_eq!(e.deadline(), 1300);
    }

    #[test]
    fn test_boundary_zero_is_expired() {
        // Scenario A
        let e = evaluate(1000, 300, 1300);
        assert_eq!(e.remaining, 0);
        assert!(e.expired);
    }

    #[test]
    fn test_boundary_minus_one_is_expired() {
        let e = evaluate(1000, 300, 1301);
        assert_eq!(e.remaining, -1);
        assert!(e.expired);
    }

    #[test]
    fn test_boundary_plus_one_is_not_expired() {
        let e = evaluate(1000, 300, 1299);
        assert_eq!(e.remaining, 1);
        assert!(!e.expired);
    }

    #[test]
    fn test_scenario_b_not_expired() {
        let e = evaluate(1000, 300, 1200);
        assert_eq!(e.remaining, 100);
        assert!(!e.expired);
    }

    #[test]
    fn test_zero_timeout_expires_immediately() {
        let e = evaluate(1000, 0, 1000);
        assert_eq!(e.remaining, 0);
        assert!(e.expired);
    }

    #[test]
    fn test_negative_timeout_expires_immediately() {
        let e = evaluate(1000, -50, 990);
        assert_eq!(e.remaining, -40);
        assert!(e.expired);
    }

    #[test]
    fn test_last_active_in_future_extends_deadline() {
        // Clock skew between node and watcher: still plain arithmetic.
        let e = evaluate(2000, 300, 1000);
        assert_eq!(e.remaining, 1300);
        assert!(!e.expired);
    }

    #[test]
    fn test_saturates_instead_of_overflowing() {
        let e = evaluate(i64::MAX, 300, 0);
        assert_eq!(e.remaining, i64::MAX);
        assert!(!e.expired);

        let e = evaluate(0, 0, i64::MIN);
        assert_eq!(e.remaining, i64::MAX);

        let e = evaluate(i64::MIN, -1, 1);
        assert_eq!(e.remaining, i64::MIN);
        assert!(e.expired);
    }

    #[test]
    fn test_matches_formula_over_a_range() {
        for last_active in [0i64, 1, 999, 1_700_000_000] {
            for timeout in [-5i64, 0, 1, 300, 86_400] {
                for delta in [-2i64, -1, 0, 1, 2] {
                    let now = last_active + timeout + delta;
                    let e = evaluate(last_active, timeout, now);
                    assert_eq!(e.remaining, last_active + timeout - now);
                    assert_eq!(e.expired, last_active + timeout - now <= 0);
                }
            }
        }
    }
}
