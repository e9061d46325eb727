//! Failed-login lockout state machine.
//!
//! The lock is a timestamp, not a flag: `locked?` re-evaluates the 30-minute
//! window on every read, so locks expire by the passage of time without any
//! background sweeper. An expired lock behaves exactly like no lock for login
//! purposes; only the stale timestamp distinguishes the two until the next
//! reset.

use chrono::{DateTime, Duration, Utc};

/// Observable lock state for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
    /// `locked_at` is still set but the window has elapsed.
    ExpiredLock,
}

#[must_use]
pub fn lock_state(
    locked_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window_minutes: i64,
) -> LockState {
    match locked_at {
        None => LockState::Unlocked,
        Some(at) if at > now - Duration::minutes(window_minutes) => LockState::Locked,
        Some(_) => LockState::ExpiredLock,
    }
}

/// True iff the account must currently refuse logins.
#[must_use]
pub fn is_locked(
    locked_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window_minutes: i64,
) -> bool {
    lock_state(locked_at, now, window_minutes) == LockState::Locked
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: i64 = 30;

    #[test]
    fn no_timestamp_is_unlocked() {
        let now = Utc::now();
        assert_eq!(lock_state(None, now, WINDOW), LockState::Unlocked);
        assert!(!is_locked(None, now, WINDOW));
    }

    #[test]
    fn fresh_lock_is_locked() {
        let now = Utc::now();
        let at = now - Duration::minutes(5);
        assert_eq!(lock_state(Some(at), now, WINDOW), LockState::Locked);
        assert!(is_locked(Some(at), now, WINDOW));
    }

    #[test]
    fn lock_expires_lazily_after_window() {
        let now = Utc::now();
        let at = now - Duration::minutes(31);
        assert_eq!(lock_state(Some(at), now, WINDOW), LockState::ExpiredLock);
        assert!(!is_locked(Some(at), now, WINDOW));
    }

    #[test]
    fn boundary_is_exclusive() {
        // Exactly window_minutes old: `at > now - window` is false.
        let now = Utc::now();
        let at = now - Duration::minutes(WINDOW);
        assert_eq!(lock_state(Some(at), now, WINDOW), LockState::ExpiredLock);
    }

    #[test]
    fn one_second_inside_window_still_locked() {
        let now = Utc::now();
        let at = now - Duration::minutes(WINDOW) + Duration::seconds(1);
        assert!(is_locked(Some(at), now, WINDOW));
    }
}
