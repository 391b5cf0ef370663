//! Environment dependencies shared by the engines.
//!
//! Time is injected so that expiry and rate-limit windows can be tested
//! without sleeping.

use crate::error::{AuthError, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// `at + by`, or `AuthError::Configuration` when the instant is not representable.
pub(crate) fn checked_later(at: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    at.checked_add_signed(by).ok_or_else(|| {
        AuthError::Configuration(format!("{by} after {at} is out of range"))
    })
}

/// `at - by`, or `AuthError::Configuration` when the instant is not representable.
pub(crate) fn checked_earlier(at: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    at.checked_sub_signed(by).ok_or_else(|| {
        AuthError::Configuration(format!("{by} before {at} is out of range"))
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_checked_offsets() {
        let now = Utc::now();
        assert_eq!(checked_later(now, Duration::hours(1)).unwrap(), now + Duration::hours(1));
        assert_eq!(checked_earlier(now, Duration::hours(1)).unwrap(), now - Duration::hours(1));
        assert!(matches!(
            checked_later(DateTime::<Utc>::MAX_UTC, Duration::seconds(1)),
            Err(AuthError::Configuration(_))
        ));
        assert!(matches!(
            checked_earlier(DateTime::<Utc>::MIN_UTC, Duration::seconds(1)),
            Err(AuthError::Configuration(_))
        ));
    }
}
