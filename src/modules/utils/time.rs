use chrono::{DateTime, Utc};

use crate::{OTP_TTL_MS, SESSION_TTL_MS};

/// Get the current Unix timestamp in milliseconds
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Check whether a stored deadline has passed
pub fn has_expired(deadline_ms: u64) -> bool {
    now_millis() > deadline_ms
}

/// Deadline for a session issued right now
pub fn session_deadline() -> u64 {
    now_millis() + SESSION_TTL_MS
}

/// Deadline for a reset token issued right now
pub fn otp_deadline() -> u64 {
    now_millis() + OTP_TTL_MS
}

/// Function to format a millisecond timestamp as a readable date
pub fn format_timestamp(timestamp_ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms as i64)
        .unwrap_or_default()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_formatting() {
        let timestamp = 1609459200000; // 2021-01-01 00:00:00
        assert_eq!(format_timestamp(timestamp), "2021-01-01 00:00:00");
    }

    #[test]
    fn test_now_millis_is_recent() {
        let now = now_millis();
        assert!(now > 1609459200000);
        // Two reads a moment apart stay ordered
        assert!(now_millis() >= now);
    }

    #[test]
    fn test_expiry_checks() {
        assert!(has_expired(now_millis() - 1000));
        assert!(!has_expired(now_millis() + 60_000));
    }

    #[test]
    fn test_deadlines_use_configured_windows() {
        let now = now_millis();
        let session = session_deadline();
        let otp = otp_deadline();

        assert!(session >= now + SESSION_TTL_MS);
        assert!(session <= now_millis() + SESSION_TTL_MS);
        assert!(otp >= now + OTP_TTL_MS);
        assert!(otp <= now_millis() + OTP_TTL_MS);
    }
}
