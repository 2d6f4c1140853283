//! Shared utility functions

use std::time::Duration;

/// Exponential delay: `min(base * 2^attempt, cap)`.
///
/// Saturates at `cap` instead of overflowing for large attempt numbers.
///
/// # Examples
///
/// ```ignore
/// use std::time::Duration;
///
/// let base = Duration::from_secs(60);
/// let cap = Duration::from_secs(300);
/// assert_eq!(exponential_delay(base, 1, cap), Duration::from_secs(120));
/// assert_eq!(exponential_delay(base, 3, cap), cap);
/// ```
pub fn exponential_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delay_doubles_until_cap() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_millis(2000);

        assert_eq!(exponential_delay(base, 0, cap), Duration::from_millis(100));
        assert_eq!(exponential_delay(base, 1, cap), Duration::from_millis(200));
        assert_eq!(exponential_delay(base, 3, cap), Duration::from_millis(800));
        assert_eq!(exponential_delay(base, 5, cap), cap);
    }

    #[test]
    fn test_exponential_delay_saturates_on_overflow() {
        let base = Duration::from_secs(60);
        let cap = Duration::from_secs(300);

        assert_eq!(exponential_delay(base, 40, cap), cap);
        assert_eq!(exponential_delay(base, u32::MAX, cap), cap);
    }
}
