use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock time, in milliseconds since the UNIX epoch.
///
/// Bootstrap reads it exactly once, when it creates a new state record. After
/// that the stored timestamp is a logical clock that only advances on
/// sequence exhaustion, so no coordinator consults the clock while generating.
///
/// # Example
///
/// ```
/// use hashflake::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> i64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since 1970-01-01 UTC.
    fn current_millis(&self) -> i64;
}

/// The host's wall clock.
///
/// No skew detection or correction is attempted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
            })
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn current_millis(&self) -> i64 {
        (**self).current_millis()
    }
}
