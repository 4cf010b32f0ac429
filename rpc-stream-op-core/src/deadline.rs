//! Stream deadlines and the `grpc-timeout` header.
//!
//! A metadata batch carries a [`Deadline`]. Absence of a deadline is the
//! [`Deadline::Infinite`] sentinel, which orders after every real instant so
//! that "earliest wins" needs no special cases.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::MetadataError;

/// Header carrying a relative timeout for the call.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Maximum number of digits the `grpc-timeout` value may carry.
const MAX_TIMEOUT_DIGITS: usize = 8;

/// A point in time by which a stream must complete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Deadline {
    /// Complete by this instant.
    At(Instant),
    /// No deadline.
    #[default]
    Infinite,
}

impl Deadline {
    /// The "no deadline" sentinel.
    pub const fn infinite() -> Self {
        Deadline::Infinite
    }

    /// A deadline at a fixed instant.
    pub const fn at(instant: Instant) -> Self {
        Deadline::At(instant)
    }

    /// A deadline `timeout` from now. Saturates to [`Deadline::Infinite`].
    pub fn after(timeout: Duration) -> Self {
        Instant::now()
            .checked_add(timeout)
            .map_or(Deadline::Infinite, Deadline::At)
    }

    /// Returns true if this is the "no deadline" sentinel.
    pub fn is_infinite(&self) -> bool {
        matches!(self, Deadline::Infinite)
    }

    /// The instant, or `None` for an infinite deadline.
    pub fn instant(&self) -> Option<Instant> {
        match self {
            Deadline::At(instant) => Some(*instant),
            Deadline::Infinite => None,
        }
    }

    /// Time left until the deadline as seen from `now`.
    ///
    /// Returns `None` for an infinite deadline and zero once it has passed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.instant()
            .map(|instant| instant.saturating_duration_since(now))
    }

    /// The earlier of two deadlines.
    pub fn earliest(self, other: Self) -> Self {
        self.min(other)
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remaining(Instant::now()) {
            None => f.write_str("inf"),
            Some(left) => write!(f, "+{}ms", left.as_millis()),
        }
    }
}

/// Parse a `grpc-timeout` header value such as `"100m"` or `"5S"`.
///
/// The value is 1 to 8 ASCII digits followed by a unit:
/// `H` hours, `M` minutes, `S` seconds, `m` milliseconds, `u` microseconds,
/// `n` nanoseconds.
pub fn parse_grpc_timeout(value: &str) -> Result<Duration, MetadataError> {
    let invalid = || MetadataError::InvalidTimeout(value.to_string());
    if !value.is_ascii() {
        return Err(invalid());
    }

    let (digits, unit) = value.split_at(value.len().saturating_sub(1));
    if digits.is_empty()
        || digits.len() > MAX_TIMEOUT_DIGITS
        || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return Err(invalid()),
    };
    Ok(timeout)
}

/// Encode a timeout as a `grpc-timeout` header value.
///
/// Uses the finest unit whose amount fits in 8 digits, rounding up so the
/// peer never sees a shorter timeout than requested.
pub fn encode_grpc_timeout(timeout: Duration) -> String {
    const LIMIT: u128 = 100_000_000;
    const UNITS: [(u128, char); 6] = [
        (1, 'n'),
        (1_000, 'u'),
        (1_000_000, 'm'),
        (1_000_000_000, 'S'),
        (60 * 1_000_000_000, 'M'),
        (60 * 60 * 1_000_000_000, 'H'),
    ];

    let nanos = timeout.as_nanos();
    for (scale, unit) in UNITS {
        let amount = nanos.div_ceil(scale);
        if amount < LIMIT {
            return format!("{amount}{unit}");
        }
    }
    format!("{}H", LIMIT - 1)
}
