//! Lenient parsing of integer query parameters.

use std::str::FromStr;

/// Default terminal width when the client does not send a usable one.
pub const DEFAULT_WIDTH: u16 = 80;
/// Default terminal height when the client does not send a usable one.
pub const DEFAULT_HEIGHT: u16 = 24;

/// Parse a positive integer, falling back to `default` when the value is
/// missing, malformed, zero, or out of range for `T`.
pub fn to_positive_int<T>(value: Option<&str>, default: T) -> T
where
    T: FromStr + PartialOrd + Default,
{
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

/// Negotiated size of the remote terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

impl TerminalSize {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Build from raw `width`/`height` query values; each falls back
    /// independently.
    pub fn from_query(width: Option<&str>, height: Option<&str>) -> Self {
        Self {
            width: to_positive_int(width, DEFAULT_WIDTH),
            height: to_positive_int(height, DEFAULT_HEIGHT),
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}
