//! Ordinal encoding of `year.monthday.minute` build versions.
//!
//! The ordinal only answers "is A older than B". It is never decoded back
//! into a version string.

/// Year subtracted before scaling.
pub const BASE_YEAR: u64 = 2022;
/// Multiplier for the monthday component. Must exceed the largest minute
/// value (`23 * 100 + 59`).
pub const MONTHDAY_SCALE: u64 = 2400;
/// Multiplier for the year component. Must exceed the largest monthday
/// value (`12 * 100 + 31`) times [`MONTHDAY_SCALE`].
pub const YEAR_SCALE: u64 = 1232 * MONTHDAY_SCALE;

/// Encode a version string into a comparable integer.
///
/// Returns `0` when the string is not exactly three dot-separated decimal
/// components, when the year precedes [`BASE_YEAR`], or when the encoding
/// would overflow.
pub fn ordinal(version: &str) -> u64 {
    parse(version).unwrap_or(0)
}

fn parse(version: &str) -> Option<u64> {
    let mut parts = version.split('.');
    let year = component(parts.next()?)?;
    let monthday = component(parts.next()?)?;
    let minute = component(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    year.checked_sub(BASE_YEAR)?
        .checked_mul(YEAR_SCALE)?
        .checked_add(monthday.checked_mul(MONTHDAY_SCALE)?)?
        .checked_add(minute)
}

fn component(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// `true` when `a` encodes strictly older than `b`.
pub fn is_older(a: &str, b: &str) -> bool {
    ordinal(a) < ordinal(b)
}
