// src/utils/time.rs

//! HTTP-date normalization.
//!
//! Feeds report `Last-Modified` in any of the three HTTP-date forms, with
//! inconsistent casing, spacing and zone labels:
//!
//! ```text
//! Sun, 06 Nov 1994 08:49:37 GMT    ; IMF-fixdate / RFC 1123
//! Sunday, 06-Nov-94 08:49:37 GMT   ; RFC 850
//! Sun Nov  6 08:49:37 1994         ; asctime
//! ```
//!
//! All of them normalize to the same UTC instant with whole seconds, so that
//! two probes of an untouched feed always compare equal.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SubsecRound, TimeZone, Utc};

/// Date layouts tried once the weekday and zone tokens are removed.
///
/// Two-digit-year layouts come first: `%Y` also accepts `94` and would
/// read it as year 94.
const LAYOUTS: &[&str] = &[
    "%d %b %y %H:%M:%S",
    "%d-%b-%y %H:%M:%S", // RFC 850
    "%d %b %Y %H:%M:%S", // IMF-fixdate
    "%d-%b-%Y %H:%M:%S",
    "%b %d %H:%M:%S %Y", // asctime
    "%d %b %y %H:%M",
    "%d %b %Y %H:%M",
];

/// Parse a raw HTTP-date into a UTC instant truncated to whole seconds.
///
/// A missing or unrecognized zone is read as UTC. Anything unparseable
/// yields `None`.
pub fn normalize_http_date(raw: &str) -> Option<DateTime<Utc>> {
    let mut tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }

    // Weekday names are redundant with the date and frequently wrong; ignore them.
    // A comma ends the weekday even when the day follows without a space.
    if let Some((_, rest)) = tokens[0].rsplit_once(',') {
        if rest.is_empty() {
            tokens.remove(0);
        } else {
            tokens[0] = rest;
        }
    } else if tokens[0].chars().all(|c| c.is_ascii_alphabetic()) && is_weekday(tokens[0]) {
        tokens.remove(0);
    }

    let mut offset_secs = 0;
    if let Some(last) = tokens.last() {
        if let Some(secs) = zone_offset(last) {
            offset_secs = secs;
            tokens.pop();
        } else if last.chars().all(|c| c.is_ascii_alphabetic()) {
            // Unknown zone label.
            tokens.pop();
        }
    }

    let body = tokens.join(" ");
    let naive = LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(&body, layout).ok())?;

    let offset = FixedOffset::east_opt(offset_secs)?;
    let instant = offset.from_local_datetime(&naive).single()?;

    Some(instant.with_timezone(&Utc).trunc_subsecs(0))
}

fn is_weekday(token: &str) -> bool {
    const DAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
    let lower = token.to_ascii_lowercase();
    lower.len() >= 3 && DAYS.iter().any(|day| lower.starts_with(day))
}

/// Offset in seconds east of UTC for a trailing zone token.
fn zone_offset(token: &str) -> Option<i32> {
    let hours = match token.to_ascii_uppercase().as_str() {
        "GMT" | "UT" | "UTC" | "Z" => Some(0),
        "EDT" => Some(-4),
        "EST" | "CDT" => Some(-5),
        "CST" | "MDT" => Some(-6),
        "MST" | "PDT" => Some(-7),
        "PST" => Some(-8),
        _ => None,
    };
    if let Some(hours) = hours {
        return Some(hours * 3600);
    }

    numeric_offset(token)
}

/// `+HHMM`, `-HHMM` or `+HH:MM`.
fn numeric_offset(token: &str) -> Option<i32> {
    let (sign, rest) = match token.as_bytes().first()? {
        b'+' => (1, &token[1..]),
        b'-' => (-1, &token[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60))
}
