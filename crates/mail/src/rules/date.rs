//! Canonical timestamps derived from `Date` headers

use chrono::{NaiveDateTime, Weekday};
use log::warn;
use std::fmt;

/// Output layout, sortable and safe in filenames
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Rendered in place of a date that could not be parsed
pub const UNKNOWN: &str = "unknown";

/// Wall-clock time of a message in its own zone, or the `unknown` sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalDate {
    Known(NaiveDateTime),
    Unknown,
}

impl CanonicalDate {
    /// Normalize an optional `Date` header; a missing header is `Unknown`
    pub fn from_header(header: Option<&str>) -> Self {
        header.map(normalize_date).unwrap_or(CanonicalDate::Unknown)
    }

    pub fn is_known(&self) -> bool {
        matches!(self, CanonicalDate::Known(_))
    }
}

impl fmt::Display for CanonicalDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalDate::Known(datetime) => write!(f, "{}", datetime.format(CANONICAL_FORMAT)),
            CanonicalDate::Unknown => f.write_str(UNKNOWN),
        }
    }
}

#[derive(Clone, Copy)]
enum Zone {
    /// `-0700`
    Numeric,
    /// `MST`
    Named,
}

struct Layout {
    weekday: bool,
    zone: Zone,
    format: &'static str,
}

/// Accepted header layouts, tried in order
const LAYOUTS: [Layout; 4] = [
    // Mon, 02 Jan 2006 15:04:05 -0700
    Layout {
        weekday: true,
        zone: Zone::Numeric,
        format: "%d %b %Y %H:%M:%S %z",
    },
    // Mon, 02 Jan 2006 15:04:05 MST
    Layout {
        weekday: true,
        zone: Zone::Named,
        format: "%d %b %Y %H:%M:%S",
    },
    // Mon, 2 Jan 2006 15:04:05 -0700
    Layout {
        weekday: true,
        zone: Zone::Numeric,
        format: "%-d %b %Y %H:%M:%S %z",
    },
    // 2 Jan 2006 15:04:05 -0700
    Layout {
        weekday: false,
        zone: Zone::Numeric,
        format: "%-d %b %Y %H:%M:%S %z",
    },
];

/// Parse a `Date` header against the accepted layouts
///
/// The zone is parsed but not applied: the result is the time as the sender
/// wrote it. Weekday names must be valid but are not checked against the date.
pub fn normalize_date(header: &str) -> CanonicalDate {
    let header = header.trim();
    for layout in &LAYOUTS {
        if let Some(datetime) = parse_with(layout, header) {
            return CanonicalDate::Known(datetime);
        }
    }

    warn!("Failed to parse email date: {:?}", header);
    CanonicalDate::Unknown
}

fn parse_with(layout: &Layout, input: &str) -> Option<NaiveDateTime> {
    let rest = if layout.weekday {
        strip_weekday(input)?
    } else {
        input
    };

    match layout.zone {
        Zone::Numeric => NaiveDateTime::parse_from_str(rest, layout.format).ok(),
        Zone::Named => {
            let (stamp, zone) = rest.rsplit_once(' ')?;
            if !is_zone_abbreviation(zone) {
                return None;
            }
            NaiveDateTime::parse_from_str(stamp, layout.format).ok()
        }
    }
}

/// `"Mon, rest"` -> `"rest"`
fn strip_weekday(input: &str) -> Option<&str> {
    let (day, rest) = input.split_once(", ")?;
    (day.len() == 3 && day.parse::<Weekday>().is_ok()).then_some(rest)
}

fn is_zone_abbreviation(zone: &str) -> bool {
    (3..=5).contains(&zone.len()) && zone.bytes().all(|b| b.is_ascii_uppercase())
}
