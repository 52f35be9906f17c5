use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Time bucket a session is listed under. Variant order is display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DisplayGroup {
    Today,
    Yesterday,
    LastWeek,
    Older,
}

impl DisplayGroup {
    pub const ALL: [DisplayGroup; 4] = [
        DisplayGroup::Today,
        DisplayGroup::Yesterday,
        DisplayGroup::LastWeek,
        DisplayGroup::Older,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DisplayGroup::Today => "Today",
            DisplayGroup::Yesterday => "Yesterday",
            DisplayGroup::LastWeek => "Last Week",
            DisplayGroup::Older => "Older",
        }
    }
}

impl std::fmt::Display for DisplayGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifies `timestamp` relative to `now`. First match wins:
///
/// 1. same calendar day as `now` (in `now`'s time zone) → `Today`
/// 2. less than 48 hours old → `Yesterday` (a sliding window, not the
///    previous calendar date)
/// 3. less than 7 days old → `LastWeek`
/// 4. anything else → `Older`
pub fn classify<A: TimeZone, B: TimeZone>(
    timestamp: &DateTime<A>,
    now: &DateTime<B>,
) -> DisplayGroup {
    let local = timestamp.with_timezone(&now.timezone());
    if local.date_naive() == now.date_naive() {
        return DisplayGroup::Today;
    }

    let elapsed = now.clone().signed_duration_since(local);
    if elapsed < TimeDelta::hours(48) {
        DisplayGroup::Yesterday
    } else if elapsed < TimeDelta::days(7) {
        DisplayGroup::LastWeek
    } else {
        DisplayGroup::Older
    }
}

/// Like [`classify`] for a raw server timestamp. Unparseable input is `Older`.
pub fn classify_raw<B: TimeZone>(raw: &str, now: &DateTime<B>) -> DisplayGroup {
    match parse_timestamp(raw) {
        Some(ts) => classify(&ts, now),
        None => DisplayGroup::Older,
    }
}

/// Parses RFC 3339 timestamps, falling back to naive ISO timestamps (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
