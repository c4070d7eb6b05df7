use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Seconds in one hour.
pub const HOUR_SECONDS: u64 = 3_600;
/// Seconds in one day.
pub const DAY_SECONDS: u64 = 86_400;
/// Seconds in one week.
pub const WEEK_SECONDS: u64 = 604_800;
/// Seconds in one month, rounded to 30 days.
pub const MONTH_SECONDS: u64 = 2_592_000;

/// Retention presets offered to uploaders.
///
/// A record's `duration` is an arbitrary number of seconds; these presets are
/// the values the upload form and the CLI expose by name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

/// Error returned when a lifetime name is not one of the known presets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lifetime: {0} (expected hour, day, week or month)")]
pub struct UnknownLifetime(pub String);

impl Lifetime {
    /// All presets, shortest first.
    pub const ALL: [Self; 4] = [Self::Hour, Self::Day, Self::Week, Self::Month];

    /// Return the preset's lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Return the preset's length in seconds.
    #[must_use]
    pub fn seconds(self) -> u64 {
        match self {
            Self::Hour => HOUR_SECONDS,
            Self::Day => DAY_SECONDS,
            Self::Week => WEEK_SECONDS,
            Self::Month => MONTH_SECONDS,
        }
    }
}

impl FromStr for Lifetime {
    type Err = UnknownLifetime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| UnknownLifetime(s.to_owned()))
    }
}

impl std::fmt::Display for Lifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a remaining lifetime the way the listing pages show it.
///
/// Below an hour the value is given in minutes, below a day in hours, and
/// in days otherwise. Units are truncated, not rounded.
#[must_use]
pub fn humanize_remaining(seconds: u64) -> String {
    if seconds < HOUR_SECONDS {
        format!("{} minute(s)", seconds / 60)
    } else if seconds < DAY_SECONDS {
        format!("{} hour(s)", seconds / HOUR_SECONDS)
    } else {
        format!("{} day(s)", seconds / DAY_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_seconds() {
        assert_eq!(Lifetime::Hour.seconds(), 3600);
        assert_eq!(Lifetime::Day.seconds(), 86_400);
        assert_eq!(Lifetime::Week.seconds(), 7 * 86_400);
        assert_eq!(Lifetime::Month.seconds(), 30 * 86_400);
    }

    #[test]
    fn parse_known_names() {
        for lifetime in Lifetime::ALL {
            assert_eq!(lifetime.as_str().parse::<Lifetime>(), Ok(lifetime));
        }
    }

    #[test]
    fn parse_unknown_name_fails() {
        let err = "fortnight".parse::<Lifetime>().unwrap_err();
        assert_eq!(err, UnknownLifetime("fortnight".into()));
    }

    #[test]
    fn default_is_one_day() {
        assert_eq!(Lifetime::default(), Lifetime::Day);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Lifetime::Week).unwrap();
        assert_eq!(json, "\"week\"");
        let back: Lifetime = serde_json::from_str("\"hour\"").unwrap();
        assert_eq!(back, Lifetime::Hour);
    }

    #[test]
    fn humanize_picks_unit() {
        assert_eq!(humanize_remaining(0), "0 minute(s)");
        assert_eq!(humanize_remaining(59), "0 minute(s)");
        assert_eq!(humanize_remaining(125), "2 minute(s)");
        assert_eq!(humanize_remaining(3600), "1 hour(s)");
        assert_eq!(humanize_remaining(86_399), "23 hour(s)");
        assert_eq!(humanize_remaining(86_400), "1 day(s)");
        assert_eq!(humanize_remaining(MONTH_SECONDS), "30 day(s)");
    }
}
