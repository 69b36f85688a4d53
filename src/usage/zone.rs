use chrono::{FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Clock whose calendar days bucket usage
///
/// `Local` follows the server process (including its DST rules); the other
/// variants pin the day boundary regardless of where the process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum DayZone {
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
}

impl TimeZone for DayZone {
    type Offset = FixedOffset;

    fn from_offset(offset: &FixedOffset) -> Self {
        Self::Fixed(*offset)
    }

    fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
        self.offset_from_local_datetime(&local.and_time(NaiveTime::MIN))
    }

    fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
        match self {
            Self::Local => Local.offset_from_local_datetime(local),
            Self::Utc => LocalResult::Single(Utc.fix()),
            Self::Fixed(offset) => LocalResult::Single(*offset),
        }
    }

    fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
        self.offset_from_utc_datetime(&utc.and_time(NaiveTime::MIN))
    }

    fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
        match self {
            Self::Local => Local.offset_from_utc_datetime(utc),
            Self::Utc => Utc.fix(),
            Self::Fixed(offset) => *offset,
        }
    }
}

impl FromStr for DayZone {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "utc" | "z" => Ok(Self::Utc),
            other => other.parse::<FixedOffset>().map(Self::Fixed).map_err(|_| {
                anyhow::anyhow!(
                    "Invalid timezone '{}': expected 'local', 'utc' or an offset like +05:30",
                    s
                )
            }),
        }
    }
}

impl TryFrom<String> for DayZone {
    type Error = anyhow::Error;

    fn try_from(value: String) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl From<DayZone> for String {
    fn from(zone: DayZone) -> Self {
        zone.to_string()
    }
}

impl fmt::Display for DayZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Utc => write!(f, "utc"),
            Self::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::engine::UsageEngine;

    #[test]
    fn test_parse() {
        assert_eq!("local".parse::<DayZone>().unwrap(), DayZone::Local);
        assert_eq!("UTC".parse::<DayZone>().unwrap(), DayZone::Utc);
        assert_eq!(
            "+05:30".parse::<DayZone>().unwrap(),
            DayZone::Fixed(FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap())
        );
        assert_eq!(
            "-08:00".parse::<DayZone>().unwrap(),
            DayZone::Fixed(FixedOffset::west_opt(8 * 3600).unwrap())
        );
        assert!("Mars/Olympus".parse::<DayZone>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for zone in [
            DayZone::Local,
            DayZone::Utc,
            DayZone::Fixed(FixedOffset::east_opt(9 * 3600).unwrap()),
        ] {
            assert_eq!(zone.to_string().parse::<DayZone>().unwrap(), zone);
        }
    }

    #[test]
    fn test_fixed_zone_day_keys() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap();

        let utc = UsageEngine::new(DayZone::Utc);
        let tokyo = UsageEngine::new("+09:00".parse::<DayZone>().unwrap());

        assert_eq!(utc.day_key(ts), "2024-01-01");
        assert_eq!(tokyo.day_key(ts), "2024-01-02");
    }

    #[test]
    fn test_local_zone_matches_process_local() {
        let ts = Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap();
        let engine = UsageEngine::new(DayZone::Local);

        let expected = ts.with_timezone(&Local).format("%Y-%m-%d").to_string();
        assert_eq!(engine.day_key(ts), expected);
    }
}
