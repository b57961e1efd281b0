use derive_more::Into;
use serde::{Deserialize, Serialize};
use std::{fmt, ops::Deref, str::FromStr};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use time_tz::{
    timezones::{db, get_by_name},
    Offset, TimeZone as TzTimeZone, Tz,
};

use stack_string::StackString;

use crate::errors::SyncError;

/// IANA timezone, serialized by name.
#[derive(Into, Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy)]
#[serde(into = "StackString", try_from = "StackString")]
pub struct TimeZone(&'static Tz);

impl TimeZone {
    #[must_use]
    pub fn utc() -> Self {
        Self(db::UTC)
    }

    /// The timezone all-day events are interpreted in. Club meeting dates
    /// are campus-local regardless of which account created them.
    #[must_use]
    pub fn organization() -> Self {
        Self(db::america::NEW_YORK)
    }

    /// Local midnight at the start of `date` as an absolute instant.
    #[must_use]
    pub fn local_midnight(self, date: Date) -> OffsetDateTime {
        let naive = PrimitiveDateTime::new(date, Time::MIDNIGHT);
        let offset = self.0.get_offset_utc(&naive.assume_utc()).to_utc();
        naive.assume_offset(offset)
    }
}

impl Default for TimeZone {
    fn default() -> Self {
        Self::organization()
    }
}

impl Deref for TimeZone {
    type Target = Tz;
    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl fmt::Display for TimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name())
    }
}

impl From<TimeZone> for StackString {
    fn from(item: TimeZone) -> Self {
        item.0.name().into()
    }
}

impl FromStr for TimeZone {
    type Err = SyncError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        get_by_name(s)
            .map(Self)
            .ok_or_else(|| SyncError::BadInput(format!("{s} is not a valid timezone").into()))
    }
}

impl TryFrom<&str> for TimeZone {
    type Error = SyncError;
    fn try_from(item: &str) -> Result<Self, Self::Error> {
        item.parse()
    }
}

impl TryFrom<StackString> for TimeZone {
    type Error = SyncError;
    fn try_from(item: StackString) -> Result<Self, Self::Error> {
        item.as_str().parse()
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use crate::timezone::TimeZone;

    #[test]
    fn test_parse_and_display() {
        let tz: TimeZone = "America/New_York".parse().unwrap();
        assert_eq!(tz, TimeZone::organization());
        assert_eq!(tz.to_string(), "America/New_York");
        assert!("Not/AZone".parse::<TimeZone>().is_err());
    }

    #[test]
    fn test_local_midnight_winter_offset() {
        let tz = TimeZone::organization();
        let midnight = tz.local_midnight(date!(2024-01-01));
        assert_eq!(midnight, datetime!(2024-01-01 00:00:00 -05:00));
    }

    #[test]
    fn test_local_midnight_summer_offset() {
        let tz = TimeZone::organization();
        let midnight = tz.local_midnight(date!(2024-07-04));
        assert_eq!(midnight, datetime!(2024-07-04 00:00:00 -04:00));
    }
}
