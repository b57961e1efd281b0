use derive_more::{Deref, From, Into};
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};
use stack_string::StackString;
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime, UtcOffset};

/// RFC3339 instant as the Calendar API sends it. Google emits `Z` suffixes
/// and arbitrary offsets; everything is normalized to UTC on parse.
#[derive(Debug, Clone, Copy, Deref, Into, From, PartialEq, Eq)]
pub struct DateTimeType(OffsetDateTime);

pub fn convert_datetime_to_str(datetime: OffsetDateTime) -> Result<StackString, time::error::Format> {
    datetime.format(&Rfc3339).map(Into::into)
}

pub fn convert_str_to_datetime(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(s, &Rfc3339).map(|d| d.to_offset(UtcOffset::UTC))
}

impl Serialize for DateTimeType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer
            .serialize_str(&convert_datetime_to_str(self.0).map_err(serde::ser::Error::custom)?)
    }
}

impl<'de> Deserialize<'de> for DateTimeType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = StackString::deserialize(deserializer)?;
        convert_str_to_datetime(&s).map(Self).map_err(DeError::custom)
    }
}

/// Start or end of an event: either a date-only value (all-day events) or
/// an exact instant, per the API's `events` resource.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EventDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTimeType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<StackString>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    pub id: Option<StackString>,
    pub status: Option<StackString>,
    pub etag: Option<StackString>,
    pub summary: Option<StackString>,
    pub description: Option<StackString>,
    pub location: Option<StackString>,
    pub html_link: Option<StackString>,
    pub start: Option<EventDateTime>,
    pub end: Option<EventDateTime>,
    pub recurrence: Option<Vec<StackString>>,
    pub recurring_event_id: Option<StackString>,
    pub created: Option<DateTimeType>,
    pub updated: Option<DateTimeType>,
}

impl Event {
    pub fn is_cancelled(&self) -> bool {
        self.status.as_ref().map(|s| s.as_str()) == Some("cancelled")
    }
}

/// One page of `events.list`. `next_sync_token` is only present on the
/// final page (no `next_page_token`).
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EventList {
    pub items: Option<Vec<Event>>,
    pub next_page_token: Option<StackString>,
    pub next_sync_token: Option<StackString>,
}

/// Body of `events.watch`.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub id: StackString,
    #[serde(rename = "type")]
    pub channel_type: StackString,
    pub address: StackString,
    pub token: StackString,
}

impl WatchRequest {
    pub fn web_hook(id: StackString, address: StackString, token: StackString) -> Self {
        Self {
            id,
            channel_type: "web_hook".into(),
            address,
            token,
        }
    }
}

/// Notification channel returned by `events.watch`. The expiration comes
/// back as epoch milliseconds, serialized as an int64 string.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Channel {
    pub id: Option<StackString>,
    pub resource_id: Option<StackString>,
    pub resource_uri: Option<StackString>,
    pub token: Option<StackString>,
    #[serde(deserialize_with = "deserialize_epoch_millis")]
    pub expiration: Option<i64>,
}

impl Channel {
    pub fn expiration_datetime(&self) -> Option<OffsetDateTime> {
        let millis = self.expiration?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
    }
}

fn deserialize_epoch_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(StackString),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(i)) => Ok(Some(i)),
        Some(Raw::Str(s)) => s.parse().map(Some).map_err(DeError::custom),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use crate::types::{Channel, Event, EventList};

    #[test]
    fn test_deserialize_timed_event() {
        let raw = r#"{
            "id": "abc123",
            "status": "confirmed",
            "etag": "\"3181159875152000\"",
            "summary": "Chess Club Meeting",
            "location": "Student Center 204",
            "start": {"dateTime": "2024-01-15T18:00:00-05:00"},
            "end": {"dateTime": "2024-01-15T20:00:00-05:00"},
            "updated": "2024-01-10T03:21:17.575Z"
        }"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.id.as_deref().map(|v| &**v), Some("abc123"));
        assert!(!event.is_cancelled());
        let start = event.start.unwrap().date_time.unwrap();
        assert_eq!(*start, datetime!(2024-01-15 23:00:00 UTC));
    }

    #[test]
    fn test_deserialize_all_day_event() {
        let raw = r#"{
            "id": "allday1",
            "summary": "Club Fair",
            "start": {"date": "2024-01-01"},
            "end": {"date": "2024-01-02"}
        }"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.start.unwrap().date, Some(date!(2024-01-01)));
        assert_eq!(event.end.unwrap().date, Some(date!(2024-01-02)));
    }

    #[test]
    fn test_deserialize_cancelled_event() {
        let raw = r#"{"id": "gone1", "status": "cancelled"}"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert!(event.is_cancelled());
        assert!(event.summary.is_none());
    }

    #[test]
    fn test_deserialize_event_list_final_page() {
        let raw = r#"{
            "items": [{"id": "a"}, {"id": "b"}],
            "nextSyncToken": "CPDAlvWDx70CEPDAlvWDx70CGAU="
        }"#;
        let page: EventList = serde_json::from_str(raw).unwrap();
        assert_eq!(page.items.unwrap().len(), 2);
        assert!(page.next_page_token.is_none());
        assert_eq!(
            page.next_sync_token.as_deref().map(|v| &**v),
            Some("CPDAlvWDx70CEPDAlvWDx70CGAU=")
        );
    }

    #[test]
    fn test_channel_expiration_millis_string() {
        let raw = r#"{
            "id": "chan-1",
            "resourceId": "o3hgv1538sdjfh",
            "expiration": "1704067200000"
        }"#;
        let channel: Channel = serde_json::from_str(raw).unwrap();
        assert_eq!(
            channel.expiration_datetime(),
            Some(datetime!(2024-01-01 00:00:00 UTC))
        );
    }

    #[test]
    fn test_channel_without_expiration() {
        let raw = r#"{"id": "chan-2", "resourceId": "xyz"}"#;
        let channel: Channel = serde_json::from_str(raw).unwrap();
        assert!(channel.expiration_datetime().is_none());
    }
}
