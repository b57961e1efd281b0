use log::debug;
use serde::de::DeserializeOwned;
use stack_string::StackString;
use std::sync::Arc;
use url::Url;

use crate::{
    auth::GoogleAuth,
    error::{classify_api_error, GcalError},
    exponential_retry,
    types::{Channel, EventList, WatchRequest},
};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const MAX_RESULTS: &str = "2500";

/// Authenticated handle to one Google account's Calendar API. Cheap to
/// clone; the auth state is shared.
#[derive(Clone)]
pub struct GCalendarInstance {
    client: reqwest::Client,
    auth: Arc<GoogleAuth>,
}

impl GCalendarInstance {
    pub fn new(client_id: &str, client_secret: &str, refresh_token: &str) -> Self {
        let client = reqwest::Client::new();
        let auth = Arc::new(GoogleAuth::new(
            client.clone(),
            client_id.into(),
            client_secret.into(),
            refresh_token.into(),
        ));
        Self { client, auth }
    }

    fn events_url(gcal_id: &str) -> Result<Url, GcalError> {
        let mut url: Url = CALENDAR_API_BASE.parse()?;
        url.path_segments_mut()
            .map_err(|()| url::ParseError::SetHostOnCannotBeABaseUrl)?
            .push("calendars")
            .push(gcal_id)
            .push("events");
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T, GcalError> {
        let token = self.auth.access_token().await?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(token.as_str())
            .query(query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_api_error(status.as_u16(), &text));
        }
        resp.json().await.map_err(Into::into)
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, GcalError> {
        let token = self.auth.access_token().await?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(token.as_str())
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_api_error(status.as_u16(), &text));
        }
        resp.json().await.map_err(Into::into)
    }

    /// Fetch one page of `events.list`. Incremental mode passes the stored
    /// sync token; pagination passes the previous page's token. The API
    /// rejects the combination of both with filtering parameters, so only
    /// the tokens and page size are ever sent.
    pub async fn list_events_page(
        &self,
        gcal_id: &str,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventList, GcalError> {
        let url = Self::events_url(gcal_id)?;
        let mut query: Vec<(&str, &str)> = vec![("maxResults", MAX_RESULTS)];
        if let Some(sync_token) = sync_token {
            query.push(("syncToken", sync_token));
        }
        if let Some(page_token) = page_token {
            query.push(("pageToken", page_token));
        }
        exponential_retry(|| {
            let url = url.clone();
            let query = query.clone();
            async move { self.get_json(url, &query).await }
        })
        .await
    }

    /// Register a push-notification channel for the calendar's events.
    pub async fn watch_events(
        &self,
        gcal_id: &str,
        watch: &WatchRequest,
    ) -> Result<Channel, GcalError> {
        let mut url = Self::events_url(gcal_id)?;
        url.path_segments_mut()
            .map_err(|()| url::ParseError::SetHostOnCannotBeABaseUrl)?
            .push("watch");
        debug!("watch {} channel {}", gcal_id, watch.id);
        exponential_retry(|| {
            let url = url.clone();
            async move { self.post_json(url, watch).await }
        })
        .await
    }

    /// Tell the API to stop pushing to a channel. Returns 204 with no body.
    pub async fn stop_channel(
        &self,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<(), GcalError> {
        let mut url: Url = CALENDAR_API_BASE.parse()?;
        url.path_segments_mut()
            .map_err(|()| url::ParseError::SetHostOnCannotBeABaseUrl)?
            .push("channels")
            .push("stop");
        let body = serde_json::json!({
            "id": channel_id,
            "resourceId": resource_id,
        });
        let token = self.auth.access_token().await?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(token.as_str())
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_api_error(status.as_u16(), &text));
        }
        Ok(())
    }
}

impl std::fmt::Debug for GCalendarInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GCalendarInstance")
    }
}

#[cfg(test)]
mod tests {
    use crate::gcal_instance::GCalendarInstance;

    #[test]
    fn test_events_url_escapes_calendar_id() {
        let url = GCalendarInstance::events_url("club.chess@group.calendar.google.com").unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/club.chess@group.calendar.google.com/events"
        );
        // '#' would otherwise start a fragment; it must be escaped
        let url = GCalendarInstance::events_url("en.usa#holiday@group.v.calendar.google.com")
            .unwrap();
        assert!(url.as_str().contains("en.usa%23holiday@group.v.calendar.google.com"));
    }
}
