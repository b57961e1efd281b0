use futures::future::join_all;
use itertools::{Either, Itertools};
use log::{debug, error, info};
use stack_string::{format_sstr, StackString};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use gcal_client::{
    gcal_instance::GCalendarInstance,
    types::{Channel, Event as GCalEvent, EventDateTime, WatchRequest},
};

use crate::{
    config::Config,
    errors::SyncError,
    models::{Club, ClubEvent, GoogleAccount, InsertClubEvent, WebhookChannel},
    pgpool::PgPool,
    timezone::TimeZone,
};

pub const WEBHOOK_PATH: &str = "/api/webhooks/calendar";

/// Channels the provider registers without an expiration are assumed to
/// live this long before renewal.
const DEFAULT_CHANNEL_TTL_DAYS: i64 = 7;

#[derive(Clone)]
pub struct CalendarSync {
    pub config: Config,
    pub pool: PgPool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReport {
    pub upserted: usize,
    pub deleted: u64,
    pub skipped: usize,
    pub reset: bool,
}

#[derive(Debug, Clone)]
pub struct WatchOutcome {
    pub channel_id: StackString,
    pub expiration: OffsetDateTime,
}

/// Result of the full bind-sync-watch pipeline. A calendar that syncs but
/// cannot deliver push notifications is a degraded success, not a failure.
#[derive(Debug, Clone)]
pub enum EventSyncOutcome {
    Synced {
        channel_id: StackString,
        expiration: OffsetDateTime,
    },
    SyncedWithoutWebhook,
}

impl CalendarSync {
    pub fn new(config: Config, pool: PgPool) -> Self {
        Self { config, pool }
    }

    /// Build an authenticated calendar client from an account's stored
    /// refresh credential.
    pub async fn gcal_for_account(&self, account_id: Uuid) -> Result<GCalendarInstance, SyncError> {
        let account = GoogleAccount::get_by_id(account_id, &self.pool)
            .await?
            .ok_or(SyncError::MissingCredential)?;
        let refresh_token = account.refresh_token.ok_or(SyncError::MissingCredential)?;
        Ok(GCalendarInstance::new(
            &self.config.gcal_client_id,
            &self.config.gcal_client_secret,
            &refresh_token,
        ))
    }

    pub async fn gcal_for_club(&self, club: &Club) -> Result<GCalendarInstance, SyncError> {
        let account_id = club
            .calendar_account_id
            .ok_or(SyncError::MissingCredential)?;
        self.gcal_for_account(account_id).await
    }

    /// Reconcile the club's bound calendar into the event store. Incremental
    /// when a sync token is stored and `force_full_sync` is not set; a token
    /// the provider rejects as expired falls back to a fresh full sync
    /// transparently.
    pub async fn sync_calendar(
        &self,
        club_id: Uuid,
        force_full_sync: bool,
        gcal: &GCalendarInstance,
    ) -> Result<SyncReport, SyncError> {
        let club = Club::get_by_id(club_id, &self.pool)
            .await?
            .ok_or(SyncError::ClubNotFound(club_id))?;
        let gcal_id = club.calendar_id.ok_or(SyncError::NoCalendar)?;
        let sync_token = if force_full_sync {
            None
        } else {
            club.calendar_sync_token
        };
        match self
            .run_sync(club_id, &gcal_id, sync_token.as_deref().map(|v| &**v), gcal)
            .await
        {
            Err(SyncError::ResyncRequired) => {
                debug!("sync token for club {club_id} expired, resyncing from scratch");
                Club::clear_sync_token(club_id, &self.pool).await?;
                self.run_sync(club_id, &gcal_id, None, gcal).await
            }
            result => result,
        }
    }

    /// One sync pass in a single transaction. Constraint checks are
    /// deferred so the delete-then-insert sequences inside don't trip
    /// foreign keys mid-transaction. Dropping the transaction on any error
    /// rolls the whole pass back.
    async fn run_sync(
        &self,
        club_id: Uuid,
        gcal_id: &str,
        sync_token: Option<&str>,
        gcal: &GCalendarInstance,
    ) -> Result<SyncReport, SyncError> {
        let reset = sync_token.is_none();
        let tz = self.config.default_time_zone;
        let mut conn = self.pool.get().await?;
        let tran = conn.transaction().await?;
        tran.execute("SET CONSTRAINTS ALL DEFERRED", &[]).await?;

        let mut report = SyncReport {
            reset,
            ..SyncReport::default()
        };

        if reset {
            let purged = ClubEvent::delete_google_for_club(club_id, &*tran).await?;
            debug!("reset purge removed {purged} provider events for club {club_id}");
        }

        let mut page_token: Option<StackString> = None;
        let next_sync_token = loop {
            let page = gcal
                .list_events_page(gcal_id, sync_token, page_token.as_deref().map(|v| &**v))
                .await?;
            let items = page.items.unwrap_or_default();
            let (cancelled, active): (Vec<_>, Vec<_>) =
                items.into_iter().partition_map(|item| {
                    if item.is_cancelled() {
                        Either::Left(item)
                    } else {
                        Either::Right(item)
                    }
                });

            // a reset pass already purged everything, cancellations only
            // matter incrementally
            if !reset {
                let cancelled_ids: Vec<StackString> =
                    cancelled.into_iter().filter_map(|item| item.id).collect();
                if !cancelled_ids.is_empty() {
                    report.deleted +=
                        ClubEvent::delete_by_ids(club_id, &cancelled_ids, &*tran).await?;
                }
            }

            for item in &active {
                match parse_event(club_id, item, tz) {
                    Some(event) => {
                        event.upsert(&*tran).await?;
                        report.upserted += 1;
                    }
                    None => report.skipped += 1,
                }
            }

            match page.next_page_token {
                Some(token) => {
                    page_token.replace(token);
                }
                None => break page.next_sync_token,
            }
        };

        if report.skipped > 0 {
            info!(
                "skipped {} malformed provider events for club {club_id}",
                report.skipped
            );
        }

        Club::set_sync_token(club_id, next_sync_token.as_deref().map(|v| &**v), &*tran).await?;
        tran.commit().await?;
        Ok(report)
    }

    /// Register a push-notification channel for the club's calendar and
    /// record it for later renewal/teardown.
    pub async fn watch_calendar(
        &self,
        club_id: Uuid,
        gcal: &GCalendarInstance,
    ) -> Result<WatchOutcome, SyncError> {
        let club = Club::get_by_id(club_id, &self.pool)
            .await?
            .ok_or(SyncError::ClubNotFound(club_id))?;
        let gcal_id = club.calendar_id.ok_or(SyncError::NoCalendar)?;

        let channel_id = StackString::from_display(Uuid::new_v4());
        let token = StackString::from_display(Uuid::new_v4().simple());
        let address = format_sstr!("https://{}{WEBHOOK_PATH}", self.config.domain);
        let request = WatchRequest::web_hook(channel_id.clone(), address, token.clone());

        let channel = gcal.watch_events(&gcal_id, &request).await?;
        let resource_id = channel
            .resource_id
            .clone()
            .ok_or_else(|| SyncError::Provider("watch response missing resourceId".into()))?;
        let expiration = channel_expiration(&channel, OffsetDateTime::now_utc());

        WebhookChannel {
            channel_id: channel_id.clone(),
            resource_id,
            token,
            expiration,
            club_id,
        }
        .insert(&self.pool)
        .await?;
        info!("watching calendar {gcal_id} for club {club_id} until {expiration}");
        Ok(WatchOutcome {
            channel_id,
            expiration,
        })
    }

    /// Best-effort provider stop; the local row is removed either way since
    /// an orphaned channel expires upstream on its own.
    pub async fn stop_watching(
        &self,
        channel_id: &str,
        resource_id: &str,
        gcal: &GCalendarInstance,
    ) -> Result<(), SyncError> {
        if let Err(e) = gcal.stop_channel(channel_id, resource_id).await {
            error!("failed to stop channel {channel_id}: {e}");
        }
        WebhookChannel::delete(channel_id, &self.pool).await
    }

    /// Teardown entry point used by the HTTP layer and the CLI: resolves the
    /// channel row and stops it with the owning club's credentials.
    pub async fn teardown_channel(&self, channel_id: &str) -> Result<(), SyncError> {
        let channel = WebhookChannel::get_by_channel_id(channel_id, &self.pool)
            .await?
            .ok_or_else(|| SyncError::ChannelNotFound(channel_id.into()))?;
        match Club::get_by_id(channel.club_id, &self.pool).await? {
            Some(club) => match self.gcal_for_club(&club).await {
                Ok(gcal) => {
                    self.stop_watching(&channel.channel_id, &channel.resource_id, &gcal)
                        .await
                }
                Err(e) => {
                    error!("no usable credential to stop channel {channel_id}: {e}");
                    WebhookChannel::delete(channel_id, &self.pool).await
                }
            },
            None => WebhookChannel::delete(channel_id, &self.pool).await,
        }
    }

    /// Re-subscribe every channel expiring within `within`. Failures are
    /// per-channel; one club's dead credential doesn't strand the rest.
    pub async fn renew_webhooks(&self, within: Duration) -> Result<Vec<StackString>, SyncError> {
        let cutoff = OffsetDateTime::now_utc() + within;
        let channels = WebhookChannel::get_expiring_before(cutoff, &self.pool).await?;
        let mut output = Vec::new();
        for channel in channels {
            match self.renew_channel(&channel).await {
                Ok(outcome) => output.push(format_sstr!(
                    "renewed channel {} -> {} for club {}, expires {}",
                    channel.channel_id,
                    outcome.channel_id,
                    channel.club_id,
                    outcome.expiration
                )),
                Err(e) => {
                    error!("failed to renew channel {}: {e}", channel.channel_id);
                    output.push(format_sstr!(
                        "failed to renew channel {}: {e}",
                        channel.channel_id
                    ));
                }
            }
        }
        Ok(output)
    }

    async fn renew_channel(&self, channel: &WebhookChannel) -> Result<WatchOutcome, SyncError> {
        let club = Club::get_by_id(channel.club_id, &self.pool)
            .await?
            .ok_or(SyncError::ClubNotFound(channel.club_id))?;
        let gcal = self.gcal_for_club(&club).await?;
        self.stop_watching(&channel.channel_id, &channel.resource_id, &gcal)
            .await?;
        self.watch_calendar(channel.club_id, &gcal).await
    }

    /// Inbound provider push: validate the channel and its verification
    /// token, ignore the registration handshake, then run an incremental
    /// sync for the owning club.
    pub async fn handle_webhook_notification(
        &self,
        channel_id: &str,
        token: &str,
        resource_state: &str,
    ) -> Result<Option<SyncReport>, SyncError> {
        let channel = WebhookChannel::get_by_channel_id(channel_id, &self.pool)
            .await?
            .ok_or_else(|| SyncError::ChannelNotFound(channel_id.into()))?;
        if channel.token.as_str() != token {
            return Err(SyncError::ChannelTokenMismatch);
        }
        if resource_state == "sync" {
            return Ok(None);
        }
        let club = Club::get_by_id(channel.club_id, &self.pool)
            .await?
            .ok_or(SyncError::ClubNotFound(channel.club_id))?;
        let gcal = self.gcal_for_club(&club).await?;
        let report = self.sync_calendar(channel.club_id, false, &gcal).await?;
        Ok(Some(report))
    }

    /// The externally triggerable entry point: bind (or re-bind) a calendar
    /// to a club, sync it, and register for push updates. The binding write
    /// is optimistic and is reverted on any failure other than the
    /// provider's push-unsupported condition.
    pub async fn event_sync(
        &self,
        club_id: Uuid,
        calendar_id: Option<StackString>,
        calendar_name: Option<StackString>,
        account_id: Option<Uuid>,
    ) -> Result<EventSyncOutcome, SyncError> {
        let club = Club::get_by_id(club_id, &self.pool)
            .await?
            .ok_or(SyncError::ClubNotFound(club_id))?;
        let calendar_id = calendar_id
            .or_else(|| club.calendar_id.clone())
            .ok_or(SyncError::NoCalendar)?;

        if let Some(other) = Club::get_by_calendar_id(&calendar_id, &self.pool).await? {
            if other.id != club_id {
                return Err(SyncError::CalendarInUse(calendar_id));
            }
        }

        // credential lookup happens before the optimistic binding write; a
        // missing refresh token must leave the club untouched
        let account_id = account_id
            .or(club.calendar_account_id)
            .ok_or(SyncError::MissingCredential)?;
        let gcal = self.gcal_for_account(account_id).await?;

        Club::set_calendar_binding(
            club_id,
            &calendar_id,
            calendar_name.as_deref().map(|v| &**v),
            account_id,
            &self.pool,
        )
        .await?;

        if let Err(e) = self.sync_calendar(club_id, false, &gcal).await {
            Club::clear_calendar_binding(club_id, &self.pool).await?;
            return Err(e);
        }

        match self.watch_calendar(club_id, &gcal).await {
            Ok(outcome) => Ok(EventSyncOutcome::Synced {
                channel_id: outcome.channel_id,
                expiration: outcome.expiration,
            }),
            Err(SyncError::WebhookUnsupported) => {
                info!("one-time sync succeeded for club {club_id}, recurring updates unavailable");
                Ok(EventSyncOutcome::SyncedWithoutWebhook)
            }
            Err(e) => {
                Club::clear_calendar_binding(club_id, &self.pool).await?;
                Err(e)
            }
        }
    }

    /// Sync every bound club, collecting per-club outcomes.
    pub async fn run_syncing(&self, full: bool) -> Result<Vec<StackString>, SyncError> {
        let clubs = Club::get_bound(&self.pool).await?;
        let futures = clubs.into_iter().map(|club| async move {
            let result = async {
                let gcal = self.gcal_for_club(&club).await?;
                self.sync_calendar(club.id, full, &gcal).await
            }
            .await;
            match result {
                Ok(report) => format_sstr!(
                    "synced {}: upserted {} deleted {} skipped {}",
                    club.club_name,
                    report.upserted,
                    report.deleted,
                    report.skipped
                ),
                Err(e) => {
                    error!("sync failed for {}: {e}", club.club_name);
                    format_sstr!("sync failed for {}: {e}", club.club_name)
                }
            }
        });
        Ok(join_all(futures).await)
    }
}

/// Map one provider event into an insertable row. Events missing an id or a
/// summary fail validation and are skipped; the page keeps going.
fn parse_event(club_id: Uuid, item: &GCalEvent, tz: TimeZone) -> Option<InsertClubEvent> {
    let event_id = item.id.clone()?;
    let Some(title) = item.summary.clone() else {
        debug!("dropping event {event_id} without a summary");
        return None;
    };
    Some(InsertClubEvent {
        id: event_id,
        club_id,
        title,
        description: item.description.clone(),
        location: item.location.clone(),
        start_time: event_instant(item.start.as_ref(), tz, false),
        end_time: event_instant(item.end.as_ref(), tz, true),
        google: true,
        recurrence: item.recurrence.clone(),
        recurrence_id: item.recurring_event_id.clone(),
        etag: item.etag.clone(),
    })
}

/// Provider timestamps pass through exactly. A date-only value is an
/// all-day event in the organization timezone; its end date is exclusive,
/// so the stored end becomes local midnight of that date minus a minute,
/// keeping the last calendar day inside the interval.
fn event_instant(dt: Option<&EventDateTime>, tz: TimeZone, exclusive_end: bool) -> OffsetDateTime {
    match dt {
        Some(EventDateTime {
            date_time: Some(ts),
            ..
        }) => **ts,
        Some(EventDateTime {
            date: Some(date), ..
        }) => {
            let midnight = tz.local_midnight(*date);
            if exclusive_end {
                midnight - Duration::minutes(1)
            } else {
                midnight
            }
        }
        _ => OffsetDateTime::now_utc(),
    }
}

fn channel_expiration(channel: &Channel, now: OffsetDateTime) -> OffsetDateTime {
    channel
        .expiration_datetime()
        .unwrap_or_else(|| now + Duration::days(DEFAULT_CHANNEL_TTL_DAYS))
}

#[cfg(test)]
mod tests {
    use time::{
        macros::{date, datetime},
        Duration, OffsetDateTime,
    };
    use uuid::Uuid;

    use gcal_client::types::{Channel, Event as GCalEvent, EventDateTime};

    use crate::{
        calendar_sync::{channel_expiration, event_instant, parse_event},
        timezone::TimeZone,
    };

    fn all_day(date: time::Date) -> EventDateTime {
        EventDateTime {
            date: Some(date),
            ..EventDateTime::default()
        }
    }

    #[test]
    fn test_all_day_end_time_is_inclusive() {
        let tz = TimeZone::organization();
        let start = event_instant(Some(&all_day(date!(2024-01-01))), tz, false);
        let end = event_instant(Some(&all_day(date!(2024-01-02))), tz, true);
        assert_eq!(start, datetime!(2024-01-01 00:00:00 -05:00));
        // exclusive provider end date 2024-01-02 -> stored 2024-01-01 23:59 local
        assert_eq!(end, datetime!(2024-01-01 23:59:00 -05:00));
        assert_eq!(end, datetime!(2024-01-02 04:59:00 UTC));
    }

    #[test]
    fn test_timed_event_passes_through() {
        let tz = TimeZone::organization();
        let dt = EventDateTime {
            date_time: Some(datetime!(2024-03-05 18:30:00 -05:00).into()),
            ..EventDateTime::default()
        };
        let instant = event_instant(Some(&dt), tz, true);
        assert_eq!(instant, datetime!(2024-03-05 23:30:00 UTC));
    }

    #[test]
    fn test_missing_times_default_to_now() {
        let tz = TimeZone::organization();
        let instant = event_instant(None, tz, false);
        assert!((OffsetDateTime::now_utc() - instant).abs() < Duration::seconds(5));
    }

    #[test]
    fn test_parse_event_requires_id_and_summary() {
        let tz = TimeZone::organization();
        let club_id = Uuid::new_v4();

        let mut event = GCalEvent {
            id: Some("evt1".into()),
            summary: Some("General Meeting".into()),
            location: Some("Union 101".into()),
            etag: Some("\"etag1\"".into()),
            start: Some(all_day(date!(2024-02-01))),
            end: Some(all_day(date!(2024-02-02))),
            ..GCalEvent::default()
        };
        let parsed = parse_event(club_id, &event, tz).unwrap();
        assert_eq!(parsed.id.as_str(), "evt1");
        assert_eq!(parsed.title.as_str(), "General Meeting");
        assert_eq!(parsed.club_id, club_id);
        assert!(parsed.google);

        event.summary = None;
        assert!(parse_event(club_id, &event, tz).is_none());

        event.summary = Some("General Meeting".into());
        event.id = None;
        assert!(parse_event(club_id, &event, tz).is_none());
    }

    #[test]
    fn test_channel_expiration_defaults_to_a_week() {
        let now = datetime!(2024-06-01 12:00:00 UTC);
        let channel = Channel::default();
        assert_eq!(
            channel_expiration(&channel, now),
            datetime!(2024-06-08 12:00:00 UTC)
        );

        let channel = Channel {
            expiration: Some(1_704_067_200_000),
            ..Channel::default()
        };
        assert_eq!(
            channel_expiration(&channel, now),
            datetime!(2024-01-01 00:00:00 UTC)
        );
    }
}
