use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use stack_string::StackString;
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

use gcal_client::types::DateTimeType;

use club_calendar_lib::{
    calendar_sync::EventSyncOutcome,
    errors::SyncError,
    models::{Club, ClubEvent, EventRegistration, InsertClubEvent},
};

use crate::{app::AppState, errors::ServiceError, session::LoggedUser};

pub type HttpResult<T> = Result<T, ServiceError>;

pub fn get_api_router() -> Router<AppState> {
    Router::new()
        .route("/api/clubs", get(list_clubs))
        .route("/api/club/{club_id}/events", get(list_club_events))
        .route("/api/club/{club_id}/events", post(create_event))
        .route("/api/club/{club_id}/calendar/sync", post(event_sync))
        .route("/api/agenda", get(agenda))
        .route("/api/events/{event_id}", delete(delete_event))
        .route("/api/events/{event_id}/register", post(register))
        .route("/api/events/{event_id}/register", delete(unregister))
        .route("/api/webhooks/calendar", post(calendar_webhook))
        .route(
            "/api/webhooks/calendar/{channel_id}",
            delete(stop_webhook_channel),
        )
}

#[derive(Serialize)]
struct ClubResponse {
    id: Uuid,
    club_name: StackString,
    description: Option<StackString>,
    approved: bool,
    calendar_id: Option<StackString>,
    calendar_name: Option<StackString>,
}

impl From<Club> for ClubResponse {
    fn from(item: Club) -> Self {
        Self {
            id: item.id,
            club_name: item.club_name,
            description: item.description,
            approved: item.approved,
            calendar_id: item.calendar_id,
            calendar_name: item.calendar_name,
        }
    }
}

async fn list_clubs(
    State(data): State<AppState>,
    _: LoggedUser,
) -> HttpResult<Json<Vec<ClubResponse>>> {
    let clubs = Club::get_all(&data.cal_sync.pool)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(clubs))
}

#[derive(Serialize)]
struct EventResponse {
    id: StackString,
    club_id: Uuid,
    title: StackString,
    description: Option<StackString>,
    location: Option<StackString>,
    start_time: DateTimeType,
    end_time: DateTimeType,
    google: bool,
}

impl From<ClubEvent> for EventResponse {
    fn from(item: ClubEvent) -> Self {
        Self {
            id: item.id,
            club_id: item.club_id,
            title: item.title,
            description: item.description,
            location: item.location,
            start_time: item.start_time.into(),
            end_time: item.end_time.into(),
            google: item.google,
        }
    }
}

#[derive(Deserialize)]
struct EventsQuery {
    min_date: Option<Date>,
    max_date: Option<Date>,
}

async fn list_club_events(
    State(data): State<AppState>,
    _: LoggedUser,
    Path(club_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> HttpResult<Json<Vec<EventResponse>>> {
    let tz = data.cal_sync.config.default_time_zone;
    let min_time = query.min_date.map_or_else(
        || OffsetDateTime::now_utc() - Duration::weeks(1),
        |d| tz.local_midnight(d),
    );
    let max_time = query.max_date.map_or_else(
        || OffsetDateTime::now_utc() + Duration::weeks(2),
        |d| tz.local_midnight(d),
    );
    let events = ClubEvent::get_by_club(club_id, min_time, max_time, &data.cal_sync.pool)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(events))
}

async fn agenda(
    State(data): State<AppState>,
    _: LoggedUser,
) -> HttpResult<Json<Vec<EventResponse>>> {
    let min_time = OffsetDateTime::now_utc() - Duration::days(1);
    let max_time = OffsetDateTime::now_utc() + Duration::weeks(2);
    let events = ClubEvent::get_agenda(min_time, max_time, &data.cal_sync.pool)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(events))
}

#[derive(Deserialize)]
struct CreateEventRequest {
    title: StackString,
    description: Option<StackString>,
    location: Option<StackString>,
    start_time: DateTimeType,
    end_time: DateTimeType,
}

async fn create_event(
    State(data): State<AppState>,
    _: LoggedUser,
    Path(club_id): Path<Uuid>,
    Json(payload): Json<CreateEventRequest>,
) -> HttpResult<(StatusCode, Json<EventResponse>)> {
    Club::get_by_id(club_id, &data.cal_sync.pool)
        .await?
        .ok_or(SyncError::ClubNotFound(club_id))?;
    let event = InsertClubEvent {
        id: StackString::from_display(Uuid::new_v4().simple()),
        club_id,
        title: payload.title,
        description: payload.description,
        location: payload.location,
        start_time: *payload.start_time,
        end_time: *payload.end_time,
        google: false,
        recurrence: None,
        recurrence_id: None,
        etag: None,
    };
    event.insert(&data.cal_sync.pool).await?;
    let created = ClubEvent::get_by_id(&event.id, &data.cal_sync.pool)
        .await?
        .ok_or_else(|| SyncError::EventNotFound(event.id.clone()))?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn delete_event(
    State(data): State<AppState>,
    _: LoggedUser,
    Path(event_id): Path<StackString>,
) -> HttpResult<StatusCode> {
    let event = ClubEvent::get_by_id(&event_id, &data.cal_sync.pool)
        .await?
        .ok_or_else(|| SyncError::EventNotFound(event_id.clone()))?;
    event.delete(&data.cal_sync.pool).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RegistrationRequest {
    user_id: Uuid,
}

async fn register(
    State(data): State<AppState>,
    _: LoggedUser,
    Path(event_id): Path<StackString>,
    Json(payload): Json<RegistrationRequest>,
) -> HttpResult<StatusCode> {
    ClubEvent::get_by_id(&event_id, &data.cal_sync.pool)
        .await?
        .ok_or_else(|| SyncError::EventNotFound(event_id.clone()))?;
    EventRegistration::register(&event_id, payload.user_id, &data.cal_sync.pool).await?;
    Ok(StatusCode::CREATED)
}

async fn unregister(
    State(data): State<AppState>,
    _: LoggedUser,
    Path(event_id): Path<StackString>,
    Json(payload): Json<RegistrationRequest>,
) -> HttpResult<StatusCode> {
    EventRegistration::unregister(&event_id, payload.user_id, &data.cal_sync.pool).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct EventSyncRequest {
    calendar_id: Option<StackString>,
    calendar_name: Option<StackString>,
    account_id: Option<Uuid>,
}

#[derive(Serialize)]
struct EventSyncResponse {
    status: StackString,
    channel_id: Option<StackString>,
    channel_expiration: Option<DateTimeType>,
}

/// Bind a calendar to the club, sync it, and subscribe to push updates.
/// `synced_without_webhook` means the one-time sync worked but recurring
/// updates are unavailable for this calendar.
async fn event_sync(
    State(data): State<AppState>,
    _: LoggedUser,
    Path(club_id): Path<Uuid>,
    Json(payload): Json<EventSyncRequest>,
) -> HttpResult<Json<EventSyncResponse>> {
    let outcome = data
        .cal_sync
        .event_sync(
            club_id,
            payload.calendar_id,
            payload.calendar_name,
            payload.account_id,
        )
        .await?;
    let response = match outcome {
        EventSyncOutcome::Synced {
            channel_id,
            expiration,
        } => EventSyncResponse {
            status: "synced".into(),
            channel_id: Some(channel_id),
            channel_expiration: Some(expiration.into()),
        },
        EventSyncOutcome::SyncedWithoutWebhook => EventSyncResponse {
            status: "synced_without_webhook".into(),
            channel_id: None,
            channel_expiration: None,
        },
    };
    Ok(Json(response))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Inbound push from the provider. Authenticated by the per-channel
/// verification token, not by a user session.
async fn calendar_webhook(
    State(data): State<AppState>,
    headers: HeaderMap,
) -> HttpResult<StatusCode> {
    let channel_id = header_str(&headers, "x-goog-channel-id")
        .ok_or_else(|| ServiceError::BadRequest("missing channel id header".into()))?;
    let token = header_str(&headers, "x-goog-channel-token").unwrap_or("");
    let resource_state = header_str(&headers, "x-goog-resource-state").unwrap_or("exists");
    match data
        .cal_sync
        .handle_webhook_notification(channel_id, token, resource_state)
        .await?
    {
        Some(report) => {
            info!(
                "webhook sync for channel {channel_id}: upserted {} deleted {} skipped {}",
                report.upserted, report.deleted, report.skipped
            );
        }
        None => info!("webhook handshake for channel {channel_id}"),
    }
    Ok(StatusCode::OK)
}

async fn stop_webhook_channel(
    State(data): State<AppState>,
    _: LoggedUser,
    Path(channel_id): Path<StackString>,
) -> HttpResult<StatusCode> {
    data.cal_sync.teardown_channel(&channel_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
