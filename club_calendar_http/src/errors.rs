use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use serde::Serialize;
use stack_string::{format_sstr, StackString};
use std::net::AddrParseError;
use thiserror::Error;

use club_calendar_lib::errors::SyncError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("BadRequest: {0}")]
    BadRequest(StackString),
    #[error("NotFound: {0}")]
    NotFound(StackString),
    #[error("{0}")]
    Sync(#[from] SyncError),
    #[error("AddrParseError {0}")]
    AddrParseError(#[from] AddrParseError),
    #[error("io Error {0}")]
    IoError(#[from] std::io::Error),
    #[error("SerdeJsonError {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("Anyhow error {0}")]
    AnyhowError(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorMessage {
    message: StackString,
}

impl IntoResponse for ErrorMessage {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Map the sync taxonomy onto status codes: binding conflicts and token
/// mismatches are forbidden, missing records are 404, provider trouble is
/// the caller's bad request, storage trouble is ours.
fn sync_error_status(error: &SyncError) -> StatusCode {
    match error {
        SyncError::ClubNotFound(_)
        | SyncError::EventNotFound(_)
        | SyncError::CalendarNotFound
        | SyncError::ChannelNotFound(_) => StatusCode::NOT_FOUND,
        SyncError::CalendarInUse(_) | SyncError::ChannelTokenMismatch => StatusCode::FORBIDDEN,
        SyncError::NoCalendar
        | SyncError::MissingCredential
        | SyncError::WebhookUnsupported
        | SyncError::BadInput(_)
        | SyncError::Provider(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorMessage {
                    message: "Unauthorized".into(),
                },
            )
                .into_response(),
            Self::BadRequest(s) => {
                (StatusCode::BAD_REQUEST, ErrorMessage { message: s }).into_response()
            }
            Self::NotFound(s) => {
                (StatusCode::NOT_FOUND, ErrorMessage { message: s }).into_response()
            }
            Self::Sync(e) => {
                let status = sync_error_status(&e);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!("sync failure: {e}");
                }
                (
                    status,
                    ErrorMessage {
                        message: StackString::from_display(e),
                    },
                )
                    .into_response()
            }
            e => {
                error!("internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorMessage {
                        message: format_sstr!("Internal Server Error: {e}"),
                    },
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use club_calendar_lib::errors::SyncError;
    use uuid::Uuid;

    use crate::errors::ServiceError;

    #[test]
    fn test_sync_error_status_mapping() {
        let cases: Vec<(SyncError, StatusCode)> = vec![
            (SyncError::ClubNotFound(Uuid::new_v4()), StatusCode::NOT_FOUND),
            (SyncError::CalendarNotFound, StatusCode::NOT_FOUND),
            (
                SyncError::CalendarInUse("cal@group.calendar.google.com".into()),
                StatusCode::FORBIDDEN,
            ),
            (SyncError::ChannelTokenMismatch, StatusCode::FORBIDDEN),
            (SyncError::MissingCredential, StatusCode::BAD_REQUEST),
            (
                SyncError::Provider("backend error".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                SyncError::Database("constraint violated".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            let response = ServiceError::Sync(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_unauthorized_status() {
        let response = ServiceError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
