use stack_string::StackString;
use thiserror::Error;
use uuid::Uuid;

use gcal_client::error::GcalError;

/// Failure taxonomy for the calendar service. The orchestration layer and
/// the HTTP surface both branch on these variants, so provider and
/// database failures are classified here rather than at the call sites.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("club {0} not found")]
    ClubNotFound(Uuid),
    #[error("event {0} not found")]
    EventNotFound(StackString),
    #[error("club has no calendar bound")]
    NoCalendar,
    #[error("calendar {0} is already linked to another club")]
    CalendarInUse(StackString),
    #[error("no usable refresh credential for the bound google account")]
    MissingCredential,
    #[error("calendar not found upstream")]
    CalendarNotFound,
    #[error("push notifications are not supported for this calendar")]
    WebhookUnsupported,
    #[error("sync token expired, full resync required")]
    ResyncRequired,
    #[error("webhook channel {0} not found")]
    ChannelNotFound(StackString),
    #[error("webhook channel token mismatch")]
    ChannelTokenMismatch,
    #[error("invalid input: {0}")]
    BadInput(StackString),
    #[error("database error: {0}")]
    Database(StackString),
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("pool setup error: {0}")]
    PoolSetup(StackString),
    #[error("migration error: {0}")]
    Migration(#[from] Box<refinery::Error>),
    #[error("google api error: {0}")]
    Provider(StackString),
}

/// Constraint violations and other driver-level failures surface the
/// underlying message, not a generic wrapper.
impl From<tokio_postgres::Error> for SyncError {
    fn from(item: tokio_postgres::Error) -> Self {
        if let Some(db_error) = item.as_db_error() {
            return Self::Database(db_error.message().into());
        }
        Self::Database(StackString::from_display(item))
    }
}

impl From<GcalError> for SyncError {
    fn from(item: GcalError) -> Self {
        match item {
            GcalError::ResyncRequired => Self::ResyncRequired,
            GcalError::NotFound => Self::CalendarNotFound,
            GcalError::PushNotSupported(_) => Self::WebhookUnsupported,
            e => Self::Provider(StackString::from_display(e)),
        }
    }
}

impl From<refinery::Error> for SyncError {
    fn from(item: refinery::Error) -> Self {
        Self::Migration(Box::new(item))
    }
}

#[cfg(test)]
mod tests {
    use gcal_client::error::GcalError;

    use crate::errors::SyncError;

    #[test]
    fn test_gcal_error_classification() {
        assert!(matches!(
            SyncError::from(GcalError::ResyncRequired),
            SyncError::ResyncRequired
        ));
        assert!(matches!(
            SyncError::from(GcalError::NotFound),
            SyncError::CalendarNotFound
        ));
        assert!(matches!(
            SyncError::from(GcalError::PushNotSupported("nope".into())),
            SyncError::WebhookUnsupported
        ));
        assert!(matches!(
            SyncError::from(GcalError::Api {
                status: 400,
                message: "bad".into()
            }),
            SyncError::Provider(_)
        ));
    }
}
