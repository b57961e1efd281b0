use serde::Deserialize;
use stack_string::StackString;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GcalError {
    #[error("sync token expired, full resync required")]
    ResyncRequired,
    #[error("calendar resource not found")]
    NotFound,
    #[error("push notifications not supported: {0}")]
    PushNotSupported(StackString),
    #[error("authorization failed: {0}")]
    Unauthorized(StackString),
    #[error("google api error {status}: {message}")]
    Api { status: u16, message: StackString },
    #[error("http error {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url {0}")]
    Url(#[from] url::ParseError),
}

impl GcalError {
    /// Transient failures worth retrying: transport errors, rate limits,
    /// server-side errors. Everything typed is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_builder(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Error envelope returned by the Calendar API.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ApiErrorDetail {
    pub code: u16,
    pub message: StackString,
    pub errors: Vec<ApiErrorItem>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ApiErrorItem {
    pub reason: StackString,
    pub message: StackString,
}

impl ApiErrorBody {
    fn has_reason(&self, reason: &str) -> bool {
        self.error.errors.iter().any(|e| e.reason.as_str() == reason)
    }
}

/// Map a non-success Calendar API response to a typed error. The status
/// code decides most cases; the `reason` field disambiguates 400s.
pub fn classify_api_error(status: u16, body: &str) -> GcalError {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.error.message.is_empty() {
        body.into()
    } else {
        parsed.error.message.clone()
    };
    match status {
        410 => GcalError::ResyncRequired,
        404 => GcalError::NotFound,
        401 | 403 => GcalError::Unauthorized(message),
        400 if parsed.has_reason("pushNotSupportedForRequestedResource")
            || parsed.has_reason("pushWebhookUrlNotHttps") =>
        {
            GcalError::PushNotSupported(message)
        }
        _ => GcalError::Api { status, message },
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{classify_api_error, GcalError};

    #[test]
    fn test_classify_expired_sync_token() {
        let body = r#"{"error":{"code":410,"message":"Sync token is no longer valid, a full sync is required.","errors":[{"reason":"fullSyncRequired","message":"Sync token is no longer valid, a full sync is required."}]}}"#;
        assert!(matches!(
            classify_api_error(410, body),
            GcalError::ResyncRequired
        ));
    }

    #[test]
    fn test_classify_push_not_supported() {
        let body = r#"{"error":{"code":400,"message":"Push notifications are not supported by this resource.","errors":[{"reason":"pushNotSupportedForRequestedResource","message":"Push notifications are not supported by this resource."}]}}"#;
        match classify_api_error(400, body) {
            GcalError::PushNotSupported(msg) => {
                assert!(msg.contains("not supported"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_not_found() {
        assert!(matches!(
            classify_api_error(404, "Not Found"),
            GcalError::NotFound
        ));
    }

    #[test]
    fn test_classify_unparseable_body() {
        match classify_api_error(400, "no json here") {
            GcalError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message.as_str(), "no json here");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_retryable() {
        assert!(GcalError::Api {
            status: 503,
            message: "backend error".into()
        }
        .is_retryable());
        assert!(GcalError::Api {
            status: 429,
            message: "rate limit".into()
        }
        .is_retryable());
        assert!(!GcalError::NotFound.is_retryable());
        assert!(!GcalError::ResyncRequired.is_retryable());
    }
}
