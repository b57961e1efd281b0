use log::debug;
use serde::{Deserialize, Serialize};
use stack_string::StackString;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::error::{classify_api_error, GcalError};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Safety margin so a token is refreshed before it actually lapses.
const EXPIRY_SLACK: Duration = Duration::minutes(1);

/// OAuth2 client for a single stored refresh credential. Access tokens are
/// minted on demand and cached until shortly before expiry.
pub struct GoogleAuth {
    client: reqwest::Client,
    client_id: StackString,
    client_secret: StackString,
    refresh_token: StackString,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: StackString,
    expires_at: OffsetDateTime,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: StackString,
    expires_in: i64,
}

impl GoogleAuth {
    pub fn new(
        client: reqwest::Client,
        client_id: StackString,
        client_secret: StackString,
        refresh_token: StackString,
    ) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            refresh_token,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid access token, exchanging the refresh credential if the
    /// cached one is missing or about to expire.
    pub async fn access_token(&self) -> Result<StackString, GcalError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > OffsetDateTime::now_utc() + EXPIRY_SLACK {
                return Ok(token.access_token.clone());
            }
        }
        debug!("refreshing google access token");
        let body = RefreshRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            refresh_token: &self.refresh_token,
            grant_type: "refresh_token",
        };
        let resp = self.client.post(TOKEN_URL).form(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(match classify_api_error(status.as_u16(), &text) {
                GcalError::Api { message, .. } => GcalError::Unauthorized(message),
                e => e,
            });
        }
        let refreshed: RefreshResponse = resp.json().await?;
        let access_token = refreshed.access_token.clone();
        cached.replace(CachedToken {
            access_token: refreshed.access_token,
            expires_at: OffsetDateTime::now_utc() + Duration::seconds(refreshed.expires_in),
        });
        Ok(access_token)
    }
}
