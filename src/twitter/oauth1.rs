//! OAuth 1.0a user context through egg-mode. This is the only backend the
//! likers endpoint accepts.

use crate::twitter::{retry_after_from_reset, ApiError, ApiRequest, TwitterClient, API_BASE};
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use egg_mode::error::Error;
use egg_mode::raw::{request_get, response_json, ParamList};
use egg_mode::{KeyPair, Token};
use std::future::Future;
use std::time::Duration;

// egg-mode's raw client has no deadline of its own
const TIMEOUT_SEC: u64 = 10;

pub struct UserContextClient {
    token: Token,
    base: String,
}

impl UserContextClient {
    pub fn new(
        consumer_key: &str,
        consumer_secret: &str,
        access_token: &str,
        access_token_secret: &str,
    ) -> Self {
        Self {
            token: Token::Access {
                consumer: KeyPair::new(consumer_key.to_string(), consumer_secret.to_string()),
                access: KeyPair::new(access_token.to_string(), access_token_secret.to_string()),
            },
            base: API_BASE.to_string(),
        }
    }
}

#[async_trait]
impl TwitterClient for UserContextClient {
    async fn get(&self, request: &ApiRequest) -> Result<serde_json::Value, ApiError> {
        let params = request
            .query
            .iter()
            .fold(ParamList::new(), |params, (key, value)| {
                params.add_param(*key, value.clone())
            });
        let url = format!("{}{}", self.base, request.path);
        let signed = request_get(&url, &self.token, Some(&params));
        let response = within_timeout(response_json::<serde_json::Value>(signed)).await?;
        Ok(response.response)
    }
}

/// A stalled request becomes a transient `Unknown` the collector retries once
async fn within_timeout<T>(
    request: impl Future<Output = Result<T, Error>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(Duration::from_secs(TIMEOUT_SEC), request).await {
        Ok(result) => result.map_err(map_error),
        Err(_) => Err(ApiError::Unknown(format!(
            "No response within {TIMEOUT_SEC}s"
        ))),
    }
}

/// Trades an API key pair for an app-only bearer token
pub async fn app_bearer_token(consumer_key: &str, consumer_secret: &str) -> anyhow::Result<String> {
    let consumer = KeyPair::new(consumer_key.to_string(), consumer_secret.to_string());
    let token = egg_mode::auth::bearer_token(&consumer)
        .await
        .context("Unable to obtain a bearer token for the API key")?;
    match token {
        Token::Bearer(token) => Ok(token),
        _ => bail!("Token exchange did not return a bearer token"),
    }
}

// https://developer.twitter.com/en/support/twitter-api/error-troubleshooting
fn classify_code(code: i32, message: String) -> ApiError {
    match code {
        32 | 89 | 135 | 215 => ApiError::Unauthorized(message),
        8 | 34 | 50 | 63 | 144 => ApiError::NotFound(message),
        88 => ApiError::RateLimited { retry_after: None },
        179 | 220 | 261 | 453 => ApiError::Forbidden(message),
        _ => ApiError::Unknown(format!("{code}: {message}")),
    }
}

fn map_error(error: Error) -> ApiError {
    match error {
        Error::RateLimit(reset) => ApiError::RateLimited {
            retry_after: Some(retry_after_from_reset(reset as i64, Utc::now())),
        },
        // BadStatus carries no headers, so a 429 here has no reset hint and the
        // caller falls back to waiting a full window
        Error::BadStatus(status) => ApiError::from_status(status.as_u16(), "", None),
        Error::TwitterError(headers, errors) => {
            let reset = headers
                .get("x-rate-limit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok());
            match errors.errors.into_iter().next() {
                Some(e) => match classify_code(e.code, e.message) {
                    ApiError::RateLimited { .. } => ApiError::RateLimited {
                        retry_after: reset.map(|r| retry_after_from_reset(r, Utc::now())),
                    },
                    other => other,
                },
                None => ApiError::Unknown("Empty error list".to_string()),
            }
        }
        other => ApiError::Unknown(other.to_string()),
    }
}
