pub mod bearer;
pub mod oauth1;
pub mod pages;

use crate::credentials::Credentials;
use crate::model::{PublicMetrics, Subject, SubjectId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const API_BASE: &str = "https://api.twitter.com";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("{0}")]
    Unknown(String),
}

impl ApiError {
    /// Maps an unsuccessful HTTP status onto the error taxonomy
    pub fn from_status(code: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let body = body.trim().to_string();
        match code {
            401 => ApiError::Unauthorized(body),
            403 => ApiError::Forbidden(body),
            404 => ApiError::NotFound(body),
            429 => ApiError::RateLimited { retry_after },
            _ => ApiError::Unknown(format!("Response was not successful: {code}\n{body}")),
        }
    }
}

/// Seconds until the epoch timestamp carried by `x-rate-limit-reset`
pub fn retry_after_from_reset(reset_epoch: i64, now: DateTime<Utc>) -> Duration {
    Duration::from_secs((reset_epoch - now.timestamp()).max(0) as u64)
}

/// A single GET against a v2 endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub path: String,
    pub query: BTreeMap<&'static str, String>,
}

impl ApiRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: BTreeMap::new(),
        }
    }

    pub fn with_query(path: impl Into<String>, query: BTreeMap<&'static str, String>) -> Self {
        Self {
            path: path.into(),
            query,
        }
    }

    pub fn param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.insert(key, value.into());
        self
    }

    #[cfg(test)]
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

#[async_trait]
pub trait TwitterClient: Send + Sync {
    /// Sends one signed request and returns the decoded JSON body
    async fn get(&self, request: &ApiRequest) -> Result<serde_json::Value, ApiError>;
}

/// Builds the backend matching the shape of the credentials
pub async fn connect(credentials: &Credentials) -> anyhow::Result<Box<dyn TwitterClient>> {
    Ok(match credentials {
        Credentials::UserContext {
            consumer_key,
            consumer_secret,
            access_token,
            access_token_secret,
        } => {
            log::info!("Using OAuth 1.0a user context authentication");
            Box::new(oauth1::UserContextClient::new(
                consumer_key,
                consumer_secret,
                access_token,
                access_token_secret,
            ))
        }
        Credentials::Bearer { bearer_token } => {
            log::info!("Using bearer token (app-only) authentication");
            Box::new(bearer::BearerClient::new(bearer_token)?)
        }
        Credentials::App {
            consumer_key,
            consumer_secret,
        } => {
            log::info!("Exchanging API key and secret for an app-only bearer token");
            let token = oauth1::app_bearer_token(consumer_key, consumer_secret).await?;
            Box::new(bearer::BearerClient::new(&token)?)
        }
    })
}

// The API can answer 200 with a body that only carries problems
#[derive(Deserialize)]
struct ErrorBody {
    errors: Vec<Problem>,
}

#[derive(Deserialize, Debug)]
struct Problem {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl Problem {
    fn into_error(self) -> ApiError {
        let message = self
            .detail
            .or(self.title)
            .unwrap_or_else(|| self.kind.clone());
        if self.kind.ends_with("resource-not-found") {
            ApiError::NotFound(message)
        } else if self.kind.ends_with("not-authorized-for-resource") {
            ApiError::Forbidden(message)
        } else {
            ApiError::Unknown(message)
        }
    }
}

/// Decodes a body into `T`. A body without `data` but with `errors` is
/// classified instead; partial errors next to `data` are ignored.
pub fn decode<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, ApiError> {
    if body.get("data").is_none() {
        if let Ok(ErrorBody { errors }) = serde_json::from_value::<ErrorBody>(body.clone()) {
            if let Some(problem) = errors.into_iter().next() {
                return Err(problem.into_error());
            }
        }
    }
    serde_json::from_value::<T>(body)
        .map_err(|e| ApiError::Unknown(format!("Unable to deserialize due to: {e}")))
}

#[derive(Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
    author_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    public_metrics: Option<PublicMetrics>,
}

// https://developer.twitter.com/en/docs/twitter-api/tweets/lookup/api-reference/get-tweets-id
pub async fn get_tweet(client: &dyn TwitterClient, id: &SubjectId) -> Result<Subject, ApiError> {
    let request = ApiRequest::new(format!("/2/tweets/{id}"))
        .param("tweet.fields", "public_metrics,created_at,author_id");
    let response = decode::<TweetResponse>(client.get(&request).await?)?;
    Ok(Subject {
        id: response.data.id,
        author_id: response.data.author_id,
        created_at: response.data.created_at,
        metrics: response.data.public_metrics,
    })
}

#[derive(Deserialize)]
struct MeResponse {
    data: MeData,
}

#[derive(Deserialize)]
pub struct MeData {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

pub async fn get_me(client: &dyn TwitterClient) -> Result<MeData, ApiError> {
    let request = ApiRequest::new("/2/users/me");
    Ok(decode::<MeResponse>(client.get(&request).await?)?.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClient;
    use serde_json::json;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert_eq!(
            ApiError::from_status(401, "no", None),
            ApiError::Unauthorized("no".into())
        );
        assert!(matches!(
            ApiError::from_status(403, "", None),
            ApiError::Forbidden(_)
        ));
        assert!(matches!(
            ApiError::from_status(404, "", None),
            ApiError::NotFound(_)
        ));
        assert_eq!(
            ApiError::from_status(429, "", Some(Duration::from_secs(5))),
            ApiError::RateLimited {
                retry_after: Some(Duration::from_secs(5))
            }
        );
        assert!(matches!(
            ApiError::from_status(503, "", None),
            ApiError::Unknown(_)
        ));
    }

    #[test]
    fn retry_after_never_negative() {
        let now = Utc::now();
        assert_eq!(
            retry_after_from_reset(now.timestamp() + 30, now),
            Duration::from_secs(30)
        );
        assert_eq!(retry_after_from_reset(0, now), Duration::ZERO);
    }

    #[tokio::test]
    async fn get_tweet_reads_metrics() {
        let client = FakeClient::new();
        client.respond(
            "/2/tweets/42",
            json!({
                "data": {
                    "id": "42",
                    "text": "hello",
                    "author_id": "7",
                    "created_at": "2024-03-01T10:00:00.000Z",
                    "public_metrics": {"like_count": 5, "retweet_count": 2, "reply_count": 1, "quote_count": 0}
                }
            }),
        );
        let subject = get_tweet(&client, &SubjectId::parse("42").unwrap())
            .await
            .unwrap();
        assert_eq!(subject.author_id.as_deref(), Some("7"));
        assert_eq!(subject.metrics.unwrap().like_count, 5);
        assert!(subject.created_at.is_some());
    }

    #[tokio::test]
    async fn error_only_body_is_classified() {
        let client = FakeClient::new();
        client.respond(
            "/2/tweets/42",
            json!({
                "errors": [{
                    "value": "42",
                    "detail": "Could not find tweet with id: [42].",
                    "title": "Not Found Error",
                    "type": "https://api.twitter.com/2/problems/resource-not-found"
                }]
            }),
        );
        let err = get_tweet(&client, &SubjectId::parse("42").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn data_with_partial_errors_still_decodes() {
        let body = json!({
            "data": {"id": "1"},
            "errors": [{"type": "https://api.twitter.com/2/problems/not-authorized-for-resource"}]
        });
        let me = decode::<MeResponse>(body).unwrap();
        assert_eq!(me.data.id, "1");
    }
}
