//! App-only access through a bearer token. Read-only, and the likers
//! endpoint refuses it.

use crate::twitter::{retry_after_from_reset, ApiError, ApiRequest, TwitterClient, API_BASE};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const TIMEOUT_SEC: u64 = 10;
const RATE_LIMIT_RESET: &str = "x-rate-limit-reset";

#[derive(Clone)]
pub struct BearerClient {
    client: Client,
    base: Url,
}

impl BearerClient {
    pub fn new(bearer_token: &str) -> anyhow::Result<Self> {
        Self::with_base(bearer_token, API_BASE)
    }

    pub fn with_base(bearer_token: &str, base: &str) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", bearer_token);
        let value = HeaderValue::from_str(&value)?;
        headers.insert(AUTHORIZATION, value);
        Ok(Self {
            client: Client::builder()
                .default_headers(headers)
                .timeout(Duration::from_secs(TIMEOUT_SEC))
                .build()?,
            base: Url::from_str(base)?,
        })
    }
}

async fn deserialize_response(response: Response) -> Result<serde_json::Value, ApiError> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RATE_LIMIT_RESET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .map(|reset| retry_after_from_reset(reset, Utc::now()));
    let text = response
        .text()
        .await
        .map_err(|e| ApiError::Unknown(format!("Bad response text: {e}")))?;
    if !status.is_success() {
        return Err(ApiError::from_status(status.as_u16(), &text, retry_after));
    }
    serde_json::from_str(&text).map_err(|_| ApiError::Unknown("Invalid JSON".to_string()))
}

#[async_trait]
impl TwitterClient for BearerClient {
    async fn get(&self, request: &ApiRequest) -> Result<serde_json::Value, ApiError> {
        let url = self
            .base
            .join(&request.path)
            .map_err(|e| ApiError::Unknown(format!("Bad endpoint path {}: {e}", request.path)))?;
        let response = self
            .client
            .get(url)
            .query(&request.query)
            .send()
            .await
            .map_err(|e| ApiError::Unknown(format!("Error performing HTTP request: {e}")))?;
        deserialize_response(response).await
    }
}
