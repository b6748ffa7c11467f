//! Scripted client for exercising the collector without a network

use crate::twitter::{ApiError, ApiRequest, TwitterClient};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, ApiError>>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next request to `path`
    pub fn respond(&self, path: &str, body: Value) {
        self.push(path, Ok(body));
    }

    pub fn fail(&self, path: &str, error: ApiError) {
        self.push(path, Err(error));
    }

    fn push(&self, path: &str, response: Result<Value, ApiError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

#[async_trait]
impl TwitterClient for FakeClient {
    async fn get(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ApiError::Unknown(format!("no fixture for {}", request.path))))
    }
}

/// A users page (likers/retweeters) with ids `start..start + count`
pub fn users_page(start: usize, count: usize, next_token: Option<&str>) -> Value {
    let data: Vec<Value> = (start..start + count)
        .map(|i| json!({"id": i.to_string(), "username": format!("u{i}"), "name": format!("User {i}")}))
        .collect();
    let mut meta = json!({ "result_count": count });
    if let Some(token) = next_token {
        meta["next_token"] = json!(token);
    }
    json!({ "data": data, "meta": meta })
}

/// A search page of replies; each reply id maps to an author id of the same number
pub fn replies_page(ids: &[usize], next_token: Option<&str>) -> Value {
    let data: Vec<Value> = ids
        .iter()
        .map(|i| {
            json!({
                "id": format!("r{i}"),
                "author_id": i.to_string(),
                "text": format!("reply {i}"),
                "created_at": "2024-03-01T10:00:00.000Z"
            })
        })
        .collect();
    let users: Vec<Value> = ids
        .iter()
        .map(|i| json!({"id": i.to_string(), "username": format!("u{i}"), "name": format!("User {i}")}))
        .collect();
    let mut meta = json!({ "result_count": ids.len() });
    if let Some(token) = next_token {
        meta["next_token"] = json!(token);
    }
    json!({ "data": data, "includes": {"users": users}, "meta": meta })
}

pub fn tweet_body(id: &str, created_at: &str, likes: u64, retweets: u64, replies: u64) -> Value {
    json!({
        "data": {
            "id": id,
            "text": "subject",
            "author_id": "7",
            "created_at": created_at,
            "public_metrics": {
                "like_count": likes,
                "retweet_count": retweets,
                "reply_count": replies,
                "quote_count": 0
            }
        }
    })
}
