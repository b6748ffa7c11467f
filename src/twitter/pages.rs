//! Per-endpoint page shapes. Each interaction kind is served by a different
//! endpoint with its own cursor name and payload layout; these types hide
//! that behind a uniform [`Page`].

use crate::model::{InteractionKind, InteractionRecord, PageToken, ReplyDetails, SubjectId};
use crate::twitter::ApiRequest;
use chrono::{DateTime, Utc};
use maplit::btreemap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

const USER_FIELDS: &str = "username,name,created_at";

/// What the collector asks for on one iteration
#[derive(Debug)]
pub struct PageRequest {
    pub token: Option<PageToken>,
    pub page_size: u32,
    /// Ask for user field expansions
    pub expanded: bool,
}

#[derive(Debug, Default)]
pub struct Page {
    pub records: Vec<InteractionRecord>,
    pub next_token: Option<PageToken>,
    /// `meta.result_count` if the API sent one, else the raw entry count
    pub reported_count: usize,
}

pub trait PageResponse: DeserializeOwned {
    const KIND: InteractionKind;

    /// Page size the endpoint will actually honour
    fn effective_page_size(requested: u32) -> u32 {
        requested.clamp(1, 100)
    }

    fn request(subject: &SubjectId, page: PageRequest) -> ApiRequest;

    fn into_page(self) -> Page;
}

#[derive(Deserialize, Default, Debug)]
struct Meta {
    result_count: Option<usize>,
    next_token: Option<String>,
}

impl Meta {
    fn next_token(&mut self) -> Option<PageToken> {
        self.next_token
            .take()
            .filter(|t| !t.is_empty())
            .map(PageToken::new)
    }
}

#[derive(Deserialize, Debug)]
struct UserEntry {
    id: Option<String>,
    username: Option<String>,
    name: Option<String>,
}

impl UserEntry {
    /// Username and display name, with placeholders when fields were not expanded
    fn names(&self, id: &str) -> (String, String) {
        let username = self
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| placeholder_username(id));
        let name = self.name.clone().unwrap_or_else(|| "Unknown".to_string());
        (username, name)
    }
}

fn placeholder_username(id: &str) -> String {
    format!("user_{id}")
}

#[derive(Deserialize, Default, Debug)]
struct UsersBody {
    #[serde(default)]
    data: Option<Vec<UserEntry>>,
    #[serde(default)]
    meta: Meta,
}

impl UsersBody {
    fn into_page(mut self, kind: InteractionKind) -> Page {
        let entries = self.data.take().unwrap_or_default();
        let reported_count = self.meta.result_count.unwrap_or(entries.len());
        let records = entries
            .into_iter()
            .filter_map(|user| {
                let Some(id) = user.id.clone() else {
                    log::debug!("Dropping {kind} entry without a user id");
                    return None;
                };
                let (username, name) = user.names(&id);
                Some(InteractionRecord::user(kind, id, username, name))
            })
            .collect();
        Page {
            records,
            next_token: self.meta.next_token(),
            reported_count,
        }
    }
}

fn users_request(endpoint: &str, subject: &SubjectId, page: PageRequest, page_size: u32) -> ApiRequest {
    let mut query = btreemap! {
        "max_results" => page_size.to_string(),
    };
    if page.expanded {
        query.insert("user.fields", USER_FIELDS.to_string());
    }
    if let Some(token) = page.token {
        query.insert("pagination_token", token.into_inner());
    }
    ApiRequest::with_query(format!("/2/tweets/{subject}/{endpoint}"), query)
}

// https://developer.twitter.com/en/docs/twitter-api/tweets/likes/api-reference/get-tweets-id-liking_users
#[derive(Deserialize, Debug)]
#[serde(transparent)]
pub struct LikingUsers(UsersBody);

impl PageResponse for LikingUsers {
    const KIND: InteractionKind = InteractionKind::Like;

    fn request(subject: &SubjectId, page: PageRequest) -> ApiRequest {
        let size = Self::effective_page_size(page.page_size);
        users_request("liking_users", subject, page, size)
    }

    fn into_page(self) -> Page {
        self.0.into_page(Self::KIND)
    }
}

// https://developer.twitter.com/en/docs/twitter-api/tweets/retweets/api-reference/get-tweets-id-retweeted_by
#[derive(Deserialize, Debug)]
#[serde(transparent)]
pub struct RetweetedBy(UsersBody);

impl PageResponse for RetweetedBy {
    const KIND: InteractionKind = InteractionKind::Retweet;

    fn request(subject: &SubjectId, page: PageRequest) -> ApiRequest {
        let size = Self::effective_page_size(page.page_size);
        users_request("retweeted_by", subject, page, size)
    }

    fn into_page(self) -> Page {
        self.0.into_page(Self::KIND)
    }
}

#[derive(Deserialize, Debug)]
struct ReplyEntry {
    id: Option<String>,
    author_id: Option<String>,
    #[serde(default)]
    text: String,
    created_at: Option<String>,
}

#[derive(Deserialize, Default, Debug)]
struct Includes {
    #[serde(default)]
    users: Vec<UserEntry>,
}

/// Replies come from recent search, addressed by `in_reply_to_tweet_id`.
// https://developer.twitter.com/en/docs/twitter-api/tweets/search/api-reference/get-tweets-search-recent
#[derive(Deserialize, Debug)]
pub struct ReplySearch {
    #[serde(default)]
    data: Option<Vec<ReplyEntry>>,
    #[serde(default)]
    includes: Option<Includes>,
    #[serde(default)]
    meta: Meta,
}

impl PageResponse for ReplySearch {
    const KIND: InteractionKind = InteractionKind::Reply;

    fn effective_page_size(requested: u32) -> u32 {
        requested.clamp(10, 100)
    }

    fn request(subject: &SubjectId, page: PageRequest) -> ApiRequest {
        let mut query = btreemap! {
            "query" => format!("in_reply_to_tweet_id:{subject}"),
            "max_results" => Self::effective_page_size(page.page_size).to_string(),
            "tweet.fields" => "author_id,created_at,text".to_string(),
        };
        if page.expanded {
            query.insert("expansions", "author_id".to_string());
            query.insert("user.fields", "username,name".to_string());
        }
        if let Some(token) = page.token {
            query.insert("next_token", token.into_inner());
        }
        ApiRequest::with_query("/2/tweets/search/recent", query)
    }

    fn into_page(mut self) -> Page {
        let entries = self.data.take().unwrap_or_default();
        let reported_count = self.meta.result_count.unwrap_or(entries.len());
        let authors: HashMap<String, UserEntry> = self
            .includes
            .take()
            .unwrap_or_default()
            .users
            .into_iter()
            .filter_map(|u| u.id.clone().map(|id| (id, u)))
            .collect();
        let records = entries
            .into_iter()
            .filter_map(|reply| {
                let (Some(source_id), Some(author_id)) = (reply.id, reply.author_id) else {
                    log::debug!("Dropping reply without an id or author");
                    return None;
                };
                let (username, name) = match authors.get(&author_id) {
                    Some(author) => author.names(&author_id),
                    None => (placeholder_username(&author_id), "Unknown".to_string()),
                };
                let created_at = reply
                    .created_at
                    .and_then(|c| DateTime::parse_from_rfc3339(&c).ok())
                    .map(|c| c.with_timezone(&Utc));
                Some(InteractionRecord::reply(
                    author_id,
                    username,
                    name,
                    ReplyDetails {
                        text: reply.text,
                        source_id,
                        created_at,
                    },
                ))
            })
            .collect();
        Page {
            records,
            next_token: self.meta.next_token(),
            reported_count,
        }
    }
}
