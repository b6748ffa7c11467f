use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    Like,
    Retweet,
    Reply,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 3] = [Self::Like, Self::Retweet, Self::Reply];

    pub fn sheet_name(self) -> &'static str {
        match self {
            Self::Like => "Likes",
            Self::Retweet => "Retweets",
            Self::Reply => "Replies",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Like => "Like",
            Self::Retweet => "Retweet",
            Self::Reply => "Reply",
        })
    }
}

/// Bare id of the post whose interactions are collected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectId(String);

impl SubjectId {
    /// Accepts either a bare id or a permalink such as
    /// `https://x.com/someone/status/123?s=20`.
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let input = input.trim();
        let id = match input.rsplit_once("/status/") {
            Some((_, rest)) => rest
                .split(['/', '?', '#'])
                .next()
                .context("Permalink has no id after /status/")?,
            None => input,
        };
        if id.is_empty() {
            bail!("Post id is empty");
        }
        if !id.chars().all(|c| c.is_ascii_digit()) {
            bail!("Post id must be numeric, got: {id}");
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque pagination cursor. Moved into the request that consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken(String);

impl PageToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReplyDetails {
    pub text: String,
    pub source_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InteractionRecord {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub kind: InteractionKind,
    reply: Option<ReplyDetails>,
}

impl InteractionRecord {
    /// A liker or retweeter. Reply-only fields stay empty.
    pub fn user(kind: InteractionKind, user_id: String, username: String, display_name: String) -> Self {
        debug_assert!(kind != InteractionKind::Reply, "replies carry reply details");
        Self {
            user_id,
            username,
            display_name,
            kind,
            reply: None,
        }
    }

    pub fn reply(user_id: String, username: String, display_name: String, details: ReplyDetails) -> Self {
        Self {
            user_id,
            username,
            display_name,
            kind: InteractionKind::Reply,
            reply: Some(details),
        }
    }

    pub fn reply_details(&self) -> Option<&ReplyDetails> {
        self.reply.as_ref()
    }

    /// Identity used for de-duplication within one kind
    pub fn record_id(&self) -> &str {
        match &self.reply {
            Some(reply) => &reply.source_id,
            None => &self.user_id,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublicMetrics {
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
}

/// Metadata of the post being inspected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub author_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub metrics: Option<PublicMetrics>,
}

impl Subject {
    pub fn expected_count(&self, kind: InteractionKind) -> Option<u64> {
        self.metrics.map(|m| match kind {
            InteractionKind::Like => m.like_count,
            InteractionKind::Retweet => m.retweet_count,
            InteractionKind::Reply => m.reply_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncationReason {
    RateLimited,
    Unauthorized,
    Forbidden,
    NotFound,
    /// Older replies are outside what recent search can reach
    SearchHorizonExceeded,
    Cancelled,
    Unknown(String),
}

impl fmt::Display for TruncationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => f.write_str("rate limited"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::Forbidden => f.write_str("forbidden"),
            Self::NotFound => f.write_str("not found"),
            Self::SearchHorizonExceeded => f.write_str("search horizon exceeded"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Unknown(e) => write!(f, "error: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSummary {
    pub kind: InteractionKind,
    pub observed_count: usize,
    pub expected_count: Option<u64>,
    pub truncation: Option<TruncationReason>,
    pub requests_made: u32,
    /// Best-effort reason for a shortfall, informational only
    pub explanation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CollectionResult {
    pub records: Vec<InteractionRecord>,
    pub summary: CollectionSummary,
}
