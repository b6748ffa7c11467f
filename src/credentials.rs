use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use tokio::fs;

pub const BEARER_TOKEN: &str = "TWITTER_BEARER_TOKEN";
pub const API_KEY: &str = "TWITTER_API_KEY";
pub const API_SECRET: &str = "TWITTER_API_SECRET";
pub const ACCESS_TOKEN: &str = "TWITTER_ACCESS_TOKEN";
pub const ACCESS_TOKEN_SECRET: &str = "TWITTER_ACCESS_TOKEN_SECRET";

/// The three credential shapes the API accepts, strongest first
#[derive(Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Credentials {
    /// OAuth 1.0a user context; the only shape that can read likers
    UserContext {
        #[serde(alias = "api_key")]
        consumer_key: String,
        #[serde(alias = "api_secret")]
        consumer_secret: String,
        access_token: String,
        access_token_secret: String,
    },
    Bearer {
        bearer_token: String,
    },
    App {
        #[serde(alias = "api_key")]
        consumer_key: String,
        #[serde(alias = "api_secret")]
        consumer_secret: String,
    },
}

// Keeps secrets out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Credentials::UserContext { .. } => "Credentials::UserContext",
            Credentials::Bearer { .. } => "Credentials::Bearer",
            Credentials::App { .. } => "Credentials::App",
        })
    }
}

impl Credentials {
    pub fn is_user_context(&self) -> bool {
        matches!(self, Credentials::UserContext { .. })
    }

    /// What these credentials cannot do, reported once at startup
    pub fn capability_warning(&self) -> Option<&'static str> {
        match self {
            Credentials::UserContext { .. } => None,
            Credentials::Bearer { .. } => Some(
                "A bearer token is app-only and cannot read likers; provide API key, API secret, \
                 access token and access token secret for full coverage",
            ),
            Credentials::App { .. } => Some(
                "API key and secret alone give app-only access, which cannot read likers; add the \
                 access token and access token secret for full coverage",
            ),
        }
    }

    /// Picks the strongest complete shape out of individually named values
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let key = get(API_KEY);
        let secret = get(API_SECRET);
        match (key, secret, get(ACCESS_TOKEN), get(ACCESS_TOKEN_SECRET), get(BEARER_TOKEN)) {
            (Some(consumer_key), Some(consumer_secret), Some(access_token), Some(access_token_secret), _) => {
                Some(Credentials::UserContext {
                    consumer_key,
                    consumer_secret,
                    access_token,
                    access_token_secret,
                })
            }
            (_, _, _, _, Some(bearer_token)) => Some(Credentials::Bearer { bearer_token }),
            (Some(consumer_key), Some(consumer_secret), _, _, None) => Some(Credentials::App {
                consumer_key,
                consumer_secret,
            }),
            _ => None,
        }
    }
}

#[async_trait]
pub trait CredentialProvider {
    async fn credentials(&self) -> anyhow::Result<Credentials>;
}

/// JSON auth file, e.g. `{"bearer_token": "..."}`
pub struct FileCredentials {
    pub path: PathBuf,
}

#[async_trait]
impl CredentialProvider for FileCredentials {
    async fn credentials(&self) -> anyhow::Result<Credentials> {
        let auth = fs::read_to_string(&self.path)
            .await
            .context("Unable to read auth file")?;
        serde_json::from_str::<Credentials>(&auth).context("Unable to deserialize auth file")
    }
}

/// Process environment, after any `.env` file has been loaded into it
pub struct EnvCredentials;

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn credentials(&self) -> anyhow::Result<Credentials> {
        match Credentials::from_vars(|key| std::env::var(key).ok()) {
            Some(credentials) => Ok(credentials),
            None => bail!(
                "No credentials found. Set {BEARER_TOKEN}, or {API_KEY} and {API_SECRET} \
                 (plus {ACCESS_TOKEN} and {ACCESS_TOKEN_SECRET} to read likers), \
                 in the environment or a .env file, or pass --auth"
            ),
        }
    }
}
