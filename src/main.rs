mod collector;
mod credentials;
mod export;
mod model;
mod observer;
mod orchestrator;
#[cfg(test)]
mod testing;
mod twitter;

use crate::collector::CollectorConfig;
use crate::credentials::{CredentialProvider, Credentials, EnvCredentials, FileCredentials};
use crate::export::{default_output_path, TableExporter, XlsxExporter};
use crate::model::{Subject, SubjectId};
use crate::observer::LogObserver;
use crate::orchestrator::{extract, ExtractOptions};
use crate::twitter::{get_me, get_tweet, ApiError, TwitterClient};
use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(version, about = "Export the likers, retweeters and repliers of a post to a spreadsheet")]
struct Args {
    /// Post id or permalink (https://x.com/<user>/status/<id>)
    subject: String,
    /// Path to a JSON credentials file (environment variables and .env are used otherwise)
    #[clap(short, long)]
    auth: Option<PathBuf>,
    /// Where to save the workbook (defaults to twitter_data_<id>_<timestamp>.xlsx)
    #[clap(short, long)]
    out: Option<PathBuf>,
    /// Do not collect likers
    #[clap(long)]
    skip_likes: bool,
    /// Do not collect retweeters
    #[clap(long)]
    skip_retweets: bool,
    /// Records requested per page (clamped to what each endpoint accepts)
    #[clap(long, default_value_t = 100)]
    page_size: u32,
    /// Requests allowed per rate limit window
    #[clap(long, default_value_t = 25)]
    window_capacity: u32,
    /// Length of the rate limit window in minutes
    #[clap(long, default_value_t = 15)]
    window_minutes: u64,
    /// Fixed seconds between requests (derived from the window when not set)
    #[clap(long)]
    request_spacing: Option<u64>,
    /// Times a rate-limited collection is resumed after waiting
    #[clap(long, default_value_t = 3)]
    rate_limit_resumes: u32,
    /// Stop collecting after this many seconds and export what was gathered
    #[clap(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = main2().await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn main2() -> anyhow::Result<()> {
    let args: Args = Args::parse();
    let subject_id = SubjectId::parse(&args.subject).context("Invalid post id or URL")?;
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            log::warn!("Unable to load .env file: {e}");
        }
    }

    let credentials = match &args.auth {
        Some(path) => FileCredentials { path: path.clone() }.credentials().await?,
        None => EnvCredentials.credentials().await?,
    };
    if let Some(warning) = credentials.capability_warning() {
        log::warn!("{warning}");
    }
    let client = twitter::connect(&credentials).await?;
    let checked = validate(client.as_ref(), &credentials, &subject_id).await?;
    let window_duration = window_duration(args.window_minutes)?;

    let options = ExtractOptions {
        skip_likes: args.skip_likes,
        skip_retweets: args.skip_retweets,
        collector: CollectorConfig {
            page_size: args.page_size,
            window_capacity: args.window_capacity,
            window_duration,
            request_spacing: args.request_spacing.map(Duration::from_secs),
            ..CollectorConfig::default()
        },
        rate_limit_resumes: args.rate_limit_resumes,
        viewer_id: checked.viewer_id,
    };

    let cancel = CancellationToken::new();
    let mut watchers = vec![tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, exporting what has been collected so far");
                cancel.cancel();
            }
        }
    })];
    if let Some(seconds) = args.timeout {
        let cancel = cancel.clone();
        watchers.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            log::warn!("Timed out after {seconds}s, exporting what has been collected so far");
            cancel.cancel();
        }));
    }

    let extraction = extract(
        client.as_ref(),
        subject_id,
        checked.subject,
        &options,
        &LogObserver,
        &cancel,
    )
    .await;
    watchers.iter().for_each(|w| w.abort());

    let out = args
        .out
        .unwrap_or_else(|| default_output_path(&extraction.subject_id, Utc::now()));
    XlsxExporter
        .export(&extraction, &out)
        .context("Unable to export interactions")?;

    for line in extraction.report() {
        log::info!("{line}");
    }
    for (kind, reason) in extraction.failures() {
        log::warn!("{kind} collection stopped early: {reason}");
    }
    log::info!(
        "Saved {} interactions to {}",
        extraction.all_interactions().count(),
        out.display()
    );
    Ok(())
}

fn window_duration(minutes: u64) -> anyhow::Result<Duration> {
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .context("--window-minutes is too large")
}

/// What startup validation learned along the way
#[derive(Debug, Default)]
struct Validated {
    /// The authenticated user, when the credentials have one
    viewer_id: Option<String>,
    /// The post, when it was already looked up
    subject: Option<Subject>,
}

/// Fails fast on credentials the API rejects outright
async fn validate(
    client: &dyn TwitterClient,
    credentials: &Credentials,
    subject_id: &SubjectId,
) -> anyhow::Result<Validated> {
    if credentials.is_user_context() {
        return match get_me(client).await {
            Ok(me) => {
                log::info!(
                    "Authenticated as @{}",
                    me.username.as_deref().unwrap_or(&me.id)
                );
                Ok(Validated {
                    viewer_id: Some(me.id),
                    subject: None,
                })
            }
            Err(ApiError::Unauthorized(e)) => bail!("Credentials were rejected: {e}"),
            Err(e) => {
                log::warn!("Unable to verify credentials, continuing: {e}");
                Ok(Validated::default())
            }
        };
    }
    match get_tweet(client, subject_id).await {
        Ok(subject) => Ok(Validated {
            viewer_id: None,
            subject: Some(subject),
        }),
        Err(ApiError::Unauthorized(e)) => bail!("Credentials were rejected: {e}"),
        Err(_) => Ok(Validated::default()),
    }
}
