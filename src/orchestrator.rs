//! Runs the three collections for one post in sequence and merges them.

use crate::collector::{sleep_or_cancel, CollectContext, Collector, CollectorConfig, Progress};
use crate::model::{
    CollectionResult, InteractionKind, InteractionRecord, Subject, SubjectId, TruncationReason,
};
use crate::observer::{CollectEvent, CollectObserver};
use crate::twitter::pages::{LikingUsers, PageResponse, ReplySearch, RetweetedBy};
use crate::twitter::{get_tweet, TwitterClient};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub skip_likes: bool,
    pub skip_retweets: bool,
    pub collector: CollectorConfig,
    /// How many times a rate-limited kind is resumed after waiting
    pub rate_limit_resumes: u32,
    /// Id of the authenticated user, used to tell whether the post is theirs
    pub viewer_id: Option<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            skip_likes: false,
            skip_retweets: false,
            collector: CollectorConfig::default(),
            rate_limit_resumes: 3,
            viewer_id: None,
        }
    }
}

/// Outcome of one extraction. Skipped kinds are `None`.
#[derive(Debug)]
pub struct Extraction {
    pub subject_id: SubjectId,
    pub subject: Option<Subject>,
    pub likes: Option<CollectionResult>,
    pub retweets: Option<CollectionResult>,
    pub replies: CollectionResult,
}

impl Extraction {
    pub fn result(&self, kind: InteractionKind) -> Option<&CollectionResult> {
        match kind {
            InteractionKind::Like => self.likes.as_ref(),
            InteractionKind::Retweet => self.retweets.as_ref(),
            InteractionKind::Reply => Some(&self.replies),
        }
    }

    pub fn records(&self, kind: InteractionKind) -> &[InteractionRecord] {
        self.result(kind)
            .map(|r| r.records.as_slice())
            .unwrap_or_default()
    }

    /// Likes, then retweets, then replies, each in arrival order.
    /// A user may show up once per kind.
    pub fn all_interactions(&self) -> impl Iterator<Item = &InteractionRecord> {
        InteractionKind::ALL
            .into_iter()
            .flat_map(move |kind| self.records(kind).iter())
    }

    /// Kinds that stopped on an error rather than running out of pages
    pub fn failures(&self) -> Vec<(InteractionKind, &TruncationReason)> {
        InteractionKind::ALL
            .into_iter()
            .filter_map(|kind| self.result(kind))
            .filter_map(|r| match &r.summary.truncation {
                Some(TruncationReason::SearchHorizonExceeded) | None => None,
                Some(reason) => Some((r.summary.kind, reason)),
            })
            .collect()
    }

    /// One line per kind: observed against expected, and why it stopped short
    pub fn report(&self) -> Vec<String> {
        InteractionKind::ALL
            .into_iter()
            .map(|kind| match self.result(kind) {
                None => format!("{:<9} skipped", kind.sheet_name()),
                Some(result) => {
                    let summary = &result.summary;
                    let mut line = format!("{:<9} {}", kind.sheet_name(), summary.observed_count);
                    if let Some(expected) = summary.expected_count {
                        line.push_str(&format!(" of {expected} expected"));
                    }
                    if let Some(reason) = &summary.truncation {
                        line.push_str(&format!(" ({reason})"));
                    }
                    line
                }
            })
            .collect()
    }
}

/// Collects every interaction kind for one post. `known_subject` skips the
/// metadata lookup when the caller already fetched it.
pub async fn extract(
    client: &dyn TwitterClient,
    subject_id: SubjectId,
    known_subject: Option<Subject>,
    options: &ExtractOptions,
    observer: &dyn CollectObserver,
    cancel: &CancellationToken,
) -> Extraction {
    log::warn!(
        "Collection paces itself to the request window and may wait a long time on rate limits; \
         set a timeout or press Ctrl-C to stop early and keep what was collected"
    );
    let lookup = match known_subject {
        Some(subject) => Ok(subject),
        None => get_tweet(client, &subject_id).await,
    };
    let subject = match lookup {
        Ok(subject) => {
            if let Some(metrics) = subject.metrics {
                log::info!(
                    "Post {} has {} likes, {} retweets, {} replies",
                    subject.id,
                    metrics.like_count,
                    metrics.retweet_count,
                    metrics.reply_count
                );
            }
            Some(subject)
        }
        Err(e) => {
            log::warn!("Unable to look up post {subject_id}, continuing without its metrics: {e}");
            None
        }
    };
    let own_post = match (&subject, &options.viewer_id) {
        (Some(Subject { author_id: Some(author), .. }), Some(viewer)) => Some(author == viewer),
        _ => None,
    };
    match own_post {
        Some(true) => log::info!("This is your own post, every endpoint should return data"),
        Some(false) => log::info!(
            "This is another account's post, likers may be hidden by protected accounts"
        ),
        None => {}
    }

    let ctx = CollectContext {
        client,
        subject_id: &subject_id,
        subject: subject.as_ref(),
        own_post,
        config: &options.collector,
        observer,
        cancel,
    };

    let likes = if options.skip_likes {
        observer.on_event(&CollectEvent::KindSkipped {
            kind: InteractionKind::Like,
        });
        None
    } else {
        Some(run_kind::<LikingUsers>(ctx, options).await)
    };
    let retweets = if options.skip_retweets {
        observer.on_event(&CollectEvent::KindSkipped {
            kind: InteractionKind::Retweet,
        });
        None
    } else {
        Some(run_kind::<RetweetedBy>(ctx, options).await)
    };
    let replies = run_kind::<ReplySearch>(ctx, options).await;

    Extraction {
        subject_id,
        subject,
        likes,
        retweets,
        replies,
    }
}

/// Runs one collector, waiting out and resuming after rate limits
async fn run_kind<R: PageResponse>(
    ctx: CollectContext<'_>,
    options: &ExtractOptions,
) -> CollectionResult {
    let mut collector = Collector::<R>::new(ctx);
    if options.rate_limit_resumes == 0 {
        return collector.collect().await;
    }
    let mut resumes = 0;
    while let Progress::RateLimited { retry_after } = collector.run().await {
        if ctx.cancel.is_cancelled() {
            collector.mark_cancelled();
            break;
        }
        if resumes >= options.rate_limit_resumes {
            break;
        }
        resumes += 1;
        let wait = retry_after.unwrap_or(options.collector.window_duration);
        ctx.observer.on_event(&CollectEvent::RateLimitBackoff {
            kind: collector.kind(),
            wait,
            attempt: resumes,
        });
        if !sleep_or_cancel(wait, ctx.cancel).await {
            collector.mark_cancelled();
            break;
        }
    }
    collector.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::recording::RecordingObserver;
    use crate::testing::{replies_page, tweet_body, users_page, FakeClient};
    use crate::model::PublicMetrics;
    use crate::twitter::ApiError;
    use chrono::{SecondsFormat, Utc};
    use std::time::Duration;

    const TWEET: &str = "/2/tweets/42";
    const LIKERS: &str = "/2/tweets/42/liking_users";
    const RETWEETERS: &str = "/2/tweets/42/retweeted_by";
    const SEARCH: &str = "/2/tweets/search/recent";

    fn recent() -> String {
        (Utc::now() - chrono::Duration::days(1)).to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    async fn run(client: &FakeClient, options: &ExtractOptions) -> (Extraction, RecordingObserver) {
        let observer = RecordingObserver::default();
        let extraction = extract(
            client,
            SubjectId::parse("42").unwrap(),
            None,
            options,
            &observer,
            &CancellationToken::new(),
        )
        .await;
        (extraction, observer)
    }

    #[tokio::test(start_paused = true)]
    async fn merges_kinds_in_order_without_cross_kind_dedup() {
        let client = FakeClient::new();
        client.respond(TWEET, tweet_body("42", &recent(), 2, 1, 1));
        client.respond(LIKERS, users_page(1, 2, None));
        client.respond(RETWEETERS, users_page(1, 1, None));
        client.respond(SEARCH, replies_page(&[1], None));

        let (extraction, _) = run(&client, &ExtractOptions::default()).await;

        let all: Vec<_> = extraction
            .all_interactions()
            .map(|r| (r.user_id.as_str(), r.kind))
            .collect();
        assert_eq!(
            all,
            vec![
                ("1", InteractionKind::Like),
                ("2", InteractionKind::Like),
                ("1", InteractionKind::Retweet),
                ("1", InteractionKind::Reply),
            ]
        );
        assert!(extraction.failures().is_empty());
        assert_eq!(
            extraction.likes.as_ref().unwrap().summary.expected_count,
            Some(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_kinds_issue_no_requests() {
        let client = FakeClient::new();
        client.respond(TWEET, tweet_body("42", &recent(), 9, 9, 1));
        client.respond(SEARCH, replies_page(&[3], None));
        let options = ExtractOptions {
            skip_likes: true,
            skip_retweets: true,
            ..ExtractOptions::default()
        };

        let (extraction, observer) = run(&client, &options).await;

        assert!(extraction.likes.is_none());
        assert!(extraction.retweets.is_none());
        assert_eq!(extraction.replies.records.len(), 1);
        assert!(client.requests_to(LIKERS).is_empty());
        assert!(client.requests_to(RETWEETERS).is_empty());
        assert_eq!(
            observer
                .events()
                .iter()
                .filter(|e| matches!(e, CollectEvent::KindSkipped { .. }))
                .count(),
            2
        );
        assert!(extraction.report()[0].contains("skipped"));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_in_one_kind_spares_the_others() {
        let client = FakeClient::new();
        client.respond(TWEET, tweet_body("42", &recent(), 4, 1, 1));
        client.fail(LIKERS, ApiError::Forbidden("app-only".into()));
        client.respond(RETWEETERS, users_page(1, 1, None));
        client.respond(SEARCH, replies_page(&[2], None));

        let (extraction, _) = run(&client, &ExtractOptions::default()).await;

        let likes = extraction.likes.as_ref().unwrap();
        assert!(likes.records.is_empty());
        assert_eq!(likes.summary.truncation, Some(TruncationReason::Forbidden));
        assert_eq!(extraction.retweets.as_ref().unwrap().records.len(), 1);
        assert_eq!(extraction.replies.records.len(), 1);
        assert_eq!(
            extraction.failures(),
            vec![(InteractionKind::Like, &TruncationReason::Forbidden)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_subject_metadata_is_not_fatal() {
        let client = FakeClient::new();
        client.fail(TWEET, ApiError::Unknown("boom".into()));
        client.respond(LIKERS, users_page(1, 1, None));
        client.respond(RETWEETERS, users_page(1, 1, None));
        client.respond(SEARCH, replies_page(&[1], None));

        let (extraction, _) = run(&client, &ExtractOptions::default()).await;
        assert!(extraction.subject.is_none());
        assert_eq!(extraction.all_interactions().count(), 3);
        assert_eq!(extraction.replies.summary.expected_count, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_kind_waits_and_resumes() {
        let client = FakeClient::new();
        client.respond(TWEET, tweet_body("42", &recent(), 150, 0, 0));
        client.respond(LIKERS, users_page(0, 100, Some("t1")));
        client.fail(
            LIKERS,
            ApiError::RateLimited {
                retry_after: Some(Duration::from_secs(300)),
            },
        );
        client.respond(LIKERS, users_page(100, 50, None));
        client.respond(RETWEETERS, json_empty());
        client.respond(SEARCH, json_empty());

        let (extraction, observer) = run(&client, &ExtractOptions::default()).await;

        let likes = extraction.likes.as_ref().unwrap();
        assert_eq!(likes.records.len(), 150);
        assert_eq!(likes.summary.truncation, None);
        assert!(observer.events().contains(&CollectEvent::RateLimitBackoff {
            kind: InteractionKind::Like,
            wait: Duration::from_secs(300),
            attempt: 1
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_budget_exhausted_keeps_records() {
        let client = FakeClient::new();
        client.respond(TWEET, tweet_body("42", &recent(), 150, 0, 0));
        client.respond(LIKERS, users_page(0, 100, Some("t1")));
        for _ in 0..2 {
            client.fail(LIKERS, ApiError::RateLimited { retry_after: None });
        }
        client.respond(RETWEETERS, json_empty());
        client.respond(SEARCH, json_empty());
        let options = ExtractOptions {
            rate_limit_resumes: 1,
            ..ExtractOptions::default()
        };

        let (extraction, _) = run(&client, &options).await;

        let likes = extraction.likes.as_ref().unwrap();
        assert_eq!(likes.records.len(), 100);
        assert_eq!(likes.summary.truncation, Some(TruncationReason::RateLimited));
        assert_eq!(client.requests_to(LIKERS).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_resumes_stops_at_first_rate_limit() {
        let client = FakeClient::new();
        client.respond(TWEET, tweet_body("42", &recent(), 0, 150, 0));
        client.respond(LIKERS, json_empty());
        client.respond(RETWEETERS, users_page(0, 100, Some("t1")));
        client.fail(RETWEETERS, ApiError::RateLimited { retry_after: None });
        client.respond(SEARCH, json_empty());
        let options = ExtractOptions {
            rate_limit_resumes: 0,
            ..ExtractOptions::default()
        };

        let (extraction, observer) = run(&client, &options).await;

        let retweets = extraction.retweets.as_ref().unwrap();
        assert_eq!(retweets.records.len(), 100);
        assert_eq!(retweets.summary.truncation, Some(TruncationReason::RateLimited));
        assert!(!observer
            .events()
            .iter()
            .any(|e| matches!(e, CollectEvent::RateLimitBackoff { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_backoff_reports_cancelled() {
        let client = FakeClient::new();
        client.respond(TWEET, tweet_body("42", &recent(), 150, 0, 0));
        client.respond(LIKERS, users_page(0, 100, Some("t1")));
        client.fail(
            LIKERS,
            ApiError::RateLimited {
                retry_after: Some(Duration::from_secs(300)),
            },
        );
        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(120)).await;
                cancel.cancel();
            }
        });

        let extraction = extract(
            &client,
            SubjectId::parse("42").unwrap(),
            None,
            &ExtractOptions::default(),
            &RecordingObserver::default(),
            &cancel,
        )
        .await;

        let likes = extraction.likes.as_ref().unwrap();
        assert_eq!(likes.records.len(), 100);
        assert_eq!(likes.summary.truncation, Some(TruncationReason::Cancelled));
        assert_eq!(client.requests_to(LIKERS).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn known_subject_is_not_fetched_again() {
        let client = FakeClient::new();
        client.respond(LIKERS, users_page(1, 2, None));
        client.respond(RETWEETERS, json_empty());
        client.respond(SEARCH, json_empty());
        let subject = Subject {
            id: "42".into(),
            author_id: Some("7".into()),
            created_at: Some(Utc::now() - chrono::Duration::days(1)),
            metrics: Some(PublicMetrics {
                like_count: 2,
                retweet_count: 0,
                reply_count: 0,
            }),
        };

        let extraction = extract(
            &client,
            SubjectId::parse("42").unwrap(),
            Some(subject.clone()),
            &ExtractOptions::default(),
            &RecordingObserver::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(client.requests_to(TWEET).is_empty());
        assert_eq!(extraction.subject, Some(subject));
        assert_eq!(extraction.likes.as_ref().unwrap().summary.expected_count, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn own_post_is_detected_from_viewer() {
        let client = FakeClient::new();
        client.respond(TWEET, tweet_body("42", &recent(), 3, 0, 0));
        client.respond(LIKERS, serde_json::json!({"meta": {"result_count": 0}}));
        client.respond(LIKERS, serde_json::json!({"meta": {"result_count": 0}}));
        client.respond(RETWEETERS, json_empty());
        client.respond(SEARCH, json_empty());
        let options = ExtractOptions {
            viewer_id: Some("7".into()),
            ..ExtractOptions::default()
        };

        let (extraction, _) = run(&client, &options).await;
        let explanation = extraction
            .likes
            .as_ref()
            .unwrap()
            .summary
            .explanation
            .clone()
            .unwrap();
        assert!(explanation.starts_with("Your own post"));
    }

    fn json_empty() -> serde_json::Value {
        serde_json::json!({"meta": {"result_count": 0}})
    }
}
