//! Drives one interaction endpoint to exhaustion for one post, pacing itself
//! inside the request window and normalising every page into records.

mod explain;
mod rate_window;

use rate_window::RateWindow;

use crate::model::{
    CollectionResult, CollectionSummary, InteractionKind, InteractionRecord, PageToken, Subject,
    SubjectId, TruncationReason,
};
use crate::observer::{CollectEvent, CollectObserver};
use crate::twitter::pages::{PageRequest, PageResponse};
use crate::twitter::{decode, ApiError, TwitterClient};
use chrono::Utc;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub page_size: u32,
    /// Requests allowed per window
    pub window_capacity: u32,
    pub window_duration: Duration,
    /// Fixed gap between requests, derived from the window when unset
    pub request_spacing: Option<Duration>,
    /// How far back recent search reaches
    pub search_horizon: chrono::Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            window_capacity: 25,
            window_duration: Duration::from_secs(15 * 60),
            request_spacing: None,
            search_horizon: chrono::Duration::days(7),
        }
    }
}

/// Everything a collector borrows from its caller
#[derive(Clone, Copy)]
pub struct CollectContext<'a> {
    pub client: &'a dyn TwitterClient,
    pub subject_id: &'a SubjectId,
    pub subject: Option<&'a Subject>,
    /// Whether the post belongs to the authenticated user, if known
    pub own_post: Option<bool>,
    pub config: &'a CollectorConfig,
    pub observer: &'a dyn CollectObserver,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Finished,
    /// The API refused despite pacing; `run` again to resume from the same page
    RateLimited { retry_after: Option<Duration> },
}

enum Step {
    Continue,
    Done,
}

pub struct Collector<'a, R> {
    ctx: CollectContext<'a>,
    window: RateWindow,
    spacing: Duration,
    records: Vec<InteractionRecord>,
    seen: HashSet<String>,
    pending: Option<PageToken>,
    pages_fetched: u32,
    requests_made: u32,
    expanded: bool,
    expansion_retried: bool,
    horizon_exceeded: bool,
    failure: Option<TruncationReason>,
    finished: bool,
    _response: PhantomData<R>,
}

impl<'a, R: PageResponse> Collector<'a, R> {
    pub fn new(ctx: CollectContext<'a>) -> Self {
        let window = RateWindow::new(ctx.config.window_capacity, ctx.config.window_duration);
        let spacing = ctx.config.request_spacing.unwrap_or_else(|| window.spacing());
        let mut collector = Self {
            ctx,
            window,
            spacing,
            records: Vec::new(),
            seen: HashSet::new(),
            pending: None,
            pages_fetched: 0,
            requests_made: 0,
            expanded: true,
            expansion_retried: false,
            horizon_exceeded: false,
            failure: None,
            finished: false,
            _response: PhantomData,
        };
        if R::KIND == InteractionKind::Reply {
            collector.check_search_horizon();
        }
        collector
    }

    pub fn kind(&self) -> InteractionKind {
        R::KIND
    }

    /// Runs and finishes in one go, without resuming after a rate limit
    pub async fn collect(mut self) -> CollectionResult {
        self.run().await;
        self.finish()
    }

    fn check_search_horizon(&mut self) {
        let Some(created_at) = self.ctx.subject.and_then(|s| s.created_at) else {
            return;
        };
        let age = Utc::now() - created_at;
        let horizon = self.ctx.config.search_horizon;
        if age > horizon {
            self.horizon_exceeded = true;
            self.emit(CollectEvent::HorizonExceeded {
                kind: R::KIND,
                age_days: age.num_days(),
                horizon_days: horizon.num_days(),
            });
        }
    }

    fn expected_count(&self) -> Option<u64> {
        self.ctx.subject.and_then(|s| s.expected_count(R::KIND))
    }

    fn emit(&self, event: CollectEvent) {
        self.ctx.observer.on_event(&event);
    }

    fn stop(&mut self, reason: TruncationReason) {
        self.failure = Some(reason);
        self.finished = true;
    }

    /// Fetches pages until the listing ends, a fatal error occurs, the run
    /// is cancelled, or the API reports a rate limit.
    pub async fn run(&mut self) -> Progress {
        if matches!(self.failure, Some(TruncationReason::RateLimited)) {
            self.failure = None;
        }
        let page_size = R::effective_page_size(self.ctx.config.page_size);
        let mut consecutive_failures = 0;

        while !self.finished {
            if self.ctx.cancel.is_cancelled() {
                self.stop(TruncationReason::Cancelled);
                break;
            }
            let token = self.pending.take();
            let current = token.clone();
            let request = R::request(
                self.ctx.subject_id,
                PageRequest {
                    token,
                    page_size,
                    expanded: self.expanded,
                },
            );
            self.window.record_request(Instant::now());
            self.requests_made += 1;

            let (client, cancel) = (self.ctx.client, self.ctx.cancel);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                body = client.get(&request) => Some(body),
            };
            let Some(body) = fetched else {
                self.stop(TruncationReason::Cancelled);
                break;
            };
            let response = body.and_then(decode::<R>);
            match response {
                Ok(response) => {
                    consecutive_failures = 0;
                    if let Step::Done = self.absorb(response, current, page_size) {
                        self.finished = true;
                        break;
                    }
                }
                Err(ApiError::RateLimited { retry_after }) => {
                    self.pending = current;
                    self.failure = Some(TruncationReason::RateLimited);
                    return Progress::RateLimited { retry_after };
                }
                Err(ApiError::Unauthorized(_)) => self.stop(TruncationReason::Unauthorized),
                Err(ApiError::Forbidden(_)) => self.stop(TruncationReason::Forbidden),
                Err(ApiError::NotFound(_)) => self.stop(TruncationReason::NotFound),
                Err(ApiError::Unknown(e)) => {
                    consecutive_failures += 1;
                    if consecutive_failures > 1 {
                        self.stop(TruncationReason::Unknown(e));
                    } else {
                        self.emit(CollectEvent::TransientFailure {
                            kind: R::KIND,
                            error: ApiError::Unknown(e),
                        });
                        self.pending = current;
                    }
                }
            }
            if !self.finished {
                self.pause().await;
            }
        }
        Progress::Finished
    }

    /// Folds one decoded page into the accumulator and decides whether to go on
    fn absorb(&mut self, response: R, consumed: Option<PageToken>, page_size: u32) -> Step {
        let page = response.into_page();

        let expected = self.expected_count().unwrap_or(0);
        if self.pages_fetched == 0 && page.records.is_empty() && expected > 0 && !self.expansion_retried {
            self.expansion_retried = true;
            self.expanded = !self.expanded;
            self.emit(CollectEvent::ExpansionRetry {
                kind: R::KIND,
                expected,
            });
            return Step::Continue;
        }
        self.pages_fetched += 1;

        let fetched = page.records.len();
        for record in page.records {
            if self.seen.insert(record.record_id().to_string()) {
                self.records.push(record);
            }
        }
        self.emit(CollectEvent::PageFetched {
            kind: R::KIND,
            request: self.requests_made,
            records: fetched,
            total: self.records.len(),
        });

        let last_page = fetched == 0 || page.reported_count < page_size as usize;
        match page.next_token {
            Some(next) if !last_page && Some(&next) != consumed.as_ref() => {
                self.pending = Some(next);
                Step::Continue
            }
            Some(_) if !last_page => {
                log::debug!("{}: API handed back the cursor it was given, stopping", R::KIND);
                Step::Done
            }
            _ => Step::Done,
        }
    }

    /// Sleeps between requests; the rest of the window once the budget is spent
    async fn pause(&mut self) {
        let (wait, exhausted) = match self.window.exhausted_wait(Instant::now()) {
            Some(wait) => {
                self.emit(CollectEvent::WindowExhausted { kind: R::KIND, wait });
                (wait, true)
            }
            None => {
                self.emit(CollectEvent::Pacing {
                    kind: R::KIND,
                    delay: self.spacing,
                });
                (self.spacing, false)
            }
        };
        if !sleep_or_cancel(wait, self.ctx.cancel).await {
            self.stop(TruncationReason::Cancelled);
            return;
        }
        if exhausted {
            self.window.reset();
        }
    }

    /// Ends the run from outside, e.g. when cancelled while waiting to resume
    pub fn mark_cancelled(&mut self) {
        self.stop(TruncationReason::Cancelled);
    }

    pub fn finish(self) -> CollectionResult {
        let truncation = self.failure.clone().or_else(|| {
            self.horizon_exceeded
                .then_some(TruncationReason::SearchHorizonExceeded)
        });
        let expected_count = self.expected_count();
        let explanation = explain::shortfall(
            R::KIND,
            self.records.len(),
            expected_count,
            self.ctx.own_post,
            truncation.as_ref(),
        );
        let summary = CollectionSummary {
            kind: R::KIND,
            observed_count: self.records.len(),
            expected_count,
            truncation,
            requests_made: self.requests_made,
            explanation,
        };
        self.emit(CollectEvent::KindCompleted {
            summary: summary.clone(),
        });
        CollectionResult {
            records: self.records,
            summary,
        }
    }
}

/// Returns false if the token fired before the sleep finished
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
