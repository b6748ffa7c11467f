use crate::model::{CollectionSummary, InteractionKind};
use crate::twitter::ApiError;
use std::time::Duration;

/// Progress of a collection run, emitted as it happens
#[derive(Debug, Clone, PartialEq)]
pub enum CollectEvent {
    PageFetched {
        kind: InteractionKind,
        request: u32,
        records: usize,
        total: usize,
    },
    /// First page came back empty while metrics say otherwise
    ExpansionRetry {
        kind: InteractionKind,
        expected: u64,
    },
    Pacing {
        kind: InteractionKind,
        delay: Duration,
    },
    WindowExhausted {
        kind: InteractionKind,
        wait: Duration,
    },
    TransientFailure {
        kind: InteractionKind,
        error: ApiError,
    },
    HorizonExceeded {
        kind: InteractionKind,
        age_days: i64,
        horizon_days: i64,
    },
    RateLimitBackoff {
        kind: InteractionKind,
        wait: Duration,
        attempt: u32,
    },
    KindSkipped {
        kind: InteractionKind,
    },
    KindCompleted {
        summary: CollectionSummary,
    },
}

pub trait CollectObserver: Send + Sync {
    fn on_event(&self, event: &CollectEvent);
}

/// Forwards events to the `log` facade
pub struct LogObserver;

impl CollectObserver for LogObserver {
    fn on_event(&self, event: &CollectEvent) {
        match event {
            CollectEvent::PageFetched {
                kind,
                request,
                records,
                total,
            } => log::info!("{kind}: request {request} fetched {records} records (total {total})"),
            CollectEvent::ExpansionRetry { kind, expected } => log::warn!(
                "{kind}: first page was empty but the post reports {expected}, retrying without field expansions"
            ),
            CollectEvent::Pacing { kind, delay } => {
                log::debug!("{kind}: waiting {}s before the next request", delay.as_secs())
            }
            CollectEvent::WindowExhausted { kind, wait } => log::info!(
                "{kind}: request window used up, waiting {}m {}s for it to reset",
                wait.as_secs() / 60,
                wait.as_secs() % 60
            ),
            CollectEvent::TransientFailure { kind, error } => {
                log::warn!("{kind}: request failed, retrying once: {error}")
            }
            CollectEvent::HorizonExceeded {
                kind,
                age_days,
                horizon_days,
            } => log::warn!(
                "{kind}: post is {age_days} days old, search only reaches back {horizon_days} days; older replies cannot be retrieved"
            ),
            CollectEvent::RateLimitBackoff {
                kind,
                wait,
                attempt,
            } => log::warn!(
                "{kind}: rate limited, waiting {}m {}s before resuming (attempt {attempt})",
                wait.as_secs() / 60,
                wait.as_secs() % 60
            ),
            CollectEvent::KindSkipped { kind } => log::info!("{kind}: skipped"),
            CollectEvent::KindCompleted { summary } => {
                let expected = summary
                    .expected_count
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "?".to_string());
                match &summary.truncation {
                    Some(reason) => log::warn!(
                        "{}: collected {} of {} ({} requests), stopped: {}",
                        summary.kind,
                        summary.observed_count,
                        expected,
                        summary.requests_made,
                        reason
                    ),
                    None => log::info!(
                        "{}: collected {} of {} ({} requests)",
                        summary.kind,
                        summary.observed_count,
                        expected,
                        summary.requests_made
                    ),
                }
                if let Some(explanation) = &summary.explanation {
                    log::info!("{}: {}", summary.kind, explanation);
                }
            }
        }
    }
}
