use std::time::Duration;
use tokio::time::Instant;

/// Request budget over a fixed window, e.g. 25 requests per 15 minutes
#[derive(Debug, Clone)]
pub struct RateWindow {
    capacity: u32,
    window_duration: Duration,
    requests_made_in_window: u32,
    started: Option<Instant>,
}

impl RateWindow {
    pub fn new(capacity: u32, window_duration: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window_duration,
            requests_made_in_window: 0,
            started: None,
        }
    }

    #[cfg(test)]
    pub fn requests_made_in_window(&self) -> u32 {
        self.requests_made_in_window
    }

    /// Gap between requests that keeps `capacity` requests inside one window:
    /// ⌈window / capacity⌉ plus 10%, rounded up to whole seconds.
    pub fn spacing(&self) -> Duration {
        let capacity = u64::from(self.capacity);
        let window_ms = self.window_duration.as_millis() as u64;
        let base_ms = (window_ms + capacity - 1) / capacity;
        let padded_ms = base_ms + (base_ms + 9) / 10;
        Duration::from_secs((padded_ms + 999) / 1000)
    }

    /// Counts one request, starting a fresh window if the last one elapsed
    pub fn record_request(&mut self, now: Instant) {
        match self.started {
            Some(start) if now.duration_since(start) < self.window_duration => {
                self.requests_made_in_window += 1;
            }
            _ => {
                self.started = Some(now);
                self.requests_made_in_window = 1;
            }
        }
    }

    /// Time left in the window once the whole budget has been spent
    pub fn exhausted_wait(&self, now: Instant) -> Option<Duration> {
        if self.requests_made_in_window < self.capacity {
            return None;
        }
        let start = self.started?;
        Some(
            self.window_duration
                .saturating_sub(now.duration_since(start)),
        )
    }

    pub fn reset(&mut self) {
        self.requests_made_in_window = 0;
        self.started = None;
    }
}
