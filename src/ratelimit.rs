use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;

const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
const RESET_HEADER: &str = "X-RateLimit-Reset";

/// Последнее известное состояние лимитов платформы
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub remaining: u64,
    /// Unix-время сброса лимита
    #[serde(rename = "reset")]
    pub reset_at: i64,
}

/// Разбирает заголовки лимитов по мере получения ответа.
///
/// Один трекер на один экземпляр коннектора. Каждое новое значение
/// заменяет предыдущее: сервер присылает снимки, а не дельты.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    state: Mutex<RateLimitState>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Обрабатывает одну строку заголовка вида `Name: value`
    pub fn observe(&self, header_line: &str) {
        let Some((name, value)) = header_line.split_once(':') else {
            return;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case(REMAINING_HEADER) {
            if let Ok(remaining) = value.parse::<u64>() {
                self.update(|state| state.remaining = remaining);
            }
        } else if name.eq_ignore_ascii_case(RESET_HEADER) {
            if let Ok(reset_at) = value.parse::<i64>() {
                self.update(|state| state.reset_at = reset_at);
            }
        }
    }

    pub fn current(&self) -> RateLimitState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, apply: impl FnOnce(&mut RateLimitState)) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut state);
        debug!(
            remaining = state.remaining,
            reset = state.reset_at,
            "Rate limit state updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let tracker = RateLimitTracker::new();
        assert_eq!(tracker.current(), RateLimitState { remaining: 0, reset_at: 0 });
    }

    #[test]
    fn last_seen_value_wins_case_insensitively() {
        let tracker = RateLimitTracker::new();
        for line in [
            "X-RateLimit-Remaining: 100",
            "content-type: application/json",
            "x-ratelimit-reset: 1700000000",
            "X-RATELIMIT-REMAINING: 42",
            "Server: nginx",
            "X-Ratelimit-Reset:1700000600",
        ] {
            tracker.observe(line);
        }

        assert_eq!(
            tracker.current(),
            RateLimitState {
                remaining: 42,
                reset_at: 1_700_000_600
            }
        );
    }

    #[test]
    fn ignores_unparsable_and_unrelated_lines() {
        let tracker = RateLimitTracker::new();
        tracker.observe("X-RateLimit-Remaining: 7");
        tracker.observe("X-RateLimit-Remaining: soon");
        tracker.observe("X-RateLimit-Remaining");
        tracker.observe("X-RateLimit-Limit: 500");
        tracker.observe("");

        assert_eq!(tracker.current().remaining, 7);
        assert_eq!(tracker.current().reset_at, 0);
    }

    #[test]
    fn serializes_reset_under_short_name() {
        let state = RateLimitState {
            remaining: 0,
            reset_at: 1_700_000_000,
        };
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json, serde_json::json!({"remaining": 0, "reset": 1_700_000_000}));
    }
}
