//! Component M: per-tool sliding-window call counter driving the
//! retry-escalation multiplier (§4.M).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mcpx_domain::config::RetryEscalationConfig;
use parking_lot::Mutex;

pub struct RetryEscalation {
    config: RetryEscalationConfig,
    windows: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RetryEscalation {
    pub fn new(config: RetryEscalationConfig) -> Self {
        RetryEscalation { config, windows: Mutex::new(HashMap::new()) }
    }

    /// Records this call and returns the multiplier to apply to
    /// `maxOutputTokens`. Returns `None` when retry escalation is disabled
    /// (no bookkeeping performed).
    pub fn record_and_multiplier(&self, namespaced_tool_name: &str) -> Option<f64> {
        if !self.config.enabled {
            return None;
        }
        let window = Duration::from_secs(self.config.window_seconds);
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let timestamps = windows.entry(namespaced_tool_name.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < window);
        timestamps.push(now);
        let n = timestamps.len();
        Some(1.0 + (n as f64 - 1.0) * self.config.token_multiplier)
    }

    /// Shares the cache-cleanup cadence (§4.L step 8): drops windows that
    /// have gone fully empty after pruning expired timestamps.
    pub fn prune(&self) {
        let window = Duration::from_secs(self.config.window_seconds);
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < window);
            !timestamps.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> RetryEscalationConfig {
        RetryEscalationConfig { enabled, window_seconds: 60, token_multiplier: 0.5 }
    }

    #[test]
    fn disabled_returns_none() {
        let counter = RetryEscalation::new(config(false));
        assert_eq!(counter.record_and_multiplier("fs__read"), None);
    }

    #[test]
    fn first_call_in_window_is_multiplier_one() {
        let counter = RetryEscalation::new(config(true));
        assert_eq!(counter.record_and_multiplier("fs__read"), Some(1.0));
    }

    #[test]
    fn repeated_calls_scale_linearly() {
        let counter = RetryEscalation::new(config(true));
        counter.record_and_multiplier("fs__read");
        counter.record_and_multiplier("fs__read");
        let multiplier = counter.record_and_multiplier("fs__read").unwrap();
        assert_eq!(multiplier, 1.0 + 2.0 * 0.5);
    }

    #[test]
    fn prune_drops_emptied_windows() {
        let counter = RetryEscalation::new(RetryEscalationConfig { enabled: true, window_seconds: 0, token_multiplier: 0.5 });
        counter.record_and_multiplier("fs__read");
        counter.prune();
        assert!(counter.windows.lock().is_empty());
    }
}
