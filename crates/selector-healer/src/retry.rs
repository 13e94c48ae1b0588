//! Retry handler
//!
//! Re-runs a failing operation when its error message looks like a timeout
//! or a missing selector, sleeping an exponentially growing, jittered
//! backoff between attempts. Healing itself happens in the page facade; this
//! layer only feeds flakiness observations back to the engine.

use crate::{
    config::{PartialRetryConfig, RetryConfig},
    engine::HealingEngine,
    types::now_ms,
};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on a single backoff sleep
pub const MAX_BACKOFF_MS: u64 = 10_000;

const JITTER_RATIO: f64 = 0.2;
const DEFAULT_CONTEXT: &str = "default";

static TIMEOUT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)timeout",
        r"(?i)waiting for selector",
        r"(?i)exceeded while waiting",
        r"(?i)page\..*?: timeout",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("timeout pattern regex"))
    .collect()
});

static SELECTOR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)selector.*not found",
        r"(?i)element.*not found",
        r"(?i)no element matches selector",
        r"(?i)unable to find element",
        r"(?i)could not find element",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("selector pattern regex"))
    .collect()
});

static SELECTOR_EXTRACTORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)selector "([^"]+)""#,
        r"(?i)selector '([^']+)'",
        r#"(?i)locator\("([^"]+)"\)"#,
        r#"(?i)waiting for selector "([^"]+)""#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("selector extractor regex"))
    .collect()
});

pub fn is_timeout_error(message: &str) -> bool {
    TIMEOUT_PATTERNS.iter().any(|re| re.is_match(message))
}

pub fn is_selector_error(message: &str) -> bool {
    SELECTOR_PATTERNS.iter().any(|re| re.is_match(message))
}

/// Selector quoted in a driver error message, if any
pub fn selector_from_error(message: &str) -> Option<String> {
    SELECTOR_EXTRACTORS
        .iter()
        .find_map(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `initial * 2^(attempt-1)` scaled by `1 + 0.2 * jitter`, capped at
/// [`MAX_BACKOFF_MS`]. `jitter` is clamped to `-1.0..=1.0`.
pub fn backoff_delay(initial_ms: u64, attempt: u32, jitter: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32) as i32;
    let base = initial_ms as f64 * 2f64.powi(exponent);
    let jittered = base + base * JITTER_RATIO * jitter.clamp(-1.0, 1.0);
    let capped = jittered.clamp(0.0, MAX_BACKOFF_MS as f64);
    Duration::from_millis(capped.round() as u64)
}

/// Attempts made under one context key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStats {
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_attempt_at_ms: i64,
}

#[derive(Debug, Clone)]
struct RetryContext {
    attempts: u32,
    last_error: Option<String>,
    last_attempt_at_ms: i64,
}

impl RetryContext {
    fn new() -> Self {
        Self {
            attempts: 0,
            last_error: None,
            last_attempt_at_ms: now_ms(),
        }
    }
}

pub struct RetryHandler {
    engine: Option<Arc<HealingEngine>>,
    config: RwLock<RetryConfig>,
    contexts: Mutex<HashMap<String, RetryContext>>,
}

impl std::fmt::Debug for RetryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryHandler")
            .field("config", &*self.config.read())
            .field("has_engine", &self.engine.is_some())
            .finish()
    }
}

impl RetryHandler {
    pub fn new(engine: Option<Arc<HealingEngine>>, config: RetryConfig) -> Self {
        Self {
            engine,
            config: RwLock::new(config),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RetryConfig {
        self.config.read().clone()
    }

    /// Replace the whole retry policy
    pub fn set_config(&self, config: RetryConfig) {
        *self.config.write() = config;
    }

    pub fn update_config(&self, partial: &PartialRetryConfig) {
        let mut config = self.config.write();
        partial.apply_to(&mut config);
        info!(
            "Retry configuration updated: on_timeout={} on_flakiness={} max_retries={} initial_backoff_ms={}",
            config.on_timeout, config.on_flakiness, config.max_retries, config.initial_backoff_ms
        );
    }

    /// Attempts recorded for `key` (a selector or `"default"`); cleared once
    /// the operation succeeds
    pub fn retry_stats(&self, key: &str) -> Option<RetryStats> {
        self.contexts.lock().get(key).map(|ctx| RetryStats {
            attempts: ctx.attempts,
            last_error: ctx.last_error.clone(),
            last_attempt_at_ms: ctx.last_attempt_at_ms,
        })
    }

    pub fn clear_retry_contexts(&self) {
        self.contexts.lock().clear();
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(-1.0..=1.0);
        backoff_delay(self.config.read().initial_backoff_ms, attempt, jitter)
    }

    /// Run `op` until it succeeds, a non-retryable error occurs, or the
    /// retry budget (`max_retries` extra attempts) runs out. The last error
    /// is returned unchanged.
    pub async fn execute<T, E, F, Fut>(&self, selector: Option<&str>, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = selector.unwrap_or(DEFAULT_CONTEXT).to_string();
        let mut attempt: u32 = 0;

        loop {
            let config = self.config();
            self.touch(&key);

            match op().await {
                Ok(value) => {
                    self.contexts.lock().remove(&key);
                    if let (Some(engine), Some(selector)) = (&self.engine, selector) {
                        engine.record_success(selector);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let message = err.to_string();
                    debug!(
                        context = %key,
                        "attempt {}/{} failed: {}",
                        attempt + 1,
                        config.max_retries + 1,
                        message
                    );
                    if let Some(ctx) = self.contexts.lock().get_mut(&key) {
                        ctx.last_error = Some(message.clone());
                    }

                    let timeout = is_timeout_error(&message);
                    let missing = is_selector_error(&message);
                    if missing {
                        if let (Some(engine), Some(selector)) = (&self.engine, selector) {
                            engine.record_failure(selector);
                            if engine.is_flaky(selector) {
                                warn!(selector = %selector, "selector is known to be flaky");
                            }
                        }
                    }

                    let retryable =
                        (config.on_timeout && timeout) || (config.on_flakiness && missing);
                    if !retryable || attempt >= config.max_retries {
                        if retryable {
                            warn!(context = %key, "all {} retry attempts exhausted", config.max_retries);
                        }
                        return Err(err);
                    }

                    attempt += 1;
                    let delay = self.backoff(attempt);
                    info!(
                        context = %key,
                        "waiting {}ms before retry {}/{}",
                        delay.as_millis(),
                        attempt + 1,
                        config.max_retries + 1
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn touch(&self, key: &str) {
        let mut contexts = self.contexts.lock();
        let ctx = contexts
            .entry(key.to_string())
            .or_insert_with(RetryContext::new);
        ctx.attempts += 1;
        ctx.last_attempt_at_ms = now_ms();
    }
}
