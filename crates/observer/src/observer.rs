use crate::ansi::{strip_ansi, tail_chars};
use crate::heuristics;
use crate::metrics::{self as observer_metrics, MetricTimer};
use crate::parse::parse_observation;
use crate::prompt::{build_user_prompt, SYSTEM_PROMPT};
use async_trait::async_trait;
use parking_lot::Mutex;
use pilot_core::{Observation, ObservedState, ObserverAction};
use pilot_providers::{LLMProvider, Message};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Classifies a terminal buffer into a state and a recommended action.
///
/// Implementations never fail: an unusable reading degrades to
/// `working`/`wait` at low confidence with the reason in `error`.
#[async_trait]
pub trait StateObserver: Send + Sync {
    async fn observe(&self, buffer: &str, goal: &str, goal_submitted: bool) -> Observation;
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObserverConfig {
    /// Characters of stripped output sent to the classifier.
    pub context_chars: usize,
    /// Non-blank trailing lines searched by the heuristic pass.
    pub heuristic_window_lines: usize,
    pub fallback_confidence: f32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            context_chars: 4000,
            heuristic_window_lines: 12,
            fallback_confidence: 0.1,
        }
    }
}

pub struct LlmStateObserver {
    provider: Arc<dyn LLMProvider>,
    config: ObserverConfig,
    calls: AtomicU64,
    last_observation: Mutex<Option<Observation>>,
}

impl LlmStateObserver {
    pub fn new(provider: Arc<dyn LLMProvider>, config: ObserverConfig) -> Self {
        Self {
            provider,
            config,
            calls: AtomicU64::new(0),
            last_observation: Mutex::new(None),
        }
    }

    /// Number of semantic calls issued so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Most recent observation, kept for diagnostics only.
    pub fn last_observation(&self) -> Option<Observation> {
        self.last_observation.lock().clone()
    }

    fn fallback(&self, reason: String) -> Observation {
        observer_metrics::increment_fallbacks();
        Observation::new(
            ObservedState::Working,
            self.config.fallback_confidence,
            ObserverAction::Wait,
        )
        .with_error(reason)
    }

    async fn classify(&self, context: &str, goal: &str, goal_submitted: bool) -> Observation {
        self.calls.fetch_add(1, Ordering::Relaxed);
        observer_metrics::increment_llm_calls();

        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(build_user_prompt(goal, goal_submitted, context)),
        ];

        let response = match self.provider.generate(&messages).await {
            Ok(response) => response,
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "Classification call failed");
                return self.fallback(format!("Classification failed: {}", e));
            }
        };

        let Some(content) = response.content.filter(|c| !c.trim().is_empty()) else {
            warn!("Classifier returned no content");
            return self.fallback("Classification failed: empty response".to_string());
        };

        match parse_observation(&content) {
            Ok(observation) => observation,
            Err(e) => {
                warn!(error = %e, "Unparseable classifier response");
                self.fallback(format!("Classification failed: {}", e))
            }
        }
    }
}

#[async_trait]
impl StateObserver for LlmStateObserver {
    async fn observe(&self, buffer: &str, goal: &str, goal_submitted: bool) -> Observation {
        let _timer = MetricTimer::new();

        // Escape sequences inflate raw length, so over-fetch before stripping.
        let raw_tail = tail_chars(buffer, self.config.context_chars.saturating_mul(4));
        let stripped = strip_ansi(raw_tail);
        let context = tail_chars(&stripped, self.config.context_chars);

        let observation = match heuristics::detect(
            context,
            goal_submitted,
            self.config.heuristic_window_lines,
        ) {
            Some(observation) => {
                observer_metrics::increment_heuristic_hits();
                observation
            }
            None => self.classify(context, goal, goal_submitted).await,
        };

        debug!(
            state = ?observation.state,
            action = ?observation.action,
            confidence = observation.confidence,
            "Observation"
        );
        *self.last_observation.lock() = Some(observation.clone());
        observation
    }
}
