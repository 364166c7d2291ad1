//! Content-size convergence.
//!
//! A page is considered settled once `required_samples` consecutive samples
//! report a complete document with the same non-zero size. The wait is best
//! effort: it never fails, it only reports how it ended.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tabpilot_config::StabilityConfig;
use tabpilot_protocols::BrowserHost;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::scripts::STABILITY_SAMPLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityOutcome {
    Stable { samples: u32 },
    TimedOut,
    TargetGone,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sample {
    #[serde(default)]
    ready_state: String,
    #[serde(default)]
    length: u64,
}

impl Sample {
    /// Size fingerprint, or `None` while the document is not ready.
    fn fingerprint(&self) -> Option<u64> {
        (self.ready_state == "complete" && self.length > 0).then_some(self.length)
    }
}

pub struct StabilityDetector {
    host: Arc<dyn BrowserHost>,
}

impl StabilityDetector {
    pub fn new(host: Arc<dyn BrowserHost>) -> Self {
        Self { host }
    }

    /// Returns within `timeout + poll_interval` even if every host call hangs.
    pub async fn wait_for_stable(&self, target_id: &str, config: &StabilityConfig) -> StabilityOutcome {
        let budget = config.timeout() + config.poll_interval();
        match tokio::time::timeout(budget, self.converge(target_id, config)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(target_id, "stability sampling overran its budget");
                StabilityOutcome::TimedOut
            }
        }
    }

    async fn converge(&self, target_id: &str, config: &StabilityConfig) -> StabilityOutcome {
        let required = config.required_samples.max(1);
        let deadline = Instant::now() + config.timeout();
        let mut last: Option<u64> = None;
        let mut run = 0u32;

        loop {
            match self.host.target_info(target_id).await {
                Ok(None) => {
                    debug!(target_id, "target disappeared while stabilizing");
                    return StabilityOutcome::TargetGone;
                }
                Ok(Some(_)) => match self.sample(target_id).await {
                    Some(size) if last == Some(size) => run += 1,
                    Some(size) => {
                        last = Some(size);
                        run = 1;
                    }
                    None => {
                        last = None;
                        run = 0;
                    }
                },
                Err(e) => trace!(target_id, "target lookup failed: {}", e),
            }

            if run >= required {
                trace!(target_id, samples = run, "content stable");
                return StabilityOutcome::Stable { samples: run };
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(target_id, "content did not stabilize within {:?}", config.timeout());
                return StabilityOutcome::TimedOut;
            }
            tokio::time::sleep(config.poll_interval().min(deadline - now)).await;
        }
    }

    /// One sample. Errors mean "not yet evaluable" and never end the wait.
    async fn sample(&self, target_id: &str) -> Option<u64> {
        match self.host.evaluate(target_id, STABILITY_SAMPLE).await {
            Ok(value) => parse_sample(value).and_then(|s| s.fingerprint()),
            Err(e) => {
                trace!(target_id, "stability sample failed: {}", e);
                None
            }
        }
    }
}

fn parse_sample(value: Value) -> Option<Sample> {
    match value {
        Value::String(text) => serde_json::from_str(&text).ok(),
        other => serde_json::from_value(other).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHost;
    use serde_json::json;
    use std::time::Duration;

    fn config(timeout_ms: u64, required_samples: u32) -> StabilityConfig {
        StabilityConfig {
            timeout_ms,
            poll_interval_ms: 10,
            required_samples,
        }
    }

    #[test]
    fn test_parse_sample_accepts_object_or_string() {
        let sample = parse_sample(json!({"readyState": "complete", "length": 42})).unwrap();
        assert_eq!(sample.fingerprint(), Some(42));

        let sample = parse_sample(json!("{\"readyState\":\"loading\",\"length\":42}")).unwrap();
        assert_eq!(sample.fingerprint(), None);

        let sample = parse_sample(json!({"readyState": "complete", "length": 0})).unwrap();
        assert_eq!(sample.fingerprint(), None);
    }

    #[tokio::test]
    async fn test_stable_after_consecutive_equal_samples() {
        let host = Arc::new(ScriptedHost::new());
        let t1 = host.add_page("https://a.test");
        host.queue_samples(&t1, [0, 120, 180, 180, 180]);
        let detector = StabilityDetector::new(host.clone());

        let outcome = detector.wait_for_stable(&t1, &config(2000, 3)).await;
        assert_eq!(outcome, StabilityOutcome::Stable { samples: 3 });
        assert_eq!(host.count_calls(&format!("evaluate:{t1}")), 5);
    }

    #[tokio::test]
    async fn test_sampling_errors_are_retried() {
        let host = Arc::new(ScriptedHost::new());
        let t1 = host.add_page("https://a.test");
        host.fail_next_samples(3);
        let detector = StabilityDetector::new(host.clone());

        let outcome = detector.wait_for_stable(&t1, &config(2000, 2)).await;
        assert_eq!(outcome, StabilityOutcome::Stable { samples: 2 });
    }

    #[tokio::test]
    async fn test_never_hangs_when_every_sample_fails() {
        let host = Arc::new(ScriptedHost::new());
        let t1 = host.add_page("https://a.test");
        host.fail_next_samples(u32::MAX);
        let detector = StabilityDetector::new(host.clone());

        let started = std::time::Instant::now();
        let outcome = detector.wait_for_stable(&t1, &config(100, 2)).await;
        assert_eq!(outcome, StabilityOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_gone_target_returns_immediately() {
        let host = Arc::new(ScriptedHost::new());
        let detector = StabilityDetector::new(host.clone());

        let started = std::time::Instant::now();
        let outcome = detector.wait_for_stable("missing", &config(5000, 2)).await;
        assert_eq!(outcome, StabilityOutcome::TargetGone);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_changing_content_times_out() {
        let host = Arc::new(ScriptedHost::new());
        let t1 = host.add_page("https://a.test");
        host.queue_samples(&t1, (1..=1000).map(|n| n * 10));
        let detector = StabilityDetector::new(host.clone());

        let outcome = detector.wait_for_stable(&t1, &config(80, 2)).await;
        assert_eq!(outcome, StabilityOutcome::TimedOut);
    }
}
