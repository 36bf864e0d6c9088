//! PerformanceTracker (C3, spec §4.3): per-(provider,model) outcome
//! counters and a ranked list used by model failover and auto-selection.

use parking_lot::RwLock;
use sa_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Minimum number of recorded calls before a model is eligible for ranking
/// (spec §4.3: "ignoring models with fewer than N calls").
pub const DEFAULT_MIN_CALLS: u32 = 3;
/// Latency-penalty coefficient in the ranking score (spec: `score =
/// success_rate − α·normalised_latency`).
pub const DEFAULT_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMetric {
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ns: u64,
    pub calls: u64,
}

impl ModelMetric {
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.successes as f64 / self.calls as f64
        }
    }

    pub fn mean_latency_ns(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_latency_ns as f64 / self.calls as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub provider: String,
    pub model: String,
}

pub struct PerformanceTracker {
    metrics: RwLock<HashMap<ModelKey, ModelMetric>>,
    alpha: f64,
    min_calls: u32,
    metrics_file: PathBuf,
}

impl PerformanceTracker {
    pub fn new(metrics_file: PathBuf, alpha: f64, min_calls: u32) -> Self {
        let metrics = load_metrics_file(&metrics_file).unwrap_or_default();
        Self {
            metrics: RwLock::new(metrics),
            alpha,
            min_calls,
            metrics_file,
        }
    }

    pub fn with_defaults(metrics_file: PathBuf) -> Self {
        Self::new(metrics_file, DEFAULT_ALPHA, DEFAULT_MIN_CALLS)
    }

    /// Record one cycle outcome (spec §4.3: "after every cycle").
    pub fn record(&self, provider: &str, model: &str, success: bool, latency_ns: u64) {
        let key = ModelKey {
            provider: provider.to_string(),
            model: model.to_string(),
        };
        let mut metrics = self.metrics.write();
        let entry = metrics.entry(key).or_default();
        entry.calls += 1;
        entry.total_latency_ns += latency_ns;
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    /// Rank a candidate set of `(provider, model)` pairs by
    /// `success_rate - alpha * normalised_latency`, dropping any with fewer
    /// than `min_calls` recorded calls. Highest score first.
    pub fn rank(&self, candidates: &[(String, String)]) -> Vec<(String, String)> {
        let metrics = self.metrics.read();

        let max_latency = metrics
            .values()
            .map(|m| m.mean_latency_ns())
            .fold(0.0_f64, f64::max)
            .max(1.0);

        let mut scored: Vec<(f64, (String, String))> = candidates
            .iter()
            .filter_map(|(provider, model)| {
                let key = ModelKey {
                    provider: provider.clone(),
                    model: model.clone(),
                };
                let metric = metrics.get(&key)?;
                if (metric.calls as u32) < self.min_calls {
                    return None;
                }
                let normalised_latency = metric.mean_latency_ns() / max_latency;
                let score = metric.success_rate() - self.alpha * normalised_latency;
                Some((score, (provider.clone(), model.clone())))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, pair)| pair).collect()
    }

    pub async fn persist(&self) -> Result<()> {
        let snapshot: HashMap<String, ModelMetric> = {
            let metrics = self.metrics.read();
            metrics
                .iter()
                .map(|(k, v)| (format!("{}/{}", k.provider, k.model), v.clone()))
                .collect()
        };
        let json = serde_json::to_vec_pretty(&snapshot).map_err(Error::Json)?;
        if let Some(parent) = self.metrics_file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }
        let tmp = self.metrics_file.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp, &self.metrics_file).await.map_err(Error::Io)?;
        Ok(())
    }
}

fn load_metrics_file(path: &std::path::Path) -> Option<HashMap<ModelKey, ModelMetric>> {
    let bytes = std::fs::read(path).ok()?;
    let flat: HashMap<String, ModelMetric> = serde_json::from_slice(&bytes).ok()?;
    Some(
        flat.into_iter()
            .filter_map(|(k, v)| {
                let (provider, model) = k.split_once('/')?;
                Some((
                    ModelKey {
                        provider: provider.to_string(),
                        model: model.to_string(),
                    },
                    v,
                ))
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_min_calls_is_excluded_from_ranking() {
        let tracker = PerformanceTracker::new(PathBuf::from("/tmp/does-not-exist.json"), 0.2, 3);
        tracker.record("openrouter", "a", true, 100);
        let ranked = tracker.rank(&[("openrouter".into(), "a".into())]);
        assert!(ranked.is_empty());
    }

    #[test]
    fn higher_success_rate_ranks_first() {
        let tracker = PerformanceTracker::new(PathBuf::from("/tmp/does-not-exist2.json"), 0.2, 1);
        tracker.record("openrouter", "good", true, 100);
        tracker.record("openrouter", "good", true, 100);
        tracker.record("openrouter", "good", true, 100);
        tracker.record("openrouter", "bad", true, 100);
        tracker.record("openrouter", "bad", false, 100);
        tracker.record("openrouter", "bad", false, 100);

        let ranked = tracker.rank(&[
            ("openrouter".into(), "good".into()),
            ("openrouter".into(), "bad".into()),
        ]);
        assert_eq!(ranked[0], ("openrouter".to_string(), "good".to_string()));
    }

    #[tokio::test]
    async fn persist_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_metrics.json");
        {
            let tracker = PerformanceTracker::with_defaults(path.clone());
            tracker.record("openrouter", "a", true, 50);
            tracker.record("openrouter", "a", true, 50);
            tracker.record("openrouter", "a", true, 50);
            tracker.persist().await.unwrap();
        }
        let reloaded = PerformanceTracker::with_defaults(path);
        let ranked = reloaded.rank(&[("openrouter".into(), "a".into())]);
        assert_eq!(ranked.len(), 1);
    }
}
