//! ModelRegistry (C1, spec §4.1): discovers reachable providers and their
//! available models, filtered by the configured pricing tier.

use parking_lot::RwLock;
use sa_domain::error::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Tier filter applied when listing models (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Only models with zero declared pricing or a provider-specific free
    /// marker in their id (e.g. OpenRouter's `:free` suffix).
    Free,
    /// No filtering.
    All,
}

/// Static definition of a configured provider, supplied by the orchestrator
/// at startup (config loader is out of scope for this crate).
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub id: String,
    /// `{base_url}/models` must answer the OpenAI-compat model-listing
    /// contract: `{"data": [{"id": "...", "pricing": {"prompt": "0", ...}}]}`.
    pub base_url: String,
    pub is_local: bool,
    /// Substring markers that identify a model id as free when the
    /// provider's listing omits pricing info entirely (e.g. Ollama).
    pub free_markers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
    pub is_local: bool,
    pub is_free: bool,
}

#[derive(Default)]
struct RegistryState {
    reachable: BTreeSet<String>,
    models: Vec<ModelInfo>,
}

pub struct ModelRegistry {
    specs: Vec<ProviderSpec>,
    tier: ModelTier,
    client: reqwest::Client,
    state: RwLock<RegistryState>,
    refresh_lock: AsyncMutex<()>,
}

impl ModelRegistry {
    pub fn new(specs: Vec<ProviderSpec>, tier: ModelTier) -> Self {
        Self {
            specs,
            tier,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client builder never fails with this config"),
            state: RwLock::new(RegistryState::default()),
            refresh_lock: AsyncMutex::new(()),
        }
    }

    /// Probe every configured provider for reachability and enumerate its
    /// models, applying the tier filter. Safe to call concurrently: callers
    /// serialize behind an internal async lock, so overlapping refreshes
    /// collapse into one round of probing rather than racing each other.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        let mut reachable = BTreeSet::new();
        let mut models = Vec::new();

        for spec in &self.specs {
            match self.probe_one(spec).await {
                Ok(found) => {
                    reachable.insert(spec.id.clone());
                    models.extend(found);
                }
                Err(e) => {
                    tracing::warn!(provider = %spec.id, error = %e, "provider unreachable during refresh");
                }
            }
        }

        let mut state = self.state.write();
        state.reachable = reachable;
        state.models = models;
        Ok(())
    }

    async fn probe_one(&self, spec: &ProviderSpec) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", spec.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Provider {
                provider: spec.id.clone(),
                message: format!("models endpoint returned HTTP {}", resp.status()),
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(Error::Json)?;
        let entries = body
            .get("data")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut out = Vec::new();
        for entry in entries {
            let id = match entry.get("id").and_then(|v| v.as_str()) {
                Some(id) => id.to_string(),
                None => continue,
            };
            let is_free = model_is_free(&entry, &id, spec);
            if self.tier == ModelTier::Free && !is_free {
                continue;
            }
            out.push(ModelInfo {
                provider: spec.id.clone(),
                model: id,
                is_local: spec.is_local,
                is_free,
            });
        }
        Ok(out)
    }

    pub fn is_reachable(&self, provider: &str) -> bool {
        self.state.read().reachable.contains(provider)
    }

    pub fn is_available(&self, provider: &str, model: &str) -> bool {
        self.state
            .read()
            .models
            .iter()
            .any(|m| m.provider == provider && m.model == model)
    }

    pub fn list_available(&self) -> Vec<(String, String)> {
        self.state
            .read()
            .models
            .iter()
            .map(|m| (m.provider.clone(), m.model.clone()))
            .collect()
    }

    /// Full model metadata list, used by `selectBestAvailableModel`
    /// (spec §4.9) for its local/free/paid tie-break.
    pub fn list_model_info(&self) -> Vec<ModelInfo> {
        self.state.read().models.clone()
    }
}

fn model_is_free(entry: &serde_json::Value, id: &str, spec: &ProviderSpec) -> bool {
    if let Some(pricing) = entry.get("pricing") {
        let all_zero = ["prompt", "completion"].iter().all(|k| {
            pricing
                .get(k)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .map(|n| n == 0.0)
                .unwrap_or(false)
        });
        if all_zero {
            return true;
        }
    }
    spec.free_markers.iter().any(|marker| id.contains(marker.as_str()))
}

/// A snapshot view used to build cross-registry lookups without holding the
/// lock (e.g. the orchestrator forwarding `(provider, model)` pairs to the
/// prompt assembler's `{available_models}` substitution).
pub fn format_available(models: &[ModelInfo]) -> String {
    models
        .iter()
        .map(|m| format!("{}/{}", m.provider, m.model))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type SharedRegistry = Arc<ModelRegistry>;
pub type Providers = HashMap<String, Arc<dyn crate::traits::LlmProvider>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_marker_detected_without_pricing_block() {
        let spec = ProviderSpec {
            id: "openrouter".into(),
            base_url: "http://x".into(),
            is_local: false,
            free_markers: vec![":free".into()],
        };
        let entry = serde_json::json!({"id": "meta/llama-3:free"});
        assert!(model_is_free(&entry, "meta/llama-3:free", &spec));
    }

    #[test]
    fn zero_pricing_counts_as_free() {
        let spec = ProviderSpec {
            id: "openrouter".into(),
            base_url: "http://x".into(),
            is_local: false,
            free_markers: vec![],
        };
        let entry = serde_json::json!({"id": "foo", "pricing": {"prompt": "0", "completion": "0"}});
        assert!(model_is_free(&entry, "foo", &spec));
    }

    #[test]
    fn nonzero_pricing_is_not_free() {
        let spec = ProviderSpec {
            id: "openai".into(),
            base_url: "http://x".into(),
            is_local: false,
            free_markers: vec![],
        };
        let entry = serde_json::json!({"id": "gpt-4o", "pricing": {"prompt": "0.005", "completion": "0.015"}});
        assert!(!model_is_free(&entry, "gpt-4o", &spec));
    }

    #[test]
    fn empty_registry_has_nothing_available() {
        let reg = ModelRegistry::new(vec![], ModelTier::All);
        assert!(reg.list_available().is_empty());
        assert!(!reg.is_reachable("openrouter"));
    }
}
