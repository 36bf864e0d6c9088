//! ProviderKeyManager (C2, spec §4.2): round-robin multi-key store with
//! quarantine on 4xx-auth/429, persisted to `data/key_quarantine.json`
//! (spec §6).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sa_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_RATE_LIMIT_QUARANTINE: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_AUTH_QUARANTINE: Duration = Duration::from_secs(24 * 60 * 60);

/// Opaque handle returned by [`ProviderKeyManager::acquire`], passed back to
/// [`ProviderKeyManager::quarantine`]. Carries a fingerprint rather than the
/// plaintext key so callers (and logs) never need to hold the secret past
/// the call that used it.
#[derive(Debug, Clone)]
pub struct LeaseToken {
    provider: String,
    fingerprint: u64,
}

impl LeaseToken {
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

fn fingerprint(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuarantineEntry {
    provider: String,
    key_fingerprint: String,
    until_epoch: i64,
}

struct KeyState {
    key: String,
    fingerprint: u64,
    quarantined_until: Option<DateTime<Utc>>,
}

struct ProviderKeys {
    keys: Vec<KeyState>,
    next_index: usize,
}

pub struct ProviderKeyManager {
    providers: Mutex<HashMap<String, ProviderKeys>>,
    quarantine_file: PathBuf,
}

impl ProviderKeyManager {
    /// Build from the configured per-provider key lists, restoring any
    /// still-active quarantines persisted from a prior run.
    pub fn new(keys_by_provider: HashMap<String, Vec<String>>, quarantine_file: PathBuf) -> Self {
        let restored = load_quarantine_file(&quarantine_file).unwrap_or_default();

        let mut providers = HashMap::new();
        for (provider, keys) in keys_by_provider {
            let states = keys
                .into_iter()
                .map(|key| {
                    let fp = fingerprint(&key);
                    let quarantined_until = restored
                        .iter()
                        .find(|e| e.provider == provider && e.key_fingerprint == fp.to_string())
                        .and_then(|e| DateTime::from_timestamp(e.until_epoch, 0));
                    KeyState {
                        key,
                        fingerprint: fp,
                        quarantined_until,
                    }
                })
                .collect();
            providers.insert(
                provider,
                ProviderKeys {
                    keys: states,
                    next_index: 0,
                },
            );
        }

        Self {
            providers: Mutex::new(providers),
            quarantine_file,
        }
    }

    /// Return the next non-quarantined key for `provider` using round-robin,
    /// or `None` if every key is currently quarantined (spec: "no key").
    pub fn acquire(&self, provider: &str) -> Option<(String, LeaseToken)> {
        let mut providers = self.providers.lock();
        let entry = providers.get_mut(provider)?;
        if entry.keys.is_empty() {
            return None;
        }

        let now = Utc::now();
        let n = entry.keys.len();
        for offset in 0..n {
            let idx = (entry.next_index + offset) % n;
            let quarantined = entry.keys[idx]
                .quarantined_until
                .map(|until| until > now)
                .unwrap_or(false);
            if !quarantined {
                entry.next_index = (idx + 1) % n;
                let key = entry.keys[idx].key.clone();
                let fp = entry.keys[idx].fingerprint;
                return Some((
                    key,
                    LeaseToken {
                        provider: provider.to_string(),
                        fingerprint: fp,
                    },
                ));
            }
        }
        None
    }

    /// Mark the leased key unusable until `now + duration`. Persists the
    /// full quarantine map to disk (write-temp + atomic rename).
    pub async fn quarantine(&self, lease: &LeaseToken, duration: Duration) -> Result<()> {
        let until = Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default();
        {
            let mut providers = self.providers.lock();
            if let Some(entry) = providers.get_mut(&lease.provider) {
                if let Some(k) = entry.keys.iter_mut().find(|k| k.fingerprint == lease.fingerprint) {
                    // Monotonically non-decreasing (testable property #5):
                    // never shorten an existing quarantine.
                    k.quarantined_until = Some(match k.quarantined_until {
                        Some(existing) if existing > until => existing,
                        _ => until,
                    });
                }
            }
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let entries: Vec<QuarantineEntry> = {
            let providers = self.providers.lock();
            providers
                .iter()
                .flat_map(|(provider, pk)| {
                    pk.keys.iter().filter_map(move |k| {
                        k.quarantined_until.map(|until| QuarantineEntry {
                            provider: provider.clone(),
                            key_fingerprint: k.fingerprint.to_string(),
                            until_epoch: until.timestamp(),
                        })
                    })
                })
                .collect()
        };

        let json = serde_json::to_vec_pretty(&entries).map_err(Error::Json)?;
        if let Some(parent) = self.quarantine_file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }
        let tmp = self.quarantine_file.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp, &self.quarantine_file)
            .await
            .map_err(Error::Io)?;
        Ok(())
    }

    pub fn is_quarantined(&self, provider: &str, fingerprint: u64) -> bool {
        let providers = self.providers.lock();
        providers
            .get(provider)
            .and_then(|pk| pk.keys.iter().find(|k| k.fingerprint == fingerprint))
            .and_then(|k| k.quarantined_until)
            .map(|until| until > Utc::now())
            .unwrap_or(false)
    }
}

fn load_quarantine_file(path: &Path) -> Option<Vec<QuarantineEntry>> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(tmp: &Path) -> ProviderKeyManager {
        let mut keys = HashMap::new();
        keys.insert(
            "openrouter".to_string(),
            vec!["key-a".to_string(), "key-b".to_string()],
        );
        ProviderKeyManager::new(keys, tmp.join("quarantine.json"))
    }

    #[test]
    fn round_robins_across_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let (first, _) = mgr.acquire("openrouter").unwrap();
        let (second, _) = mgr.acquire("openrouter").unwrap();
        assert_ne!(first, second);
        let (third, _) = mgr.acquire("openrouter").unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn unknown_provider_has_no_key() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        assert!(mgr.acquire("nope").is_none());
    }

    #[tokio::test]
    async fn quarantined_key_is_skipped_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let (_key_a, lease_a) = mgr.acquire("openrouter").unwrap();
        mgr.quarantine(&lease_a, Duration::from_secs(3600)).await.unwrap();

        // Both subsequent acquires should skip key-a and return key-b.
        let (k1, _) = mgr.acquire("openrouter").unwrap();
        let (k2, _) = mgr.acquire("openrouter").unwrap();
        assert_eq!(k1, "key-b");
        assert_eq!(k2, "key-b");
    }

    #[tokio::test]
    async fn all_keys_quarantined_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let (_, lease_a) = mgr.acquire("openrouter").unwrap();
        let (_, lease_b) = mgr.acquire("openrouter").unwrap();
        mgr.quarantine(&lease_a, Duration::from_secs(3600)).await.unwrap();
        mgr.quarantine(&lease_b, Duration::from_secs(3600)).await.unwrap();
        assert!(mgr.acquire("openrouter").is_none());
    }

    #[tokio::test]
    async fn quarantine_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarantine.json");
        {
            let mut keys = HashMap::new();
            keys.insert("openrouter".to_string(), vec!["key-a".to_string()]);
            let mgr = ProviderKeyManager::new(keys, path.clone());
            let (_, lease) = mgr.acquire("openrouter").unwrap();
            mgr.quarantine(&lease, Duration::from_secs(3600)).await.unwrap();
        }

        // Reload: the restored quarantine should still apply.
        let mut keys = HashMap::new();
        keys.insert("openrouter".to_string(), vec!["key-a".to_string()]);
        let mgr = ProviderKeyManager::new(keys, path);
        assert!(mgr.acquire("openrouter").is_none());
    }

    #[tokio::test]
    async fn quarantine_deadline_never_shortened() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let (_, lease) = mgr.acquire("openrouter").unwrap();
        mgr.quarantine(&lease, Duration::from_secs(24 * 3600)).await.unwrap();
        // A shorter duration must not move the deadline earlier.
        mgr.quarantine(&lease, Duration::from_secs(60)).await.unwrap();
        let providers = mgr.providers.lock();
        let k = &providers.get("openrouter").unwrap().keys[0];
        let until = k.quarantined_until.unwrap();
        assert!(until > Utc::now() + chrono::Duration::hours(23));
    }
}
