//! Orchestrator-level configuration (spec §10.3): provider definitions,
//! per-role model assignment, tier, agent limits, paths, worker pool sizing,
//! quarantine/perf-tracker defaults. Mirrors the donor workspace's
//! severity-tagged `ConfigError{severity, field, message}` validation shape.

use sa_domain::error::{Error, Result};
use sa_providers::registry::ModelTier as RegistryModelTier;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelTierConfig {
    #[default]
    All,
    Free,
}

impl ModelTierConfig {
    pub fn to_registry(self) -> RegistryModelTier {
        match self {
            ModelTierConfig::All => RegistryModelTier::All,
            ModelTierConfig::Free => RegistryModelTier::Free,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    pub base_url: String,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub free_markers: Vec<String>,
    /// Env var prefix used to resolve round-robin keys: `<PREFIX>_API_KEY`,
    /// `<PREFIX>_API_KEY_2`, `<PREFIX>_API_KEY_3`, ... (spec §6).
    #[serde(default)]
    pub key_env_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolesConfig {
    #[serde(default)]
    pub admin_provider: Option<String>,
    #[serde(default)]
    pub admin_model: Option<String>,
    #[serde(default)]
    pub worker_provider: Option<String>,
    #[serde(default)]
    pub worker_model: Option<String>,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            admin_provider: None,
            admin_model: None,
            worker_provider: None,
            worker_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimitsConfig {
    #[serde(default = "d_max_agents")]
    pub max_agents: usize,
    #[serde(default = "d_max_teams")]
    pub max_teams: usize,
    #[serde(default = "d_default_temperature")]
    pub default_temperature: f32,
}

impl Default for AgentLimitsConfig {
    fn default() -> Self {
        Self {
            max_agents: d_max_agents(),
            max_teams: d_max_teams(),
            default_temperature: d_default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "d_sandbox_root")]
    pub sandbox_root: PathBuf,
    #[serde(default = "d_projects_root")]
    pub projects_root: PathBuf,
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub prompt_templates_file: Option<PathBuf>,
    #[serde(default)]
    pub bootstrap_agents_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sandbox_root: d_sandbox_root(),
            projects_root: d_projects_root(),
            data_dir: d_data_dir(),
            prompt_templates_file: None,
            bootstrap_agents_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineConfig {
    #[serde(default = "d_rate_limit_secs")]
    pub rate_limit_secs: u64,
    #[serde(default = "d_auth_secs")]
    pub auth_secs: u64,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: d_rate_limit_secs(),
            auth_secs: d_auth_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "d_alpha")]
    pub alpha: f64,
    #[serde(default = "d_min_calls")]
    pub min_calls: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            alpha: d_alpha(),
            min_calls: d_min_calls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    #[serde(default)]
    pub model_tier: ModelTierConfig,
    #[serde(default)]
    pub roles: RolesConfig,
    #[serde(default)]
    pub agent_limits: AgentLimitsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Worker pool size; `None` means the orchestrator defaults to
    /// `4 * num_cpus` (spec §5).
    #[serde(default)]
    pub worker_pool_size: Option<usize>,
    #[serde(default)]
    pub quarantine: QuarantineConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default = "d_max_failover_attempts")]
    pub max_failover_attempts: u32,
}

fn d_max_agents() -> usize {
    64
}
fn d_max_teams() -> usize {
    16
}
fn d_default_temperature() -> f32 {
    0.7
}
fn d_sandbox_root() -> PathBuf {
    PathBuf::from("./data/sandboxes")
}
fn d_projects_root() -> PathBuf {
    PathBuf::from("./projects")
}
fn d_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn d_rate_limit_secs() -> u64 {
    60 * 60
}
fn d_auth_secs() -> u64 {
    24 * 60 * 60
}
fn d_alpha() -> f64 {
    0.2
}
fn d_min_calls() -> u32 {
    3
}
fn d_max_failover_attempts() -> u32 {
    5
}

/// Severity level for a configuration issue (spec §10.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid config file: {e}")))
    }

    pub fn load_or_default(path: &std::path::Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Validate the configuration, returning every issue found (empty vec
    /// means the config is clean). Errors block startup; warnings are
    /// logged and startup continues.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "providers".into(),
                message: "no providers configured".into(),
            });
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if !provider.id.is_empty() && !seen_ids.insert(&provider.id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("providers[{i}].id"),
                    message: format!("duplicate provider id '{}'", provider.id),
                });
            }
            if !provider.base_url.starts_with("http://") && !provider.base_url.starts_with("https://") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got '{}')",
                        provider.base_url
                    ),
                });
            }
        }

        if self.agent_limits.max_agents == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "agent_limits.max_agents".into(),
                message: "max_agents must be greater than 0".into(),
            });
        }

        if let Some(0) = self.worker_pool_size {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "worker_pool_size".into(),
                message: "worker_pool_size, if set, must be greater than 0".into(),
            });
        }

        if self.max_failover_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "max_failover_attempts".into(),
                message: "max_failover_attempts must be greater than 0".into(),
            });
        }

        if let Some(path) = &self.paths.bootstrap_agents_file {
            if !path.exists() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "paths.bootstrap_agents_file".into(),
                    message: format!("bootstrap agents file '{}' does not exist", path.display()),
                });
            }
        } else {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "paths.bootstrap_agents_file".into(),
                message: "no bootstrap agents configured; only manually created agents will exist".into(),
            });
        }

        errors
    }

    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size.unwrap_or_else(|| 4 * num_cpus::get())
    }

    /// Resolve round-robin API keys for every provider from
    /// `<PREFIX>_API_KEY`, `<PREFIX>_API_KEY_2`, `<PREFIX>_API_KEY_3`, ...
    /// (spec §6 "Environment settings"). Providers with no resolvable key
    /// are simply absent from the result, not an error (local providers
    /// such as Ollama commonly need none).
    pub fn resolve_provider_keys(&self) -> HashMap<String, Vec<String>> {
        let mut out = HashMap::new();
        for provider in &self.providers {
            let prefix = provider
                .key_env_prefix
                .clone()
                .unwrap_or_else(|| provider.id.to_uppercase());
            let mut keys = Vec::new();
            if let Ok(first) = std::env::var(format!("{prefix}_API_KEY")) {
                if !first.is_empty() {
                    keys.push(first);
                }
            }
            let mut n = 2;
            while let Ok(next) = std::env::var(format!("{prefix}_API_KEY_{n}")) {
                if next.is_empty() {
                    break;
                }
                keys.push(next);
                n += 1;
            }
            if !keys.is_empty() {
                out.insert(provider.id.clone(), keys);
            }
        }
        out
    }
}

/// One entry of the bootstrap agent file (spec §6): agents instantiated at
/// startup before any user interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapAgentSpec {
    pub agent_id: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    pub persona: String,
}

pub async fn load_bootstrap_agents(path: &std::path::Path) -> Result<Vec<BootstrapAgentSpec>> {
    let raw = tokio::fs::read_to_string(path).await.map_err(Error::Io)?;
    serde_json::from_str(&raw).map_err(Error::Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_warns_on_empty_providers() {
        let cfg = Config::default();
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "providers" && e.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn duplicate_provider_ids_are_an_error() {
        let cfg = Config {
            providers: vec![
                ProviderEntry {
                    id: "openrouter".into(),
                    base_url: "https://openrouter.ai/api/v1".into(),
                    is_local: false,
                    free_markers: vec![],
                    key_env_prefix: None,
                },
                ProviderEntry {
                    id: "openrouter".into(),
                    base_url: "https://openrouter.ai/api/v1".into(),
                    is_local: false,
                    free_markers: vec![],
                    key_env_prefix: None,
                },
            ],
            ..Default::default()
        };
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error && e.message.contains("duplicate")));
    }

    #[test]
    fn non_http_base_url_is_an_error() {
        let cfg = Config {
            providers: vec![ProviderEntry {
                id: "local".into(),
                base_url: "file:///tmp".into(),
                is_local: true,
                free_markers: vec![],
                key_env_prefix: None,
            }],
            ..Default::default()
        };
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "providers[0].base_url"));
    }

    #[test]
    fn zero_max_agents_is_an_error() {
        let cfg = Config {
            agent_limits: AgentLimitsConfig {
                max_agents: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "agent_limits.max_agents" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn worker_pool_size_defaults_to_four_times_cpus() {
        let cfg = Config::default();
        assert_eq!(cfg.worker_pool_size(), 4 * num_cpus::get());
    }

    #[test]
    fn resolve_provider_keys_reads_numbered_env_vars() {
        std::env::set_var("TESTPROV_API_KEY", "key-one");
        std::env::set_var("TESTPROV_API_KEY_2", "key-two");
        let cfg = Config {
            providers: vec![ProviderEntry {
                id: "testprov".into(),
                base_url: "https://example.com".into(),
                is_local: false,
                free_markers: vec![],
                key_env_prefix: None,
            }],
            ..Default::default()
        };
        let keys = cfg.resolve_provider_keys();
        assert_eq!(keys.get("testprov").unwrap(), &vec!["key-one".to_string(), "key-two".to_string()]);
        std::env::remove_var("TESTPROV_API_KEY");
        std::env::remove_var("TESTPROV_API_KEY_2");
    }

    #[tokio::test]
    async fn load_bootstrap_agents_parses_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.json");
        tokio::fs::write(
            &path,
            r#"[{"agent_id": "admin_ai", "persona": "Admin"}]"#,
        )
        .await
        .unwrap();
        let specs = load_bootstrap_agents(&path).await.unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].agent_id, "admin_ai");
    }
}
