//! Binary entry point: loads configuration, wires every component, loads
//! bootstrap agents, and drives a stdin ingress loop until EOF or ctrl-c
//! (spec §6 "process-wide control surface"; a network-facing gateway is out
//! of scope here — `UiGateway` is transport-agnostic and this binary is
//! simply its simplest consumer).

use clap::Parser;
use sa_orchestrator::config::{Config, ConfigSeverity, ProviderEntry};
use sa_orchestrator::{AgentLifecycle, CreateAgentSpec, CycleHandler, InteractionHandler, Orchestrator, UiGateway};
use sa_prompts::PromptAssembler;
use sa_providers::keys::ProviderKeyManager;
use sa_providers::openai_compat::OpenAiCompatProvider;
use sa_providers::perf::PerformanceTracker;
use sa_providers::registry::{ModelRegistry, ProviderSpec};
use sa_providers::traits::LlmProvider;
use sa_sessions::SessionManager;
use sa_state::StateManager;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

#[derive(Parser, Debug)]
#[command(name = "sa-orchestrator", about = "Multi-agent orchestration runtime")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: std::path::PathBuf,
}

fn provider_spec(entry: &ProviderEntry) -> ProviderSpec {
    ProviderSpec {
        id: entry.id.clone(),
        base_url: entry.base_url.clone(),
        is_local: entry.is_local,
        free_markers: entry.free_markers.clone(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(&args.config);

    let issues = config.validate();
    let mut has_errors = false;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Error => {
                has_errors = true;
                tracing::error!(%issue, "configuration error");
            }
            ConfigSeverity::Warning => {
                tracing::warn!(%issue, "configuration warning");
            }
        }
    }
    if has_errors {
        anyhow::bail!("refusing to start with invalid configuration");
    }

    let registry = Arc::new(ModelRegistry::new(
        config.providers.iter().map(provider_spec).collect(),
        config.model_tier.to_registry(),
    ));
    registry.refresh().await.ok();

    let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    for entry in &config.providers {
        let provider = OpenAiCompatProvider::new(entry.id.clone(), entry.base_url.clone())?;
        providers.insert(entry.id.clone(), Arc::new(provider));
    }

    let keys = Arc::new(ProviderKeyManager::new(
        config.resolve_provider_keys(),
        config.paths.data_dir.join("key_quarantine.json"),
    ));
    let perf = Arc::new(PerformanceTracker::new(
        config.paths.data_dir.join("model_metrics.json"),
        config.performance.alpha,
        config.performance.min_calls,
    ));
    let prompts = Arc::new(match &config.paths.prompt_templates_file {
        Some(path) => PromptAssembler::load(path).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load prompt templates, using built-in defaults");
            PromptAssembler::with_defaults()
        }),
        None => PromptAssembler::with_defaults(),
    });

    let state = Arc::new(StateManager::new());
    let lifecycle = Arc::new(AgentLifecycle::new(
        state.clone(),
        registry.clone(),
        perf.clone(),
        prompts.clone(),
        config.paths.sandbox_root.clone(),
        config.agent_limits.clone(),
    ));
    let interaction = Arc::new(InteractionHandler::new(state.clone(), lifecycle.clone()));
    let cycle = Arc::new(CycleHandler::new(
        keys.clone(),
        perf.clone(),
        registry.clone(),
        prompts.clone(),
        interaction,
        lifecycle.clone(),
        providers,
        config.max_failover_attempts,
    ));
    let sessions = Arc::new(SessionManager::new(config.paths.projects_root.clone()));
    let gateway = Arc::new(UiGateway::new());

    const ADMIN_AGENT_ID: &str = "admin_ai";
    let orchestrator = Orchestrator::new(config.clone(), state.clone(), lifecycle.clone(), cycle, sessions, gateway, ADMIN_AGENT_ID.to_string());

    let admin_provider = config.roles.admin_provider.clone();
    let admin_model = config.roles.admin_model.clone();
    let admin = lifecycle.create_agent(CreateAgentSpec {
        agent_id: Some(ADMIN_AGENT_ID.to_string()),
        persona: "Admin AI".to_string(),
        provider: admin_provider,
        model: admin_model,
        is_admin: true,
        phase: Some(sa_prompts::Phase::Planning),
        ..Default::default()
    })?;
    orchestrator.insert_agent(admin);

    if let Some(path) = &config.paths.bootstrap_agents_file {
        match sa_orchestrator::config::load_bootstrap_agents(path).await {
            Ok(specs) => {
                for spec in specs {
                    let create = CreateAgentSpec {
                        agent_id: Some(spec.agent_id),
                        persona: spec.persona,
                        provider: spec.provider,
                        model: spec.model,
                        system_prompt: spec.system_prompt,
                        temperature: spec.temperature,
                        team_id: None,
                        is_admin: false,
                        phase: None,
                    };
                    match lifecycle.create_agent(create) {
                        Ok(agent) => orchestrator.insert_agent(agent),
                        Err(e) => tracing::warn!(error = %e, "failed to instantiate bootstrap agent"),
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to load bootstrap agents file"),
        }
    }

    orchestrator.start_workers();
    tracing::info!(worker_pool_size = config.worker_pool_size(), "orchestrator started, reading user messages from stdin");

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(content)) if !content.trim().is_empty() => {
                        orchestrator.ingest_user_message(content).await;
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => {
                        tracing::info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "error reading stdin");
                        break;
                    }
                }
            }
        }
    }

    orchestrator.shutdown().await;
    perf.persist().await.ok();
    Ok(())
}
