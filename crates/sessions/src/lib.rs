//! SessionManager (C10, spec §4.10): snapshot/restore teams and agents
//! (config + history) to a single JSON file per session.

mod schema;

pub use schema::{AgentSnapshot, SessionFile, TeamSnapshot, SCHEMA_VERSION};

use sa_domain::agent::{Agent, Team};
use sa_domain::error::{Error, Result};
use std::path::{Path, PathBuf};

pub struct SessionManager {
    base_dir: PathBuf,
}

impl SessionManager {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn path_for(&self, project: &str, session: &str) -> PathBuf {
        self.base_dir.join(project).join(format!("{session}.json"))
    }

    /// Serialise the current team/agent tables and write-temp + rename into
    /// `projects/<project>/<session>.json` (spec §6 "Session file layout").
    pub async fn save(&self, project: &str, session: &str, teams: &[Team], agents: &[Agent]) -> Result<()> {
        let file = SessionFile {
            schema_version: SCHEMA_VERSION,
            created_at: chrono::Utc::now().to_rfc3339(),
            teams: teams
                .iter()
                .map(|t| TeamSnapshot {
                    id: t.team_id.clone(),
                    members: t.members.clone(),
                })
                .collect(),
            agents: agents
                .iter()
                .map(|a| AgentSnapshot {
                    id: a.config.agent_id.clone(),
                    config: a.config.clone(),
                    team: team_of(teams, &a.config.agent_id),
                    history: a.history.clone(),
                })
                .collect(),
        };

        let path = self.path_for(project, session);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }
        let json = serde_json::to_vec_pretty(&file).map_err(Error::Json)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp, &path).await.map_err(Error::Io)?;
        Ok(())
    }

    /// Load and validate a session file. Reconstructs agents in `Idle` state
    /// with fresh sandbox paths under `sandbox_root`; providers and any
    /// other live objects are never part of the snapshot.
    ///
    /// Atomic: a parse or validation failure leaves nothing for the caller
    /// to apply — the in-memory state the caller holds is simply never
    /// touched (spec §4.10 "Load is atomic").
    pub async fn load(&self, project: &str, session: &str, sandbox_root: &Path) -> Result<(Vec<Team>, Vec<Agent>)> {
        let path = self.path_for(project, session);
        let bytes = tokio::fs::read(&path).await.map_err(Error::Io)?;
        let file: SessionFile = serde_json::from_slice(&bytes).map_err(Error::Json)?;

        if file.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "session file schema_version {} is newer than supported {}",
                file.schema_version, SCHEMA_VERSION
            )));
        }

        let teams: Vec<Team> = file
            .teams
            .into_iter()
            .map(|t| Team {
                team_id: t.id,
                members: t.members,
            })
            .collect();

        let agents: Vec<Agent> = file
            .agents
            .into_iter()
            .map(|a| {
                let mut agent = Agent::new(a.config, sandbox_root.join(&a.id));
                agent.history = a.history;
                agent
            })
            .collect();

        Ok((teams, agents))
    }

    pub fn list_sessions(&self, project: &str) -> Result<Vec<String>> {
        let dir = self.base_dir.join(project);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn team_of(teams: &[Team], agent_id: &str) -> Option<String> {
    teams
        .iter()
        .find(|t| t.members.iter().any(|m| m == agent_id))
        .map(|t| t.team_id.clone())
}
