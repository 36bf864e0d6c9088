//! StateManager (C6, spec §4.6): a pure in-memory index of teams and
//! agent-to-team membership. Every operation, including the compound
//! "remove agent from its team" step that agent deletion requires, runs
//! under a single lock so no caller ever observes a half-updated index.

use parking_lot::Mutex;
use sa_domain::error::{Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct Index {
    /// Insertion-ordered membership list per team (a `Vec` behaves as the
    /// spec's `orderedSet` here: membership is checked before insertion).
    teams: HashMap<String, Vec<String>>,
    agent_team: HashMap<String, Option<String>>,
}

pub struct StateManager {
    index: Mutex<Index>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            index: Mutex::new(Index::default()),
        }
    }

    /// Idempotent: creating a team that already exists is a no-op success
    /// (spec §4.5 "`create_team` is idempotent").
    pub fn create_team(&self, team_id: &str) {
        let mut index = self.index.lock();
        index.teams.entry(team_id.to_string()).or_default();
    }

    /// Removes the team and clears membership for every agent that was in
    /// it (they become unassigned, not deleted).
    pub fn delete_team(&self, team_id: &str) -> Result<()> {
        let mut index = self.index.lock();
        let members = index
            .teams
            .remove(team_id)
            .ok_or_else(|| Error::Other(format!("no such team '{team_id}'")))?;
        for member in members {
            index.agent_team.insert(member, None);
        }
        Ok(())
    }

    pub fn team_exists(&self, team_id: &str) -> bool {
        self.index.lock().teams.contains_key(team_id)
    }

    pub fn list_teams(&self) -> Vec<String> {
        let mut names: Vec<String> = self.index.lock().teams.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_members(&self, team_id: &str) -> Vec<String> {
        self.index.lock().teams.get(team_id).cloned().unwrap_or_default()
    }

    pub fn list_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.lock().agent_team.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn agent_exists(&self, agent_id: &str) -> bool {
        self.index.lock().agent_team.contains_key(agent_id)
    }

    pub fn team_of(&self, agent_id: &str) -> Option<String> {
        self.index.lock().agent_team.get(agent_id).cloned().flatten()
    }

    /// Register a freshly created agent, optionally placing it in a team
    /// that is created on demand if it doesn't exist yet.
    pub fn register_agent(&self, agent_id: &str, team_id: Option<&str>) {
        let mut index = self.index.lock();
        if let Some(team_id) = team_id {
            let members = index.teams.entry(team_id.to_string()).or_default();
            if !members.iter().any(|m| m == agent_id) {
                members.push(agent_id.to_string());
            }
            index.agent_team.insert(agent_id.to_string(), Some(team_id.to_string()));
        } else {
            index.agent_team.insert(agent_id.to_string(), None);
        }
    }

    /// Remove the agent from its team (if any) and drop its membership
    /// record entirely. Called by `AgentLifecycle::delete_agent` before the
    /// sandbox is purged.
    pub fn deregister_agent(&self, agent_id: &str) {
        let mut index = self.index.lock();
        if let Some(Some(team_id)) = index.agent_team.remove(agent_id) {
            if let Some(members) = index.teams.get_mut(&team_id) {
                members.retain(|m| m != agent_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_team_is_idempotent() {
        let sm = StateManager::new();
        sm.create_team("t1");
        sm.create_team("t1");
        assert_eq!(sm.list_teams(), vec!["t1".to_string()]);
    }

    #[test]
    fn register_agent_joins_team_once() {
        let sm = StateManager::new();
        sm.create_team("t1");
        sm.register_agent("a1", Some("t1"));
        sm.register_agent("a1", Some("t1"));
        assert_eq!(sm.list_members("t1"), vec!["a1".to_string()]);
        assert_eq!(sm.team_of("a1"), Some("t1".to_string()));
    }

    #[test]
    fn deregister_agent_removes_from_team() {
        let sm = StateManager::new();
        sm.create_team("t1");
        sm.register_agent("a1", Some("t1"));
        sm.deregister_agent("a1");
        assert!(sm.list_members("t1").is_empty());
        assert!(!sm.agent_exists("a1"));
    }

    #[test]
    fn delete_team_unassigns_its_members() {
        let sm = StateManager::new();
        sm.create_team("t1");
        sm.register_agent("a1", Some("t1"));
        sm.delete_team("t1").unwrap();
        assert_eq!(sm.team_of("a1"), None);
        assert!(!sm.team_exists("t1"));
    }

    #[test]
    fn delete_unknown_team_errors() {
        let sm = StateManager::new();
        assert!(sm.delete_team("ghost").is_err());
    }

    #[test]
    fn unassigned_agent_has_no_team() {
        let sm = StateManager::new();
        sm.register_agent("a1", None);
        assert_eq!(sm.team_of("a1"), None);
        assert!(sm.agent_exists("a1"));
    }
}
