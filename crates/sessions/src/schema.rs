//! On-disk session file shape (spec §6 "Session file layout"). Unknown
//! fields are ignored on load; any field marked required below fails the
//! load if absent, since `serde` rejects missing non-`Option` fields.

use sa_domain::agent::AgentConfig;
use sa_domain::message::Message;
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub id: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub config: AgentConfig,
    #[serde(default)]
    pub team: Option<String>,
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFile {
    pub schema_version: u32,
    pub created_at: String,
    pub teams: Vec<TeamSnapshot>,
    pub agents: Vec<AgentSnapshot>,
}
