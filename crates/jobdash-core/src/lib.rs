use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

pub mod realtime;

/// Roster keyed by agent id. Replaced wholesale on every successful poll.
pub type Roster = BTreeMap<String, AgentRecord>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    #[serde(alias = "online")]
    Online,
    #[serde(alias = "offline")]
    Offline,
    #[serde(alias = "busy")]
    Busy,
    #[serde(alias = "idle")]
    Idle,
}

impl AgentStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, AgentStatus::Online)
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "online" => Ok(AgentStatus::Online),
            "offline" => Ok(AgentStatus::Offline),
            "busy" => Ok(AgentStatus::Busy),
            "idle" => Ok(AgentStatus::Idle),
            other => Err(format!("Unknown agent status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub status: AgentStatus,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl AgentRecord {
    pub fn new(id: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            id: id.into(),
            status,
            extra: HashMap::new(),
        }
    }
}

/// Builds a roster from a fetched list. Later duplicates of an id win.
pub fn roster_from_records(records: Vec<AgentRecord>) -> Roster {
    records
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect()
}

pub fn online_count<'a>(agents: impl IntoIterator<Item = &'a AgentRecord>) -> usize {
    agents
        .into_iter()
        .filter(|agent| agent.status.is_online())
        .count()
}

pub fn is_any_online<'a>(agents: impl IntoIterator<Item = &'a AgentRecord>) -> bool {
    online_count(agents) > 0
}

/// Deserialize an ID that can be either a string or a number into a String
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}
