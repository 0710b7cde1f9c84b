//! Scenario definitions: reusable participant rosters bound to conversations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::ParticipantKind;

/// One seat in a scenario.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioAgent {
    /// Agent id the runtime participant must use.
    pub agent_id: String,
    /// Internal or external.
    #[serde(default)]
    pub kind: ParticipantKind,
    /// Role label shown to participants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// A scenario: ordered agent roster plus opaque configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Stable id referenced from conversation metadata.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Agents in scheduling order.
    pub agents: Vec<ScenarioAgent>,
    /// Scenario-specific settings, stored verbatim.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

impl Scenario {
    /// Agent ids in scheduling order.
    pub fn agent_ids(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.agent_id.as_str()).collect()
    }

    /// Agent ids present on exactly one side of the comparison.
    pub fn roster_mismatch<'a>(&'a self, runtime_ids: &[&'a str]) -> Vec<&'a str> {
        let ours = self.agent_ids();
        let mut diff: Vec<&str> = Vec::new();
        for id in &ours {
            if !runtime_ids.contains(id) {
                diff.push(*id);
            }
        }
        for id in runtime_ids {
            if !ours.contains(id) {
                diff.push(*id);
            }
        }
        diff.sort_unstable();
        diff.dedup();
        diff
    }
}
