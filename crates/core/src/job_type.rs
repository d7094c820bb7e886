//! Job type: the routing key that selects a handler for a task.

use serde::{Deserialize, Serialize};

/// Kind of domain operation a task runs.
///
/// The well-known variants cover the operations the engine ships handlers
/// for; `Other` keeps the wire format open so new job types can be enqueued
/// before a matching handler is deployed (such messages fail at execution
/// time with a descriptive error rather than at deserialization time).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Ingest one episode (document/message) into the knowledge base.
    EpisodeIngest,
    /// Rebuild community groupings over the existing graph.
    CommunityRebuild,
    /// Any other routing key, carried verbatim.
    #[serde(untagged)]
    Other(String),
}

impl JobType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EpisodeIngest => "episode_ingest",
            Self::CommunityRebuild => "community_rebuild",
            Self::Other(s) => s,
        }
    }
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        match s {
            "episode_ingest" => Self::EpisodeIngest,
            "community_rebuild" => Self::CommunityRebuild,
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobType::EpisodeIngest).unwrap(),
            "\"episode_ingest\""
        );
        assert_eq!(
            serde_json::to_string(&JobType::CommunityRebuild).unwrap(),
            "\"community_rebuild\""
        );
    }

    #[test]
    fn unknown_type_is_carried_verbatim() {
        let jt: JobType = serde_json::from_str("\"entity_dedupe\"").unwrap();
        assert_eq!(jt, JobType::Other("entity_dedupe".to_string()));
        assert_eq!(serde_json::to_string(&jt).unwrap(), "\"entity_dedupe\"");
    }

    #[test]
    fn from_str_matches_wire_names() {
        assert_eq!(JobType::from("episode_ingest"), JobType::EpisodeIngest);
        assert_eq!(JobType::from("community_rebuild"), JobType::CommunityRebuild);
        assert_eq!(JobType::EpisodeIngest.as_str(), "episode_ingest");
    }
}
