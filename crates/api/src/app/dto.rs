//! Request/response DTOs.

use serde::Deserialize;
use uuid::Uuid;

use loreforge_core::{EntityId, RelatedEntity};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub job_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub related_entity: Option<RelatedEntityRequest>,
}

#[derive(Debug, Deserialize)]
pub struct RelatedEntityRequest {
    pub entity_id: Uuid,
    pub entity_type: String,
}

impl From<RelatedEntityRequest> for RelatedEntity {
    fn from(value: RelatedEntityRequest) -> Self {
        RelatedEntity::new(EntityId::from_uuid(value.entity_id), value.entity_type)
    }
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub entity_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub limit: Option<usize>,
}
