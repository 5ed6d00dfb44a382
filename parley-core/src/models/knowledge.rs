use pgvector::Vector;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing status of a knowledge source, owned by the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Processing,
    Ready,
    Error,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Processing => "processing",
            SourceStatus::Ready => "ready",
            SourceStatus::Error => "error",
        }
    }
}

/// A chunk as read by the in-process similarity fallback.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KnowledgeChunk {
    pub id: Uuid,
    pub source_id: Uuid,
    pub title: String,
    pub chunk_index: i32,
    pub content: String,
    pub embedding: Option<Vector>,
    pub metadata: serde_json::Value,
}

/// One ranked retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeMatch {
    pub id: Uuid,
    pub text: String,
    pub title: String,
    pub score: f32,
    pub index: i32,
    pub metadata: serde_json::Value,
}
