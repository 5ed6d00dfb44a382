//! Knowledge retrieval for grounded replies.
//!
//! `KnowledgeRetriever::search`:
//! - Embeds the query with `TaskType::RetrievalQuery`
//! - Prefers server-side pgvector nearest-neighbour search in the scope
//! - Falls back to scanning ready chunks (capped) and ranking by cosine in process
//! - Returns top-K matches ordered by score (highest first)
//!
//! Every failure degrades to an empty list. Callers never see an error.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::config::RetrievalConfig;
use parley_core::embeddings::EmbeddingBackend;
use parley_core::models::{KnowledgeChunk, KnowledgeMatch, SourceStatus};
use parley_core::similarity::score_optional;
use parley_core::StoreError;
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Which knowledge a search may see. Shared (account-less) sources of the
/// organization are always in scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchScope {
    pub organization_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
}

/// Read side of the knowledge base. Only chunks of `ready` sources are visible.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn organization_for_account(&self, account_id: Uuid) -> Result<Option<Uuid>, StoreError>;

    async fn nearest(
        &self,
        organization_id: Uuid,
        account_id: Option<Uuid>,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>, StoreError>;

    async fn ready_chunks(
        &self,
        organization_id: Uuid,
        account_id: Option<Uuid>,
        cap: i64,
    ) -> Result<Vec<KnowledgeChunk>, StoreError>;
}

pub struct KnowledgeRetriever {
    embedder: Arc<dyn EmbeddingBackend>,
    source: Arc<dyn ChunkSource>,
    config: RetrievalConfig,
}

impl KnowledgeRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingBackend>,
        source: Arc<dyn ChunkSource>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            source,
            config,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.config.top_k
    }

    pub async fn search(&self, query: &str, top_k: usize, scope: &SearchScope) -> Vec<KnowledgeMatch> {
        if top_k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let Some(organization_id) = self.resolve_organization(scope).await else {
            tracing::debug!(?scope, "No organization in scope, skipping retrieval");
            return Vec::new();
        };

        let vector = match self.bounded(self.embedder.embed_query(query)).await {
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                tracing::warn!(backend = self.embedder.name(), error = %e, "Query embedding failed");
                return Vec::new();
            }
            None => {
                tracing::warn!(backend = self.embedder.name(), "Query embedding timed out");
                return Vec::new();
            }
        };
        if vector.len() != self.embedder.dimensions() {
            tracing::warn!(
                backend = self.embedder.name(),
                expected = self.embedder.dimensions(),
                actual = vector.len(),
                "Query embedding has the wrong dimensionality"
            );
            return Vec::new();
        }

        if self.config.use_server_side_search {
            match self
                .bounded(self.source.nearest(organization_id, scope.account_id, &vector, top_k))
                .await
            {
                Some(Ok(matches)) => return finalize(matches, top_k),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Nearest-neighbour search failed, scanning in process")
                }
                None => tracing::warn!("Nearest-neighbour search timed out, scanning in process"),
            }
        }

        let cap = self.config.fallback_scan_limit;
        match self
            .bounded(self.source.ready_chunks(organization_id, scope.account_id, cap))
            .await
        {
            Some(Ok(chunks)) => {
                if chunks.len() as i64 >= cap {
                    tracing::warn!(cap = cap, "Fallback scan hit its cap; recall may be truncated");
                }
                rank_chunks(&vector, &chunks, top_k)
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Failed to load knowledge chunks");
                Vec::new()
            }
            None => {
                tracing::warn!("Loading knowledge chunks timed out");
                Vec::new()
            }
        }
    }

    async fn resolve_organization(&self, scope: &SearchScope) -> Option<Uuid> {
        if let Some(org) = scope.organization_id {
            return Some(org);
        }
        let account_id = scope.account_id?;
        match self.bounded(self.source.organization_for_account(account_id)).await {
            Some(Ok(org)) => org,
            Some(Err(e)) => {
                tracing::warn!(account_id = %account_id, error = %e, "Organization lookup failed");
                None
            }
            None => None,
        }
    }

    /// `None` on timeout.
    async fn bounded<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        let limit = Duration::from_secs(self.config.search_timeout_seconds);
        tokio::time::timeout(limit, fut).await.ok()
    }
}

/// In-process ranking: cosine per chunk, drop non-positive, sort, truncate.
pub fn rank_chunks(query: &[f32], chunks: &[KnowledgeChunk], top_k: usize) -> Vec<KnowledgeMatch> {
    let matches = chunks
        .iter()
        .map(|chunk| KnowledgeMatch {
            id: chunk.id,
            text: chunk.content.clone(),
            title: chunk.title.clone(),
            score: score_optional(query, chunk.embedding.as_ref().map(|v| v.as_slice())),
            index: chunk.chunk_index,
            metadata: chunk.metadata.clone(),
        })
        .collect();
    finalize(matches, top_k)
}

fn finalize(mut matches: Vec<KnowledgeMatch>, top_k: usize) -> Vec<KnowledgeMatch> {
    matches.retain(|m| m.score > 0.0);
    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    matches.truncate(top_k);
    matches
}

// ============================================================================
// Postgres source
// ============================================================================

pub struct PgChunkSource {
    pool: PgPool,
}

impl PgChunkSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct NearestRow {
    id: Uuid,
    content: String,
    title: String,
    score: f64,
    chunk_index: i32,
    metadata: serde_json::Value,
}

#[async_trait]
impl ChunkSource for PgChunkSource {
    async fn organization_for_account(&self, account_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let org: Option<Uuid> = sqlx::query_scalar(
            "SELECT organization_id FROM accounts WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(org)
    }

    async fn nearest(
        &self,
        organization_id: Uuid,
        account_id: Option<Uuid>,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>, StoreError> {
        let rows = sqlx::query_as::<_, NearestRow>(
            "SELECT c.id, c.content, s.title, c.chunk_index, c.metadata,
                    1 - (c.embedding <=> $1) AS score
             FROM knowledge_chunks c
             JOIN knowledge_sources s ON s.id = c.source_id
             WHERE s.organization_id = $2
               AND s.status = $3
               AND ($4::uuid IS NULL OR s.account_id = $4 OR s.account_id IS NULL)
               AND c.embedding IS NOT NULL
             ORDER BY c.embedding <=> $1
             LIMIT $5",
        )
        .bind(Vector::from(query.to_vec()))
        .bind(organization_id)
        .bind(SourceStatus::Ready.as_str())
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| KnowledgeMatch {
                id: r.id,
                text: r.content,
                title: r.title,
                score: r.score as f32,
                index: r.chunk_index,
                metadata: r.metadata,
            })
            .collect())
    }

    async fn ready_chunks(
        &self,
        organization_id: Uuid,
        account_id: Option<Uuid>,
        cap: i64,
    ) -> Result<Vec<KnowledgeChunk>, StoreError> {
        let chunks = sqlx::query_as::<_, KnowledgeChunk>(
            "SELECT c.id, c.source_id, s.title, c.chunk_index, c.content, c.embedding, c.metadata
             FROM knowledge_chunks c
             JOIN knowledge_sources s ON s.id = c.source_id
             WHERE s.organization_id = $1
               AND s.status = $2
               AND ($3::uuid IS NULL OR s.account_id = $3 OR s.account_id IS NULL)
             ORDER BY s.created_at, c.chunk_index
             LIMIT $4",
        )
        .bind(organization_id)
        .bind(SourceStatus::Ready.as_str())
        .bind(account_id)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;
        Ok(chunks)
    }
}
