pub mod bridge;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod models;
pub mod pairing;
pub mod retry;
pub mod similarity;

pub use config::ParleyConfig;
pub use embeddings::{
    create_embedding_backend, EmbeddingBackend, EmbeddingError, GeminiEmbeddingClient,
    GeminiEmbeddingConfig, TaskType,
};
pub use error::{ParleyError, StoreError, TransportError};
pub use generation::{
    create_generation_backend, GeminiGenerationClient, GeminiGenerationConfig,
    GenerationBackend, GenerationError,
};
pub use models::AccountContext;
pub use retry::{best_effort, RetryPolicy};
pub use similarity::{cosine_similarity, SENTINEL_LOW};
