/// LLM completion port and providers
pub mod llm;
/// Vector store port and in-memory implementation
pub mod vector;

pub use llm::{provider_from_config, CompletionOptions, LlmProvider, ScriptedProvider};
pub use vector::{embed_text, MemoryVectorStore, SearchHit, VectorStore, EMBEDDING_DIM};
