//! Clients for the captioning, embedding and vector-store services.
//!
//! Each service sits behind a trait so the worker can run against the HTTP
//! clients in production and against in-memory fakes in tests.

pub mod captioner;
pub mod config;
pub mod embedder;
pub mod error;
pub mod vector_store;

pub use captioner::{Captioner, OllamaCaptioner};
pub use config::MlClientConfig;
pub use embedder::{Embedder, OllamaEmbedder};
pub use error::{MlError, MlResult};
pub use vector_store::{ChromaVectorStore, FrameRecord, InMemoryVectorStore, VectorStore};
