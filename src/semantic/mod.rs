//! Local semantic index over saved items.
//!
//! # Architecture
//!
//! - `embeddings`: Embedding service contract and the fastembed implementation
//! - `index`: In-memory vector store keyed by item id
//! - `preprocess`: Semantic text of an item
//! - `signature`: Live-set fingerprint and the hit / incremental / rebuild plan
//! - `storage`: Binary snapshot persistence
//! - `hybrid`: Vector + keyword search ranking
//! - `centroids`: Robust folder centroids, suggestions and dispatch
//! - `cluster`: Two-phase clustering of captures with automatic names
//! - `pending`: Debounced change notifications
//! - `service`: The index session tying it all together

pub mod centroids;
pub mod cluster;
pub mod embeddings;
pub mod hybrid;
pub mod index;
pub mod pending;
pub mod preprocess;
mod service;
pub mod signature;
pub mod storage;

pub use centroids::{DispatchOutcome, FolderCentroid, NoSuggestion, Suggestion, SuggestionReport};
pub use cluster::{ClusterDraft, ClusterReport, ExistingGroup};
pub use embeddings::{Embedder, EmbeddingError, EmbeddingModel};
pub use hybrid::SearchHit;
pub use pending::{Clock, SystemClock};
pub use service::{IndexSession, SemanticError, Status, SyncReport};
