//! # handbook-rag core
//!
//! Pure retrieval logic for handbook-rag: data models, the heading-aware
//! chunker, deduplication, keyword fallback search, the embedding port
//! trait, and the flat vector index.
//!
//! Nothing here knows about configuration, embedding providers, or the
//! cache directory layout. The only filesystem access is the vector
//! index's own `save`/`load`.

pub mod chunk;
pub mod dedupe;
pub mod embedding;
pub mod index;
pub mod keyword;
pub mod models;
