//! # Handbook RAG
//!
//! A local retrieval engine for handbooks and textbooks. Instead of pasting
//! a whole document into an LLM prompt, index it once and pull in only the
//! few sections relevant to each question.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ Markdown │──▶│ Chunk + Dedupe   │──▶│ Embed batches │
//! │ / text   │   │ (heading-aware)  │   │ (optional)    │
//! └──────────┘   └──────────────────┘   └──────┬────────┘
//!                                              ▼
//!                 ┌──────────┐          ┌──────────────┐
//!                 │ Retriever│◀────────▶│ VersionStore │
//!                 │ vec/kw   │          │ cache dir    │
//!                 └────┬─────┘          └──────────────┘
//!                      ▼
//!                 ┌──────────┐
//!                 │ CLI (hbk)│
//!                 └──────────┘
//! ```
//!
//! The chunking, deduplication, vector index, and keyword search
//! algorithms live in the `handbook-rag-core` crate. This crate adds the
//! embedding providers, persistence, the retriever state machine, and the
//! CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! hbk index docs/student_handbook.md
//! hbk query student_handbook "how do I appeal a grade?"
//! hbk context student_handbook "attendance policy" --top-k 2
//! hbk savings docs/student_handbook.md "attendance policy"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, fastembed) |
//! | [`store`] | Versioned on-disk index store |
//! | [`cache`] | Bounded in-memory LRU |
//! | [`retriever`] | Index/query state machine |
//! | [`async_adapter`] | Tokio wrapper around the retriever |
//! | [`progress`] | Indexing progress reporting |
//! | [`tokens`] | Token estimates and savings |

pub mod async_adapter;
pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod progress;
pub mod retriever;
pub mod store;
pub mod tokens;
