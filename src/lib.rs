//! # Lectern
//!
//! A retrieval-augmented question answering system for course materials.
//!
//! Lectern ingests course documents (structured text, PDF, DOCX), chunks and
//! embeds them into a SQLite-backed vector store, and answers questions by
//! letting an LLM drive a semantic search tool over the indexed content.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │ Documents │──▶│ Parse+Chunk  │──▶│  SQLite    │
//! │ txt/pdf/  │   │   +Embed     │   │ catalog +  │
//! │ docx      │   └──────────────┘   │ chunks     │
//! └───────────┘                      └─────┬─────┘
//!                                          │
//!                   ┌──────────────────────┤
//!                   ▼                      ▼
//!             ┌───────────┐         ┌───────────┐
//!             │ Generator │◀─tools─▶│  Search    │
//!             │ (LLM loop)│         │  tool      │
//!             └─────┬─────┘         └───────────┘
//!                   ▼
//!           CLI (lectern) / HTTP API
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lectern init                        # create database
//! lectern ingest ./docs               # index course documents
//! lectern query "What does lesson 1 of the MCP course cover?"
//! lectern serve                       # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction from txt/PDF/DOCX files |
//! | [`processor`] | Course document parsing and chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Dual-collection vector store |
//! | [`tools`] | Model-facing tool registry and search tool |
//! | [`generator`] | LLM client and tool-use loop |
//! | [`session`] | Bounded conversation history |
//! | [`rag`] | Query and ingestion orchestration |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connection |

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generator;
pub mod models;
pub mod processor;
pub mod rag;
pub mod server;
pub mod session;
pub mod store;
pub mod tools;
