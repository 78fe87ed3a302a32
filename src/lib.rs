//! # kb-override
//!
//! Knowledge retrieval with human answer overrides for chatbot platforms.
//!
//! A chatbot answers from its own private chunks plus any shared knowledge
//! bases linked to it. Before any search runs, the query is matched against
//! human-corrected answers recorded for that chatbot; a close enough match
//! is served verbatim and retrieval is skipped.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │  chunk JSONL │──▶│  retrieval-core   │◀──│   Embedding  │
//! │   (import)   │   │ scope·search·revs │   │ OpenAI/Ollama│
//! └──────────────┘   └────────┬─────────┘   └──────────────┘
//!                             │
//!                      ┌──────┴──────┐
//!                      ▼             ▼
//!                 ┌─────────┐   ┌─────────┐
//!                 │   CLI   │   │  HTTP   │
//!                 │  (kbo)  │   │ (axum)  │
//!                 └─────────┘   └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbo init
//! kbo chatbot create --user alice
//! kbo kb create --owner alice --name "Product docs"
//! kbo kb link <chatbot-id> <kb-id>
//! kbo chunks import ./chunks.jsonl
//! kbo query <chatbot-id> "what is the refund policy?"
//! kbo serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite backend for the retrieval-core store traits |
//! | [`embedding`] | HTTP embedding providers |
//! | [`engine`] | Cancellable retrieval engine |
//! | [`import`] | Chunk import from JSON Lines |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod import;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
