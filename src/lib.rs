//! # Archie
//!
//! Retrieval-augmented chat over recent arXiv papers.
//!
//! Archie fetches papers from the public arXiv API, embeds their abstracts,
//! stores them in a vector collection, and lets a chat model search that
//! collection through a tool while answering questions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │  arXiv   │──▶│   load      │──▶│  Collection  │
//! │  (Atom)  │   │ batch+embed │   │ SQLite + vec │
//! └──────────┘   └─────────────┘   └──────┬───────┘
//!                                         │
//!                     ┌───────────────────┤
//!                     ▼                   ▼
//!                ┌──────────┐      ┌────────────┐
//!                │  search  │◀─────│    chat    │
//!                │          │ tool │ (Archie:>) │
//!                └──────────┘      └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Paper records |
//! | [`connector_arxiv`] | arXiv API client and Atom parsing |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`endpoint`] | OpenAI / Azure OpenAI endpoint resolution |
//! | [`store`] | Vector collection (SQLite, in-memory) |
//! | [`db`] | Database connection pool |
//! | [`ingest`] | `load` pipeline |
//! | [`progress`] | Load progress reporting |
//! | [`search`] | Semantic search |
//! | [`chat`] | Chat completion client and message types |
//! | [`tools`] | Tools callable by the chat model |
//! | [`chat_cmd`] | Conversation loop |

pub mod chat;
pub mod chat_cmd;
pub mod config;
pub mod connector_arxiv;
pub mod db;
pub mod embedding;
pub mod endpoint;
pub mod ingest;
pub mod models;
pub mod progress;
pub mod search;
pub mod store;
pub mod tools;
