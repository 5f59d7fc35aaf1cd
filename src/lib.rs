//! # pdfchat
//!
//! Multi-tenant PDF workspaces with retrieval-augmented chat.
//!
//! Users upload PDFs into workspaces; pages are stored with their text and
//! rendered rasters, chunked, embedded, and searched by cosine similarity to
//! ground answers from a chat model. When a workspace has no embeddings the
//! first pages of each document are used as context instead.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │   Upload    │──▶│  Chunk +    │──▶│  SQLite   │
//! │ pages / PDF │   │  Embed      │   │ rows+vecs │
//! └──────┬──────┘   └─────────────┘   └────┬─────┘
//!        ▼                                 │
//!  ┌───────────┐      ┌───────────────────┤
//!  │  Objects  │      ▼                   ▼
//!  │  FS / S3  │ ┌──────────┐       ┌──────────┐
//!  └───────────┘ │   CLI    │       │   HTTP   │
//!                │ (pdfchat)│       │  (axum)  │
//!                └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pdfchat init
//! pdfchat --user alice workspace create "Contracts"
//! pdfchat --user alice upload <workspace-id> ./lease.pdf
//! pdfchat --user alice ask <workspace-id> "When does the lease end?"
//! pdfchat serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Domain error type |
//! | [`auth`] | Session token minting and verification |
//! | [`workspace`] | Workspaces and membership |
//! | [`ingest`] | Document upload and page storage |
//! | [`extract`] | Server-side PDF text extraction |
//! | [`documents`] | Document queries and deletion |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_cmd`] | Per-document chunk embedding |
//! | [`search`] | Vector search and context assembly |
//! | [`llm`] | Chat model providers |
//! | [`chat`] | Chat turns and history |
//! | [`duplicates`] | Fingerprint and similarity detection |
//! | [`usage`] | Daily usage counters |
//! | [`storage`] | Object storage backends |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod documents;
pub mod duplicates;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod storage;
pub mod usage;
pub mod workspace;
