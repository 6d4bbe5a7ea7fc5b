//! Remote memory for AI coding assistants — files, semantic search, reminders,
//! conversation history, and agentic self-maintenance, served over MCP.
//!
//! Mnemo is a self-hosted [MCP](https://modelcontextprotocol.io/) server that
//! gives coding assistants a durable memory: markdown files in a versioned
//! object store, indexed into an in-memory HNSW graph for semantic search,
//! plus scheduled reminders, indexed past conversations, a sandboxed query
//! surface, and a daily two-phase reflection pass that proposes and stages
//! edits for human review.
//!
//! # Architecture
//!
//! - **Storage**: a versioned object store (filesystem backend) for memory
//!   files, plus SQLite for the persistent embedding table
//! - **Search**: in-memory HNSW over unit vectors, rebuilt from SQLite on
//!   start, with optional time-weighted ranking
//! - **Transport**: JSON-RPC 2.0 over HTTP at `/mcp`, bearer-token auth
//! - **Reflection**: a quick-scan auto-fixer and a deep-analysis proposer,
//!   both bounded tool-calling LLM loops, staging edits under
//!   `memory/reflections/pending/`
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`store`] — Versioned object store trait and filesystem backend
//! - [`embedding`] — Text-to-unit-vector providers (remote HTTP, deterministic)
//! - [`index`] — HNSW vector index and the single-writer index service
//! - [`reminders`] — One-shot and cron reminders with poll-driven firing
//! - [`conversations`] — Incremental chat-session indexing into exchanges
//! - [`sandbox`] — Bounded query DSL over the read-only memory surface
//! - [`llm`] — Chat-completion client with function calling
//! - [`reflection`] — Staged reflection documents and the agentic controller
//! - [`server`] — HTTP server, auth, and the JSON-RPC tool endpoint

pub mod config;
pub mod conversations;
pub mod daily;
pub mod embedding;
pub mod index;
pub mod llm;
pub mod notify;
pub mod reflection;
pub mod reminders;
pub mod rpc;
pub mod sandbox;
pub mod server;
pub mod store;
pub mod tools;
