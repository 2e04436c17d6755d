//! # Research Brief
//!
//! Turns an analyst's question about listed retailers into a short,
//! citation-linked brief over a local corpus of annual reports and
//! announcements.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐  submit/poll  ┌──────────┐  pull/complete  ┌──────────┐
//! │ client │──────────────▶│  broker  │◀───────────────▶│  worker  │
//! └────────┘               │ (axum)   │                 └────┬─────┘
//!                          └──────────┘                      │
//!                                                            ▼
//!  lexical ─▶ resolver ─▶ pool ─▶ context ─▶ answer ─▶ citations
//!                           │         │
//!                           └────▶ SQLite corpus
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! brief init                          # create schema, seed the universe
//! brief ask "JBH outlook on gross margins"
//! brief serve                         # start the broker
//! brief work                          # start a worker
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`universe`] | Coverage universe of tickers, legal names and aliases |
//! | [`lexical`] | Tokenizing and term matching |
//! | [`classify`] | Company-specific vs sector question classification |
//! | [`resolver`] | Static and open-world company resolution |
//! | [`pool`] | Candidate pool building and ranking |
//! | [`layouts`] | Chunk storage layouts probed in order |
//! | [`counts`] | Rebuild of the per-document company mention index |
//! | [`context`] | Positional sources and prompt context |
//! | [`citations`] | Answer parsing, validation and linking |
//! | [`pipeline`] | End-to-end `search` and `expand_bullet` |
//! | [`jobs`] | Job table behind the broker |
//! | [`server`] | Broker HTTP server |
//! | [`worker`] | Pull-based worker loop |
//! | [`llm`] | Chat-completions collaborators |

pub mod citations;
pub mod classify;
pub mod commands;
pub mod config;
pub mod context;
pub mod corpus;
pub mod counts;
pub mod db;
pub mod jobs;
pub mod layouts;
pub mod lexical;
pub mod links;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod qalog;
pub mod resolver;
pub mod server;
pub mod traits;
pub mod universe;
pub mod worker;
