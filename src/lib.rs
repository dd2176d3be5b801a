//! # Travel RAG
//!
//! A retrieval-augmented travel assistant: ingest travel guides, index
//! their chunks by embedding, and answer questions, plan trips and
//! summarise destinations with answers that cite the passages they came
//! from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunker │──▶│ Embedding │──▶│ Vector index │◀─┐
//! │ txt/pdf… │   └─────────┘   │  gateway  │   │  + SQLite    │  │
//! └──────────┘                 └───────────┘   └──────────────┘  │
//!                                                                │
//!  query ──▶ Retriever ──▶ Prompt assembler ──▶ Generation ──▶ answer
//!              (embedding gateway)              gateway
//! ```
//!
//! The pure pipeline (chunking, index, retrieval, assembly, error
//! taxonomy) lives in the `travel-rag-core` crate. This crate adds I/O:
//! file loading, SQLite persistence, HTTP gateways with a bounded retry
//! pool, the query service, the axum server and the `trag` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! trag init                                   # create database
//! trag seed                                   # load the sample travel guides
//! trag ingest ./guides --meta destination=Lisbon
//! trag ask "best time to visit Bali"
//! trag plan --destination Paris --duration 3 --interest museums
//! trag serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`loader`] | Files and directories into documents |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`embedding`] | Embedding gateways (hashing, OpenAI, Ollama, local) |
//! | [`generation`] | Generation gateways (extractive, OpenAI, Ollama) |
//! | [`gateway`] | Concurrency pool, timeouts and retries for gateways |
//! | [`ingest`] | Ingestion pipeline with per-document reports |
//! | [`store`] | SQLite persistence of documents, chunks and vectors |
//! | [`service`] | Query, plan, destination and stats operations |
//! | [`travel`] | Trip preferences and the sample corpus |
//! | [`server`] | HTTP API |
//! | [`app`] | Wiring everything together |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | Tracing subscriber setup |

pub mod app;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod gateway;
pub mod generation;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod service;
pub mod store;
pub mod travel;
