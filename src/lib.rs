//! Lingo Gateway
//!
//! Streaming backend between LLM agent runs and web clients:
//! - Redis Streams message queue with consumer groups and SSE fan-out
//! - Agent runtime client yielding a normalized chunk stream
//! - Chunk collectors that build the final translation artifact
//! - Task orchestrator applying the human-in-the-loop state machine
//! - Postgres-backed task/message/translation state store

pub mod agent;
pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod mq;
pub mod orchestrator;
pub mod segments;
pub mod store;
