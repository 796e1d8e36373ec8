//! Remote generation, storage and session sequencing for babymaker.

pub mod client;
pub mod config;
pub mod orchestrator;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use client::{client_from_config, GenerationClient, ReplicateClient};
pub use config::EngineConfig;
pub use orchestrator::{new_session_id, Orchestrator, SessionState};
pub use storage::{sink_from_config, StorageSink};
