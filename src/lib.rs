//! Downloads zipped e-learning modules, extracts them into a durable cache,
//! and serves them to an isolated rendering surface through a local server.

pub mod api;
pub mod archive;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod resolve;
pub mod server;
pub mod source;

pub use api::engine_api::{LaunchOutcome, ModuleEngine};
pub use api::init_tracing;
pub use config::{EngineConfig, EntryFailurePolicy, ResolvedConfig};
pub use error::{EngineError, Result};
