// Engine orchestration: acquisition, progress reporting and rendering sessions.

pub mod catalog;
pub mod context;
pub mod handles;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod stats;
