// Network collaborator: pluggable so tests can count and script fetches.

pub mod http_source;
pub mod traits;
