// Resource resolution: cache-first lookup, network fallback and document rewriting.

pub mod resolver;
pub mod rewrite;
