//! The pbscan engine: extraction contract, relation analysis, the
//! SQLite-backed IR store with its query surface and run differ, and the
//! orchestrator that ties a run together under the fail-soft policy.

pub mod analyzer;
pub mod config;
pub mod extract;
pub mod runner;
pub mod store;
