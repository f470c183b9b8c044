//! Collects listing posts from paginated group feeds, extracts contact and
//! commerce facts from their text, and accumulates them per query across runs.

pub mod collector;
pub mod config;
pub mod error;
pub mod extract;
pub mod harvester;
pub mod model;
pub mod queue;
pub mod run_log;
pub mod session;
pub mod store;
pub mod targets;
