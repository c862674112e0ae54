//! Stagehand: assemble, version and deploy multi-stage pipelines.
//!
//! Branch-driven environments. BLAKE3 build digests. Provenance event log.
//! Production workflows are never replaced.

pub mod cli;
pub mod core;
pub mod logging;
pub mod platform;
pub mod provenance;
pub mod resources;
pub mod vcs;
