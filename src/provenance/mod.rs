//! Build provenance: content digests and the JSONL build log.

pub mod eventlog;
pub mod hasher;
