//! # Telemetry Module
//!
//! Bridge status snapshots and their optional JSONL recording.
//!
//! This module handles:
//! - The [`BridgeStatus`](status::BridgeStatus) published after every tick
//! - Formatting snapshots as JSONL (JSON Lines)
//! - Writing to rotating log files (max N records per file)
//! - Retaining only the last M files

pub mod logger;
pub mod status;
