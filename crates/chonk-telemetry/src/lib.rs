//! chonk-telemetry — volume usage samples from the node agents.
//!
//! Each node's agent exposes volume stats in the text exposition format.
//! The [`Collector`] fetches every node in parallel (first failure
//! cancels the rest — a partial view could mistake a missing sample for
//! a quiet volume), parses the four volume stat families, and merges the
//! result into a [`StatsCache`] that lives for exactly one
//! reconciliation cycle.

pub mod cache;
pub mod collector;
pub mod parse;

pub use cache::{StatsCache, VolumeStats};
pub use collector::{validate_agent_url, Collector, TelemetryError};
