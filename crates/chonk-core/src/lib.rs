//! chonk-core — the decision-making heart of pvc-chonker.
//!
//! Everything in this crate is pure computation: quantity parsing and
//! Gi-aligned size arithmetic, the annotation schema, the global and
//! per-claim expansion configuration, and the three-level policy merge
//! that produces an [`EffectiveConfig`] for a claim. No I/O happens here;
//! the controllers feed this crate what they listed from the cluster and
//! act on what it returns.

pub mod annotations;
pub mod config;
pub mod error;
pub mod quantity;
pub mod resolver;
pub mod sanitize;

pub use config::{ConfigTemplate, EffectiveConfig, GlobalConfig};
pub use error::{ConfigError, ExpansionError};
pub use resolver::{resolve, Resolution};
