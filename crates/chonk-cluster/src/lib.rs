//! chonk-cluster — everything that talks to the orchestrator API.
//!
//! The [`ClusterClient`] trait is the seam between the control loops and
//! Kubernetes: [`KubeCluster`] implements it over a `kube::Client`, and
//! [`FakeCluster`] implements it over in-memory maps so every decision
//! path can be exercised without a cluster. Leader election lives here
//! too, as a Lease-based elector publishing leadership over a watch
//! channel.

pub mod claims;
pub mod client;
pub mod error;
pub mod fake;
pub mod kube_impl;
pub mod leases;

pub use client::{ClusterClient, EventRecord, EventSeverity};
pub use error::{ClusterError, ClusterResult};
pub use fake::FakeCluster;
pub use kube_impl::KubeCluster;
pub use leases::LeaseElector;
