//! chonk-api — the `pvc-chonker.io/v1alpha1` custom resource types.
//!
//! `PVCPolicy` maps a label selector to a partial expansion template;
//! `PVCGroup` names a set of claims (membership is annotation-based)
//! that must grow together. Both are namespace-scoped and carry a
//! controller-maintained status subresource.

pub mod selector;
pub mod v1alpha1;

pub use selector::{LabelSelector, LabelSelectorRequirement, SelectorOperator};
pub use v1alpha1::{
    PVCGroup, PVCGroupSpec, PVCGroupStatus, PVCPolicy, PVCPolicySpec, PVCPolicyStatus,
};
