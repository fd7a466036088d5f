//! The `pvc-chonker.io/v1alpha1` API group.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use chonk_core::ConfigTemplate;

use crate::selector::LabelSelector;

/// A namespace-scoped rule applying a partial expansion template to
/// every claim its selector matches.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "pvc-chonker.io",
    version = "v1alpha1",
    kind = "PVCPolicy",
    plural = "pvcpolicies",
    status = "PVCPolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PVCPolicySpec {
    /// Which claims this policy applies to.
    pub selector: LabelSelector,

    /// The expansion configuration; unset fields fall through to the
    /// process defaults.
    pub template: ConfigTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PVCPolicyStatus {
    /// Number of claims currently matched by the selector.
    #[serde(default)]
    pub matched_pvcs: i32,

    /// When the policy was last processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// A namespace-scoped set of claims that grow together. Membership is
/// by annotation: a claim joins by carrying `pvc-chonker.io/group` with
/// this object's name and `pvc-chonker.io/enabled: "true"`.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "pvc-chonker.io",
    version = "v1alpha1",
    kind = "PVCGroup",
    plural = "pvcgroups",
    status = "PVCGroupStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PVCGroupSpec {
    /// Expansion configuration shared by the group's members.
    #[serde(default)]
    pub template: ConfigTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PVCGroupStatus {
    /// Number of active members.
    #[serde(default)]
    pub member_count: i32,

    /// The coordinated size all members converge to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_size: Option<String>,

    /// When a member was last expanded through coordination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_expansion: Option<DateTime<Utc>>,

    /// When the group was last processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}
