//! Shared fixtures for the controller test suites.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimCondition, PersistentVolumeClaimSpec,
    PersistentVolumeClaimStatus, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use chonk_controller::ClaimReconciler;
use chonk_cluster::FakeCluster;
use chonk_core::GlobalConfig;
use chonk_metrics::Metrics;
use chonk_telemetry::Collector;

pub const GIB: i64 = 1 << 30;

pub struct ClaimSpec<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub size: &'a str,
    pub storage_class: Option<&'a str>,
    pub annotations: &'a [(&'a str, &'a str)],
    pub labels: &'a [(&'a str, &'a str)],
    pub phase: &'a str,
    pub volume_mode: Option<&'a str>,
    pub resizing: bool,
}

impl Default for ClaimSpec<'_> {
    fn default() -> Self {
        Self {
            namespace: "ns",
            name: "a",
            size: "10Gi",
            storage_class: Some("fast"),
            annotations: &[],
            labels: &[],
            phase: "Bound",
            volume_mode: None,
            resizing: false,
        }
    }
}

pub fn claim(spec: ClaimSpec<'_>) -> PersistentVolumeClaim {
    let to_map = |pairs: &[(&str, &str)]| -> Option<BTreeMap<String, String>> {
        if pairs.is_empty() {
            None
        } else {
            Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            )
        }
    };

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(spec.name.to_string()),
            namespace: Some(spec.namespace.to_string()),
            annotations: to_map(spec.annotations),
            labels: to_map(spec.labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: spec.storage_class.map(str::to_string),
            volume_mode: spec.volume_mode.map(str::to_string),
            resources: Some(VolumeResourceRequirements {
                requests: Some(
                    [("storage".to_string(), Quantity(spec.size.to_string()))]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some(spec.phase.to_string()),
            conditions: spec.resizing.then(|| {
                vec![PersistentVolumeClaimCondition {
                    type_: "Resizing".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        }),
    }
}

pub fn storage_class(name: &str, expandable: bool, fs_type: Option<&str>) -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        provisioner: "csi.example.com".to_string(),
        allow_volume_expansion: Some(expandable),
        parameters: fs_type.map(|fs| {
            [("csi.storage.k8s.io/fstype".to_string(), fs.to_string())]
                .into_iter()
                .collect()
        }),
        ..Default::default()
    }
}

/// Render a node-agent payload for one volume.
pub fn volume_payload(
    namespace: &str,
    name: &str,
    capacity: i64,
    available: i64,
    inodes: i64,
    inodes_used: i64,
) -> String {
    format!(
        concat!(
            "kubelet_volume_stats_capacity_bytes{{namespace=\"{ns}\",persistentvolumeclaim=\"{n}\"}} {cap}\n",
            "kubelet_volume_stats_available_bytes{{namespace=\"{ns}\",persistentvolumeclaim=\"{n}\"}} {avail}\n",
            "kubelet_volume_stats_inodes{{namespace=\"{ns}\",persistentvolumeclaim=\"{n}\"}} {inodes}\n",
            "kubelet_volume_stats_inodes_used{{namespace=\"{ns}\",persistentvolumeclaim=\"{n}\"}} {used}\n",
        ),
        ns = namespace,
        n = name,
        cap = capacity,
        avail = available,
        inodes = inodes,
        used = inodes_used,
    )
}

pub struct Harness {
    pub fake: Arc<FakeCluster>,
    pub metrics: Arc<Metrics>,
    pub reconciler: Arc<ClaimReconciler<FakeCluster>>,
}

pub fn harness(dry_run: bool) -> Harness {
    let fake = Arc::new(FakeCluster::new());
    let metrics = Arc::new(Metrics::new().unwrap());
    let collector = Collector::new(Arc::clone(&fake), None, Arc::clone(&metrics)).unwrap();
    let reconciler = Arc::new(ClaimReconciler::new(
        Arc::clone(&fake),
        collector,
        GlobalConfig::default(),
        Arc::clone(&metrics),
        Duration::from_secs(300),
        4,
        dry_run,
    ));
    Harness {
        fake,
        metrics,
        reconciler,
    }
}
