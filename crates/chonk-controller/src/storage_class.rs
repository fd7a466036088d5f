//! The per-cycle storage class cache.
//!
//! One entry per storage class: can it expand online, and what
//! filesystem does it provision. Populated lazily during a cycle and
//! cleared at cycle start by the single reconciliation task; workers
//! only read and insert.

use std::collections::HashMap;
use std::sync::RwLock;

use k8s_openapi::api::storage::v1::StorageClass;

/// Filesystem assumed when a storage class does not declare one.
pub const DEFAULT_FS_TYPE: &str = "ext4";

const FS_TYPE_PARAM_CSI: &str = "csi.storage.k8s.io/fstype";
const FS_TYPE_PARAM: &str = "fsType";

#[derive(Debug, Clone, PartialEq)]
pub struct StorageClassInfo {
    pub expandable: bool,
    pub fs_type: String,
}

impl StorageClassInfo {
    pub fn from_class(sc: &StorageClass) -> Self {
        Self {
            expandable: sc.allow_volume_expansion.unwrap_or(false),
            fs_type: fs_type_of(sc),
        }
    }

    /// Filesystems with a fixed inode count: growing the volume will not
    /// relieve inode pressure on these.
    pub fn has_fixed_inodes(&self) -> bool {
        matches!(self.fs_type.as_str(), "ext3" | "ext4")
    }
}

/// Derive the filesystem type from the class parameters, preferring the
/// CSI-qualified key.
pub fn fs_type_of(sc: &StorageClass) -> String {
    sc.parameters
        .as_ref()
        .and_then(|params| {
            params
                .get(FS_TYPE_PARAM_CSI)
                .or_else(|| params.get(FS_TYPE_PARAM))
        })
        .cloned()
        .unwrap_or_else(|| DEFAULT_FS_TYPE.to_string())
}

#[derive(Debug, Default)]
pub struct StorageClassCache {
    entries: RwLock<HashMap<String, StorageClassInfo>>,
}

impl StorageClassCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<StorageClassInfo> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn insert(&self, name: &str, info: StorageClassInfo) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), info);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn class(expandable: Option<bool>, params: &[(&str, &str)]) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                name: Some("fast".to_string()),
                ..Default::default()
            },
            provisioner: "csi.example.com".to_string(),
            allow_volume_expansion: expandable,
            parameters: if params.is_empty() {
                None
            } else {
                Some(
                    params
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                )
            },
            ..Default::default()
        }
    }

    #[test]
    fn expandability_defaults_to_false() {
        assert!(!StorageClassInfo::from_class(&class(None, &[])).expandable);
        assert!(!StorageClassInfo::from_class(&class(Some(false), &[])).expandable);
        assert!(StorageClassInfo::from_class(&class(Some(true), &[])).expandable);
    }

    #[test]
    fn fs_type_prefers_csi_key() {
        let sc = class(Some(true), &[(FS_TYPE_PARAM, "xfs"), (FS_TYPE_PARAM_CSI, "btrfs")]);
        assert_eq!(fs_type_of(&sc), "btrfs");
    }

    #[test]
    fn fs_type_falls_back_to_plain_key_then_default() {
        assert_eq!(fs_type_of(&class(None, &[(FS_TYPE_PARAM, "xfs")])), "xfs");
        assert_eq!(fs_type_of(&class(None, &[])), DEFAULT_FS_TYPE);
    }

    #[test]
    fn fixed_inode_detection() {
        let info = |fs: &str| StorageClassInfo {
            expandable: true,
            fs_type: fs.to_string(),
        };
        assert!(info("ext3").has_fixed_inodes());
        assert!(info("ext4").has_fixed_inodes());
        assert!(!info("xfs").has_fixed_inodes());
        assert!(!info("btrfs").has_fixed_inodes());
    }

    #[test]
    fn cache_cycle() {
        let cache = StorageClassCache::new();
        assert!(cache.get("fast").is_none());

        cache.insert(
            "fast",
            StorageClassInfo {
                expandable: true,
                fs_type: "ext4".to_string(),
            },
        );
        assert!(cache.get("fast").unwrap().expandable);

        cache.clear();
        assert!(cache.get("fast").is_none());
    }
}
