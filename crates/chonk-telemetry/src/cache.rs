//! The per-cycle volume stats cache.

use std::collections::HashMap;

use crate::parse::{StatFamily, VolumeSample};

/// Usage of one volume, merged from the stat families and finalized
/// with derived fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeStats {
    pub capacity_bytes: i64,
    pub available_bytes: i64,
    pub used_bytes: i64,
    pub usage_percent: f64,
    pub inodes_total: i64,
    pub inodes_used: i64,
    pub inodes_free: i64,
    pub inodes_usage_percent: f64,
}

/// The most recent sample per volume, keyed `namespace/name`. Built
/// once per reconciliation cycle, read-only afterwards.
#[derive(Debug, Default)]
pub struct StatsCache {
    data: HashMap<String, VolumeStats>,
}

impl StatsCache {
    /// Merge raw samples (from every node) and compute derived fields.
    pub fn from_samples(samples: impl IntoIterator<Item = VolumeSample>) -> Self {
        let mut data: HashMap<String, VolumeStats> = HashMap::new();
        for sample in samples {
            let key = format!("{}/{}", sample.namespace, sample.claim);
            let stats = data.entry(key).or_default();
            match sample.family {
                StatFamily::CapacityBytes => stats.capacity_bytes = sample.value,
                StatFamily::AvailableBytes => stats.available_bytes = sample.value,
                StatFamily::Inodes => stats.inodes_total = sample.value,
                StatFamily::InodesUsed => stats.inodes_used = sample.value,
            }
        }
        for stats in data.values_mut() {
            stats.finalize();
        }
        Self { data }
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&VolumeStats> {
        self.data.get(&format!("{namespace}/{name}"))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VolumeStats)> {
        self.data.iter()
    }
}

impl VolumeStats {
    /// Compute the derived fields, clamping at zero when a counter pair
    /// arrives inconsistent (available > capacity happens around resize).
    fn finalize(&mut self) {
        if self.capacity_bytes > 0 {
            self.used_bytes = (self.capacity_bytes - self.available_bytes).max(0);
            self.usage_percent = self.used_bytes as f64 / self.capacity_bytes as f64 * 100.0;
        }
        if self.inodes_total > 0 {
            self.inodes_free = (self.inodes_total - self.inodes_used).max(0);
            self.inodes_usage_percent =
                (self.inodes_used.min(self.inodes_total)) as f64 / self.inodes_total as f64 * 100.0;
        }
    }
}
