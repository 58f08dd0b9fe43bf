//! Host sampling
//!
//! Produces point-in-time utilization snapshots of the local machine.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub mount_point: String,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl DiskUsage {
    pub fn usage_percent(&self) -> f64 {
        percent(self.used_bytes, self.total_bytes)
    }

    /// Metric-safe name for the mount: `/` is `root`, `/var/log` is `var_log`
    pub fn label(&self) -> String {
        let trimmed = self.mount_point.trim_matches('/');
        if trimmed.is_empty() {
            "root".to_string()
        } else {
            trimmed
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Global CPU utilization, 0..=100
    pub cpu_usage: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disks: Vec<DiskUsage>,
}

impl SystemSnapshot {
    pub fn memory_usage_percent(&self) -> f64 {
        percent(self.memory_used_bytes, self.memory_total_bytes)
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    used as f64 / total as f64 * 100.0
}

/// Source of host snapshots. Collection may block.
pub trait SnapshotProvider: Send {
    fn collect(&mut self) -> Result<SystemSnapshot>;
}

/// Samples the local host through sysinfo
pub struct SystemCollector {
    system: System,
    disks: Disks,
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime the first one.
        system.refresh_cpu();
        system.refresh_memory();
        let disks = Disks::new_with_refreshed_list();
        Self { system, disks }
    }
}

impl SnapshotProvider for SystemCollector {
    fn collect(&mut self) -> Result<SystemSnapshot> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.disks.refresh();

        let disks: Vec<DiskUsage> = self
            .disks
            .list()
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| DiskUsage {
                mount_point: d.mount_point().to_string_lossy().to_string(),
                used_bytes: d.total_space().saturating_sub(d.available_space()),
                total_bytes: d.total_space(),
            })
            .collect();

        let snapshot = SystemSnapshot {
            timestamp: Utc::now(),
            cpu_usage: f64::from(self.system.global_cpu_info().cpu_usage()),
            memory_used_bytes: self.system.used_memory(),
            memory_total_bytes: self.system.total_memory(),
            disks,
        };

        debug!(
            "Collected snapshot: cpu={:.1}% memory={:.1}% disks={}",
            snapshot.cpu_usage,
            snapshot.memory_usage_percent(),
            snapshot.disks.len()
        );

        Ok(snapshot)
    }
}
