//! Resource limits applied to sandbox containers.

use serde::{Deserialize, Serialize};

/// Resource limits for a sandbox container.
///
/// Supplied by the node's Docker manager as the container host
/// configuration; absent limits leave the runtime defaults in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Memory limit in megabytes.
    pub memory_mb: u64,
    /// CPU cores available (e.g., 0.5, 1.0, 2.0).
    pub cpu_cores: f64,
    /// Maximum number of processes allowed.
    pub max_processes: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            memory_mb: 1024,
            cpu_cores: 1.0,
            max_processes: 100,
        }
    }
}

/// CFS scheduling period used to express CPU shares.
const CPU_PERIOD_US: i64 = 100_000;

impl ExecutionLimits {
    pub fn new(memory_mb: u64, cpu_cores: f64, max_processes: u64) -> Self {
        Self {
            memory_mb,
            cpu_cores,
            max_processes,
        }
    }

    /// Memory cap in bytes, saturating at `i64::MAX`.
    pub fn memory_bytes(&self) -> i64 {
        i64::try_from(self.memory_mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)
    }

    pub fn cpu_period(&self) -> i64 {
        CPU_PERIOD_US
    }

    /// CPU quota in microseconds: period × cores.
    pub fn cpu_quota(&self) -> i64 {
        (CPU_PERIOD_US as f64 * self.cpu_cores) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.memory_mb, 1024);
        assert_eq!(limits.cpu_cores, 1.0);
        assert_eq!(limits.max_processes, 100);
    }

    #[test]
    fn test_memory_bytes() {
        let limits = ExecutionLimits::new(512, 1.0, 10);
        assert_eq!(limits.memory_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_memory_bytes_saturates() {
        assert_eq!(ExecutionLimits::new(u64::MAX, 1.0, 10).memory_bytes(), i64::MAX);
        assert_eq!(
            ExecutionLimits::new(u64::MAX / (1024 * 1024), 1.0, 10).memory_bytes(),
            i64::MAX
        );
    }

    #[test]
    fn test_cpu_quota() {
        let limits = ExecutionLimits::new(1024, 2.0, 10);
        assert_eq!(limits.cpu_period(), 100_000);
        assert_eq!(limits.cpu_quota(), 200_000);

        let limits = ExecutionLimits::new(1024, 0.5, 10);
        assert_eq!(limits.cpu_quota(), 50_000);
    }
}
