//! Resource limits applied to sandbox containers.

/// CPU scheduler period used to express fractional core limits.
const CPU_PERIOD_MICROS: i64 = 100_000;

/// Per-sandbox resource ceilings.
///
/// Defaults match a constrained but usable shell environment: half a
/// core, 512 MiB of memory, no network.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Memory ceiling in megabytes.
    pub memory_mb: u64,
    /// CPU cores (fractional allowed).
    pub cpu_cores: f64,
    /// Maximum number of processes inside the container.
    pub pids_limit: i64,
    /// Docker network mode. Sandboxes are offline by default so tasks
    /// cannot exfiltrate data or fetch solutions.
    pub network_mode: String,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_cores: 0.5,
            pids_limit: 256,
            network_mode: "none".to_string(),
        }
    }
}

impl SandboxLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_cpu_cores(mut self, cpu_cores: f64) -> Self {
        self.cpu_cores = cpu_cores;
        self
    }

    pub fn with_pids_limit(mut self, pids_limit: i64) -> Self {
        self.pids_limit = pids_limit;
        self
    }

    pub fn with_network_mode(mut self, network_mode: impl Into<String>) -> Self {
        self.network_mode = network_mode.into();
        self
    }

    /// Memory limit in bytes, as the Docker API expects.
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb * 1024 * 1024) as i64
    }

    /// CPU quota period in microseconds.
    pub fn cpu_period(&self) -> i64 {
        CPU_PERIOD_MICROS
    }

    /// CPU quota in microseconds per period, derived from `cpu_cores`.
    pub fn cpu_quota(&self) -> i64 {
        (self.cpu_cores * CPU_PERIOD_MICROS as f64) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let limits = SandboxLimits::default();
        assert_eq!(limits.memory_mb, 512);
        assert_eq!(limits.memory_bytes(), 512 * 1024 * 1024);
        assert_eq!(limits.cpu_period(), 100_000);
        assert_eq!(limits.cpu_quota(), 50_000);
        assert_eq!(limits.network_mode, "none");
    }

    #[test]
    fn builder_overrides() {
        let limits = SandboxLimits::new()
            .with_memory_mb(1024)
            .with_cpu_cores(2.0)
            .with_pids_limit(512)
            .with_network_mode("bridge");
        assert_eq!(limits.memory_bytes(), 1024 * 1024 * 1024);
        assert_eq!(limits.cpu_quota(), 200_000);
        assert_eq!(limits.pids_limit, 512);
        assert_eq!(limits.network_mode, "bridge");
    }
}
