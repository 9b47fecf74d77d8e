//! Agent configuration

use anyhow::{Context, Result};
use scheduler_lib::{
    adjuster::AllocationConfig, balancer::BalancerConfig, detector::HostProfile,
    driver::DriverConfig, monitor::MonitorConfig, monitor::Threshold,
};
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "SCHED_CONFIG";

/// Agent configuration
///
/// Nested sections map to `SCHED_<SECTION>__<FIELD>` environment variables,
/// e.g. `SCHED_ALLOCATION__STRATEGY=aggressive`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Instance name attached to structured log records
    pub instance: String,

    /// API server port for health/metrics
    pub api_port: u16,

    /// Continuous capability detection cadence; 0 disables it
    pub detection_interval_ms: u64,

    /// Events kept for `/v1/events`
    pub event_history: usize,

    /// Seed the balancer with CPU and memory units from detected capabilities
    pub provision_units: bool,

    /// Enable automatic capacity adjustment at startup
    pub auto_adjust: bool,

    pub host: HostProfile,
    pub allocation: AllocationConfig,
    pub monitor: MonitorConfig,
    pub balancer: BalancerConfig,
    pub driver: DriverConfig,
    pub thresholds: Vec<Threshold>,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "scheduler".to_string())
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            api_port: 8080,
            detection_interval_ms: 30_000,
            event_history: 256,
            provision_units: true,
            auto_adjust: true,
            host: HostProfile::default(),
            allocation: AllocationConfig::default(),
            monitor: MonitorConfig::default(),
            balancer: BalancerConfig::default(),
            driver: DriverConfig::default(),
            thresholds: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the optional file named by `SCHED_CONFIG`
    /// and `SCHED_*` environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    /// Load configuration from an optional file plus the environment
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("SCHED")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read agent configuration")?;

        let agent: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        agent.validate()?;
        Ok(agent)
    }

    /// Check every component section
    pub fn validate(&self) -> Result<()> {
        self.allocation.validate().context("allocation")?;
        self.monitor.validate().context("monitor")?;
        self.balancer.validate().context("balancer")?;
        if self.driver.tick_interval_ms == 0 {
            anyhow::bail!("driver: tick_interval_ms must be positive");
        }
        if self.event_history == 0 {
            anyhow::bail!("event_history must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_lib::{AllocationMode, ResourceType, Severity, Strategy};
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.allocation.strategy, Strategy::Balanced);
        assert_eq!(config.allocation.mode, AllocationMode::Manual);
        assert!(config.thresholds.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            instance = "node-a"
            api_port = 9100

            [allocation]
            min_units = 2
            max_units = 16
            strategy = "conservative"
            mode = "periodic"
            interval_ms = 30000

            [balancer]
            max_queue_size = 64

            [driver]
            tick_interval_ms = 500

            [[thresholds]]
            resource_type = "cpu"
            fraction = 0.8
            severity = "warning"
            "#,
        );

        let config = AgentConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.instance, "node-a");
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.allocation.min_units, 2);
        assert_eq!(config.allocation.max_units, 16);
        assert_eq!(config.allocation.strategy, Strategy::Conservative);
        assert_eq!(config.allocation.mode, AllocationMode::Periodic);
        // Unset fields keep their defaults
        assert_eq!(config.allocation.error_tolerance, 0.05);
        assert_eq!(config.balancer.max_queue_size, 64);
        assert_eq!(config.driver.tick_interval_ms, 500);
        assert_eq!(config.thresholds.len(), 1);
        assert_eq!(config.thresholds[0].resource_type, ResourceType::Cpu);
        assert_eq!(config.thresholds[0].severity, Severity::Warning);
    }

    #[test]
    fn test_invalid_section_is_rejected() {
        let file = write_config(
            r#"
            [allocation]
            min_units = 10
            max_units = 4
            "#,
        );
        let err = AgentConfig::load_from(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("allocation"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(AgentConfig::load_from(Some(&path)).is_err());
    }
}
