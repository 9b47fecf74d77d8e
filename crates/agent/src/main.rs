//! Scheduler agent - adaptive compute-resource scheduler daemon
//!
//! Detects host capabilities, sizes the unit allocation, monitors usage
//! and balances tasks over the local resource units, exposing health,
//! metrics and scheduler state over HTTP.

use anyhow::Result;
use scheduler_lib::{
    adjuster::CapacityAdjuster,
    balancer::TaskBalancer,
    detector::{CapabilityDetector, HostProvider},
    driver::SchedulerDriverBuilder,
    events::{FanoutSink, LogSink, RecentEvents},
    health::{components, HealthRegistry},
    monitor::ResourceMonitor,
    observability::{SchedulerMetrics, StructuredLogger},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting scheduler-agent");

    // Load configuration
    let config = config::AgentConfig::load()?;
    info!(instance = %config.instance, api_port = config.api_port, "Agent configured");

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let metrics = SchedulerMetrics::new();
    let logger = StructuredLogger::new(&config.instance);

    // Monitor events go to the log, the API history and the metrics
    let recent_events = Arc::new(RecentEvents::new(config.event_history));
    let sink = FanoutSink::new()
        .with(Arc::new(LogSink::new(&config.instance)))
        .with(recent_events.clone())
        .with(Arc::new(metrics.clone()));

    let host = Arc::new(HostProvider::new(config.host.clone()));

    let detector = Arc::new(CapabilityDetector::new(host.clone()));
    {
        let logger = logger.clone();
        detector.on_change(move |current, previous| {
            logger.log_capability_change(current, previous)
        });
    }
    let capabilities = detector.run_detection();
    if config.detection_interval_ms > 0 {
        detector.start_continuous(Duration::from_millis(config.detection_interval_ms))?;
    }

    let adjuster = Arc::new(CapacityAdjuster::new(
        detector.clone(),
        config.allocation.clone(),
    )?);
    {
        let logger = logger.clone();
        adjuster.on_adjustment(move |old, new, status| logger.log_adjustment(old, new, status));
    }

    let monitor = Arc::new(ResourceMonitor::with_config(
        host.clone(),
        Arc::new(sink),
        config.monitor.clone(),
    )?);
    for threshold in &config.thresholds {
        let logger = logger.clone();
        monitor.add_threshold_with_callback(
            threshold.resource_type,
            threshold.fraction,
            threshold.severity,
            move |resource, usage, fraction, severity| {
                logger.log_threshold(resource, usage, fraction, severity)
            },
        )?;
    }

    let balancer = Arc::new(TaskBalancer::with_config(
        monitor.clone(),
        detector.clone(),
        adjuster.clone(),
        config.balancer.clone(),
    )?);
    {
        let logger = logger.clone();
        balancer.on_task_finished(move |task| logger.log_task_finished(task));
    }
    if config.provision_units {
        balancer.provision_from_capabilities()?;
    }

    // Initial allocation; failures surface through health and metrics
    if let Err(e) = adjuster.adjust_now() {
        warn!(error = %e, "Initial capacity adjustment failed");
    }
    if config.auto_adjust {
        adjuster.start_auto_adjust();
    }
    monitor.start();
    balancer.start();

    logger.log_startup(AGENT_VERSION, capabilities.max_supported_units());

    // Start the tick driver
    let (shutdown_tx, _) = broadcast::channel(1);
    let driver = SchedulerDriverBuilder::new()
        .detector(detector.clone())
        .adjuster(adjuster.clone())
        .monitor(monitor.clone())
        .balancer(balancer.clone())
        .config(config.driver.clone())
        .health(health_registry.clone())
        .metrics(metrics.clone())
        .logger(logger.clone())
        .build()?;
    let driver_handle = tokio::spawn(driver.run(shutdown_tx.subscribe()));

    // Create shared application state
    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics,
        detector,
        adjuster: adjuster.clone(),
        monitor: monitor.clone(),
        balancer: balancer.clone(),
        events: recent_events,
    });

    // Mark agent as ready after initialization
    health_registry.set_ready(true).await;

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    if let Err(e) = driver_handle.await {
        warn!(error = %e, "Scheduler driver task failed");
    }
    balancer.stop();
    monitor.stop();
    adjuster.stop_auto_adjust();
    api_handle.abort();

    info!("Shutting down");
    Ok(())
}
