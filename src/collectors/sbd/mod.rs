pub mod parser;

use super::{Collector, InstrumentableCollector, SubsystemCollector};
use crate::command::{check_executable, check_file, read_bounded, CommandRunner, DEFAULT_TIMEOUT};
use crate::errors::CollectorError;
use crate::metrics::{bool_value, state_samples, DescriptorSet, MetricDescriptor, Sample};
use async_trait::async_trait;
use futures::future::join_all;
use parser::{parse_config, parse_dump, Timeouts};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const SUBSYSTEM: &str = "sbd";

const DEVICE_STATUSES: &[&str] = &["healthy", "unhealthy"];

#[derive(Debug, Clone, PartialEq)]
pub struct SbdDevice {
    pub path: String,
    pub healthy: bool,
    pub timeouts: Option<Timeouts>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SbdSnapshot {
    pub devices: Vec<SbdDevice>,
    pub watchdog_armed: bool,
    pub watchdog_timeout: Option<f64>,
    pub pacemaker_integration: bool,
    /// The pacemaker integration is what makes sbd follow corosync membership.
    pub corosync_integration: bool,
}

struct Descriptors {
    set: DescriptorSet,
    devices: Arc<MetricDescriptor>,
    timeouts: Arc<MetricDescriptor>,
    watchdog_armed: Arc<MetricDescriptor>,
    watchdog_timeout: Arc<MetricDescriptor>,
    integration: Arc<MetricDescriptor>,
}

impl Descriptors {
    fn new() -> Result<Self, prometheus::Error> {
        let mut set = DescriptorSet::new(SUBSYSTEM);
        Ok(Self {
            devices: set.gauge(
                "devices",
                "SBD devices; one line per device and status, 1 for the current status.",
                &["device", "status"],
            )?,
            timeouts: set.gauge(
                "timeouts",
                "SBD timeouts in seconds as written in each device header.",
                &["device", "type"],
            )?,
            watchdog_armed: set.gauge(
                "watchdog_armed",
                "Whether sbd is configured to arm a watchdog device.",
                &[],
            )?,
            watchdog_timeout: set.gauge(
                "watchdog_timeout",
                "Configured watchdog timeout in seconds.",
                &[],
            )?,
            integration: set.gauge(
                "integration",
                "Whether sbd integrates with the given cluster component.",
                &["component"],
            )?,
            set,
        })
    }
}

/// Watchdog/fencing collector built on the sbd config file and the `sbd` tool.
pub struct SbdCollector {
    sbd_path: PathBuf,
    config_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    read_timeout: Duration,
    metrics: Descriptors,
}

impl SbdCollector {
    pub fn new(
        sbd_path: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, CollectorError> {
        let sbd_path = sbd_path.into();
        let config_path = config_path.into();
        check_executable(&sbd_path)?;
        check_file(&config_path)?;

        Ok(Self {
            sbd_path,
            config_path,
            runner,
            read_timeout: DEFAULT_TIMEOUT,
            metrics: Descriptors::new()?,
        })
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    async fn snapshot(&self) -> Result<SbdSnapshot, CollectorError> {
        let config = parse_config(&read_bounded(&self.config_path, self.read_timeout).await?);
        let devices = join_all(config.devices().into_iter().map(|d| self.device(d))).await;

        Ok(SbdSnapshot {
            devices,
            watchdog_armed: config.watchdog_armed(),
            watchdog_timeout: config.watchdog_timeout(),
            pacemaker_integration: config.pacemaker_integration(),
            corosync_integration: config.pacemaker_integration(),
        })
    }

    /// Probe one device; tool failures mark it unhealthy rather than failing the scrape.
    async fn device(&self, path: String) -> SbdDevice {
        let list_args = ["-d", path.as_str(), "list"];
        let dump_args = ["-d", path.as_str(), "dump"];
        let (list, dump) = tokio::join!(
            self.runner.run(&self.sbd_path, &list_args),
            self.runner.run(&self.sbd_path, &dump_args),
        );

        let healthy = match list {
            Ok(out) if out.success() => true,
            Ok(out) => {
                warn!(device = %path, code = ?out.code, stderr = %out.stderr.trim(), "sbd device is unhealthy");
                false
            }
            Err(e) => {
                warn!(device = %path, error = %e, "could not check sbd device");
                false
            }
        };

        let timeouts = match dump
            .and_then(|out| out.into_report(&self.sbd_path))
            .and_then(|text| parse_dump(&text))
        {
            Ok(timeouts) => Some(timeouts),
            Err(e) => {
                warn!(device = %path, error = %e, "could not read sbd device timeouts");
                None
            }
        };

        SbdDevice {
            path,
            healthy,
            timeouts,
        }
    }

    fn samples(&self, snapshot: &SbdSnapshot) -> Vec<Sample> {
        let m = &self.metrics;
        let mut samples = Vec::new();

        for device in &snapshot.devices {
            let status = if device.healthy { "healthy" } else { "unhealthy" };
            samples.extend(state_samples(&m.devices, &[device.path.as_str()], DEVICE_STATUSES, status));
            if let Some(timeouts) = device.timeouts {
                for (kind, seconds) in [("watchdog", timeouts.watchdog), ("msgwait", timeouts.msgwait)] {
                    samples.push(Sample::new(
                        &m.timeouts,
                        seconds,
                        vec![device.path.clone(), kind.to_string()],
                    ));
                }
            }
        }

        samples.push(Sample::new(
            &m.watchdog_armed,
            bool_value(snapshot.watchdog_armed),
            Vec::new(),
        ));
        if let Some(timeout) = snapshot.watchdog_timeout {
            samples.push(Sample::new(&m.watchdog_timeout, timeout, Vec::new()));
        }
        for (component, enabled) in [
            ("pacemaker", snapshot.pacemaker_integration),
            ("corosync", snapshot.corosync_integration),
        ] {
            samples.push(Sample::new(
                &m.integration,
                bool_value(enabled),
                vec![component.to_string()],
            ));
        }

        samples
    }
}

#[async_trait]
impl Collector for SbdCollector {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        self.metrics.set.descriptors()
    }

    async fn collect(&self) -> Result<Vec<Sample>, CollectorError> {
        let snapshot = self.snapshot().await?;
        Ok(self.samples(&snapshot))
    }

    fn as_subsystem(&self) -> Option<&dyn SubsystemCollector> {
        Some(self)
    }

    fn as_instrumentable(&self) -> Option<&dyn InstrumentableCollector> {
        Some(self)
    }
}

impl SubsystemCollector for SbdCollector {
    fn subsystem(&self) -> &'static str {
        SUBSYSTEM
    }
}

impl InstrumentableCollector for SbdCollector {}
