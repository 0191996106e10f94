pub mod parser;

use super::{Collector, InstrumentableCollector, SubsystemCollector};
use crate::command::{check_executable, CommandRunner, DEFAULT_TIMEOUT};
use crate::errors::CollectorError;
use crate::metrics::{bool_value, state_samples, DescriptorSet, MetricDescriptor, Sample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parser::{parse_split_brain_marker, parse_status, Resource};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SUBSYSTEM: &str = "drbd";

const STATUS_ARGS: &[&str] = &["status", "--json"];

const DISK_STATES: &[&str] = &[
    "Diskless",
    "Attaching",
    "Detaching",
    "Failed",
    "Negotiating",
    "Inconsistent",
    "Outdated",
    "DUnknown",
    "Consistent",
    "UpToDate",
];

const ROLES: &[&str] = &["Primary", "Secondary", "Unknown"];

const CONNECTION_STATES: &[&str] = &[
    "StandAlone",
    "Disconnecting",
    "Unconnected",
    "Timeout",
    "BrokenPipe",
    "NetworkFailure",
    "ProtocolError",
    "TearDown",
    "Connecting",
    "Connected",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SplitBrain {
    pub resource: String,
    pub volume: String,
    /// Marker modification time, seconds since the epoch.
    pub detected_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrbdSnapshot {
    pub resources: Vec<Resource>,
    pub split_brains: Vec<SplitBrain>,
}

struct Descriptors {
    set: DescriptorSet,
    disk_state: Arc<MetricDescriptor>,
    role: Arc<MetricDescriptor>,
    written: Arc<MetricDescriptor>,
    read: Arc<MetricDescriptor>,
    al_writes: Arc<MetricDescriptor>,
    bm_writes: Arc<MetricDescriptor>,
    upper_pending: Arc<MetricDescriptor>,
    lower_pending: Arc<MetricDescriptor>,
    quorum: Arc<MetricDescriptor>,
    connection_state: Arc<MetricDescriptor>,
    peer_disk_state: Arc<MetricDescriptor>,
    connections_sync: Arc<MetricDescriptor>,
    connections_received: Arc<MetricDescriptor>,
    connections_sent: Arc<MetricDescriptor>,
    connections_pending: Arc<MetricDescriptor>,
    connections_unacked: Arc<MetricDescriptor>,
    split_brain: Arc<MetricDescriptor>,
    split_brain_detected: Arc<MetricDescriptor>,
}

impl Descriptors {
    fn new() -> Result<Self, prometheus::Error> {
        const VOLUME: &[&str] = &["resource", "volume"];
        const PEER_VOLUME: &[&str] = &["resource", "peer_node_id", "volume"];

        let mut set = DescriptorSet::new(SUBSYSTEM);
        Ok(Self {
            disk_state: set.gauge(
                "disk_state",
                "Disk state of each local volume; 1 for the current state.",
                &["resource", "volume", "state"],
            )?,
            role: set.gauge(
                "role",
                "Role of the resource owning each volume; 1 for the current role.",
                &["resource", "volume", "role"],
            )?,
            written: set.counter("written", "KiB written to the local disk.", VOLUME)?,
            read: set.counter("read", "KiB read from the local disk.", VOLUME)?,
            al_writes: set.counter("al_writes", "Writes to the activity log area of the metadata.", VOLUME)?,
            bm_writes: set.counter("bm_writes", "Writes to the bitmap area of the metadata.", VOLUME)?,
            upper_pending: set.gauge(
                "upper_pending",
                "Block I/O requests forwarded to DRBD but not yet answered.",
                VOLUME,
            )?,
            lower_pending: set.gauge(
                "lower_pending",
                "Open requests to the local I/O subsystem.",
                VOLUME,
            )?,
            quorum: set.gauge("quorum", "Whether the volume has quorum.", VOLUME)?,
            connection_state: set.gauge(
                "connection_state",
                "State of each peer connection; 1 for the current state.",
                &["resource", "peer_node_id", "peer", "state"],
            )?,
            peer_disk_state: set.gauge(
                "peer_disk_state",
                "Disk state of each peer volume as seen locally; 1 for the current state.",
                &["resource", "peer_node_id", "volume", "state"],
            )?,
            connections_sync: set.gauge(
                "connections_sync",
                "Percentage of the peer volume that is in sync.",
                PEER_VOLUME,
            )?,
            connections_received: set.counter(
                "connections_received",
                "KiB received from the peer.",
                PEER_VOLUME,
            )?,
            connections_sent: set.counter("connections_sent", "KiB sent to the peer.", PEER_VOLUME)?,
            connections_pending: set.gauge(
                "connections_pending",
                "Requests sent to the peer but not yet answered.",
                PEER_VOLUME,
            )?,
            connections_unacked: set.gauge(
                "connections_unacked",
                "Requests received from the peer but not yet acknowledged.",
                PEER_VOLUME,
            )?,
            split_brain: set.gauge(
                "split_brain",
                "Split brain detected by the DRBD notification hook; one line per marker.",
                VOLUME,
            )?,
            split_brain_detected: set.gauge(
                "split_brain_detected_timestamp_seconds",
                "When the split brain marker was written, in seconds since the epoch.",
                VOLUME,
            )?,
            set,
        })
    }
}

/// Block replication collector built on `drbdsetup` and the split-brain
/// marker directory filled by the DRBD notification hook.
pub struct DrbdCollector {
    drbdsetup_path: PathBuf,
    split_brain_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    read_timeout: Duration,
    metrics: Descriptors,
}

impl DrbdCollector {
    pub fn new(
        drbdsetup_path: impl Into<PathBuf>,
        split_brain_dir: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, CollectorError> {
        let drbdsetup_path = drbdsetup_path.into();
        check_executable(&drbdsetup_path)?;

        Ok(Self {
            drbdsetup_path,
            split_brain_dir: split_brain_dir.into(),
            runner,
            read_timeout: DEFAULT_TIMEOUT,
            metrics: Descriptors::new()?,
        })
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    async fn snapshot(&self) -> Result<DrbdSnapshot, CollectorError> {
        let (status, split_brains) = tokio::join!(
            self.runner.run(&self.drbdsetup_path, STATUS_ARGS),
            self.split_brains(),
        );
        let status = status?.into_report(&self.drbdsetup_path)?;

        Ok(DrbdSnapshot {
            resources: parse_status(&status)?,
            split_brains: split_brains?,
        })
    }

    async fn split_brains(&self) -> Result<Vec<SplitBrain>, CollectorError> {
        let scan = scan_markers(&self.split_brain_dir);
        tokio::time::timeout(self.read_timeout, scan)
            .await
            .map_err(|_| CollectorError::Timeout {
                program: self.split_brain_dir.display().to_string(),
                timeout_ms: self.read_timeout.as_millis() as u64,
            })?
            .map_err(|e| CollectorError::Read {
                path: self.split_brain_dir.clone(),
                source: e,
            })
    }

    fn samples(&self, snapshot: &DrbdSnapshot) -> Vec<Sample> {
        let m = &self.metrics;
        let mut samples = Vec::new();

        for resource in &snapshot.resources {
            let name = resource.name.as_str();

            for volume in &resource.volumes {
                let labels = || vec![name.to_string(), volume.id.clone()];
                let leading = [name, volume.id.as_str()];
                samples.extend(state_samples(&m.disk_state, &leading, DISK_STATES, &volume.disk_state));
                samples.extend(state_samples(&m.role, &leading, ROLES, &resource.role));
                for (descriptor, value) in [
                    (&m.written, volume.written),
                    (&m.read, volume.read),
                    (&m.al_writes, volume.al_writes),
                    (&m.bm_writes, volume.bm_writes),
                    (&m.upper_pending, volume.upper_pending),
                    (&m.lower_pending, volume.lower_pending),
                    (&m.quorum, bool_value(volume.quorum)),
                ] {
                    samples.push(Sample::new(descriptor, value, labels()));
                }
            }

            for connection in &resource.connections {
                let peer_node_id = connection.peer_node_id.as_str();
                samples.extend(state_samples(
                    &m.connection_state,
                    &[name, peer_node_id, connection.peer.as_str()],
                    CONNECTION_STATES,
                    &connection.state,
                ));

                for device in &connection.peer_devices {
                    let labels = || vec![name.to_string(), peer_node_id.to_string(), device.volume.clone()];
                    samples.extend(state_samples(
                        &m.peer_disk_state,
                        &[name, peer_node_id, device.volume.as_str()],
                        DISK_STATES,
                        &device.peer_disk_state,
                    ));
                    for (descriptor, value) in [
                        (&m.connections_sync, device.percent_in_sync),
                        (&m.connections_received, device.received),
                        (&m.connections_sent, device.sent),
                        (&m.connections_pending, device.pending),
                        (&m.connections_unacked, device.unacked),
                    ] {
                        samples.push(Sample::new(descriptor, value, labels()));
                    }
                }
            }
        }

        for marker in &snapshot.split_brains {
            let labels = vec![marker.resource.clone(), marker.volume.clone()];
            samples.push(Sample::new(&m.split_brain, 1.0, labels.clone()));
            samples.push(Sample::new(&m.split_brain_detected, marker.detected_at as f64, labels));
        }

        samples
    }
}

/// Markers in `dir`; a missing directory holds none.
async fn scan_markers(dir: &Path) -> std::io::Result<Vec<SplitBrain>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "no split brain directory");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut markers = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some((resource, volume)) = file_name.to_str().and_then(parse_split_brain_marker) else {
            continue;
        };
        let detected_at = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified).timestamp(),
            Err(e) => {
                warn!(marker = ?file_name, error = %e, "could not stat split brain marker");
                continue;
            }
        };
        markers.push(SplitBrain {
            resource,
            volume,
            detected_at,
        });
    }
    markers.sort_by(|a, b| (&a.resource, &a.volume).cmp(&(&b.resource, &b.volume)));
    Ok(markers)
}

#[async_trait]
impl Collector for DrbdCollector {
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

impl SubsystemCollector for DrbdCollector {
    fn subsystem(&self) -> &'static str {
        SUBSYSTEM
    }
}

impl InstrumentableCollector for DrbdCollector {
    /// A host without DRBD resources is a valid, empty report.
    fn empty_means_failure(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::fixture::{fake_executable, FixtureRunner};
    use crate::metrics::check_arity;

    const STATUS: &str = include_str!("../../../tests/fixtures/drbd/drbdsetup_status.json");

    fn collector(dir: &Path, status: &str) -> DrbdCollector {
        let drbdsetup = fake_executable(dir, "drbdsetup");
        let runner = FixtureRunner::new().with(&drbdsetup, STATUS_ARGS, status);
        DrbdCollector::new(&drbdsetup, dir.join("splitbrain"), Arc::new(runner)).unwrap()
    }

    fn find<'a>(samples: &'a [Sample], name: &str, labels: &[(&str, &str)]) -> Vec<&'a Sample> {
        samples
            .iter()
            .filter(|s| s.name() == name && labels.iter().all(|(k, v)| s.label(k) == Some(*v)))
            .collect()
    }

    #[tokio::test]
    async fn test_inconsistent_standalone_resource() {
        let dir = tempfile::tempdir().unwrap();
        let c = collector(dir.path(), STATUS);
        let samples = c.collect().await.unwrap();
        assert!(check_arity(&samples).is_ok());

        let disk = find(&samples, "ha_cluster_drbd_disk_state", &[("resource", "r0"), ("volume", "0")]);
        assert_eq!(disk.len(), DISK_STATES.len());
        for sample in disk {
            let expected = if sample.label("state") == Some("Inconsistent") { 1.0 } else { 0.0 };
            assert_eq!(sample.value(), expected);
        }

        let connection = find(&samples, "ha_cluster_drbd_connection_state", &[("resource", "r0")]);
        assert_eq!(connection.len(), CONNECTION_STATES.len());
        let on: Vec<_> = connection.iter().filter(|s| s.value() == 1.0).collect();
        assert_eq!(on.len(), 1);
        assert_eq!(on[0].label("state"), Some("StandAlone"));
        assert_eq!(on[0].label("peer"), Some("node2"));
        assert_eq!(on[0].label("peer_node_id"), Some("2"));

        assert!(find(&samples, "ha_cluster_drbd_split_brain", &[("resource", "r0")]).is_empty());

        let written = find(&samples, "ha_cluster_drbd_written", &[("resource", "1-single-0")]);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].value(), 123456.0);
        let sync = find(&samples, "ha_cluster_drbd_connections_sync", &[("resource", "r0")]);
        assert_eq!(sync[0].value(), 0.0);
    }

    #[tokio::test]
    async fn test_split_brain_markers() {
        let dir = tempfile::tempdir().unwrap();
        let markers = dir.path().join("splitbrain");
        std::fs::create_dir(&markers).unwrap();
        std::fs::write(markers.join("drbd-split-brain-detected-1-single-0-0"), "").unwrap();
        std::fs::write(markers.join("unrelated-file"), "").unwrap();

        let c = collector(dir.path(), STATUS);
        let samples = c.collect().await.unwrap();

        let split = find(&samples, "ha_cluster_drbd_split_brain", &[]);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].label("resource"), Some("1-single-0"));
        assert_eq!(split[0].label("volume"), Some("0"));
        assert_eq!(split[0].value(), 1.0);

        let detected = find(&samples, "ha_cluster_drbd_split_brain_detected_timestamp_seconds", &[]);
        assert_eq!(detected.len(), 1);
        assert!(detected[0].value() > 0.0);
    }

    #[tokio::test]
    async fn test_no_resources_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = collector(dir.path(), "[]");
        assert!(c.collect().await.unwrap().is_empty());
        assert!(!c.empty_means_failure());
    }

    #[tokio::test]
    async fn test_unparseable_status_fails_scrape() {
        let dir = tempfile::tempdir().unwrap();
        let c = collector(dir.path(), "# No currently configured DRBD found.\n");
        assert!(matches!(c.collect().await, Err(CollectorError::Parse { .. })));
    }

    #[test]
    fn test_construction_requires_drbdsetup() {
        let dir = tempfile::tempdir().unwrap();
        let result = DrbdCollector::new(
            dir.path().join("drbdsetup"),
            dir.path().join("splitbrain"),
            Arc::new(FixtureRunner::new()),
        );
        assert!(matches!(result, Err(CollectorError::NotExecutable { .. })));
    }

    #[tokio::test]
    async fn test_repeated_and_concurrent_scrapes_agree() {
        let dir = tempfile::tempdir().unwrap();
        let markers = dir.path().join("splitbrain");
        std::fs::create_dir(&markers).unwrap();
        std::fs::write(markers.join("drbd-split-brain-detected-1-single-0-0"), "").unwrap();
        let c = Arc::new(collector(dir.path(), STATUS));
        let key = |samples: Vec<Sample>| -> Vec<(String, Vec<String>, u64)> {
            samples
                .into_iter()
                .map(|s| {
                    let (name, labels) = s.series_key();
                    (name, labels, s.value().to_bits())
                })
                .collect()
        };
        let first = key(c.collect().await.unwrap());
        let second = key(c.collect().await.unwrap());
        assert_eq!(first, second);

        let scrapes = futures::future::join_all((0..8).map(|_| {
            let c = Arc::clone(&c);
            async move { c.collect().await.unwrap() }
        }))
        .await;
        for samples in scrapes {
            assert_eq!(key(samples), first);
        }
    }
}
