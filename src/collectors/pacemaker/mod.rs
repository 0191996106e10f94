pub mod cib;
pub mod crm_mon;

use super::{Collector, InstrumentableCollector, SubsystemCollector};
use crate::command::{check_executable, CommandRunner};
use crate::errors::CollectorError;
use crate::metrics::{bool_value, state_samples, DescriptorSet, MetricDescriptor, Sample};
use async_trait::async_trait;
use cib::Constraints;
use crm_mon::{ClusterStatus, Node};
use std::path::PathBuf;
use std::sync::Arc;

const SUBSYSTEM: &str = "pacemaker";

const CRM_MON_ARGS: &[&str] = &["--as-xml", "--group-by-node", "--inactive"];
const CIBADMIN_ARGS: &[&str] = &["--query", "--local"];

const NODE_STATUSES: &[&str] = &[
    "online",
    "standby",
    "standby_onfail",
    "maintenance",
    "pending",
    "unclean",
    "shutdown",
    "expected_up",
    "dc",
];

const RESOURCE_ROLES: &[&str] = &[
    "Started",
    "Stopped",
    "Promoted",
    "Unpromoted",
    "Starting",
    "Stopping",
    "Migrating",
    "Unknown",
];

const RESOURCE_FLAGS: &[&str] = &[
    "active",
    "orphaned",
    "blocked",
    "managed",
    "failed",
    "failure_ignored",
];

/// One scrape worth of resource manager state: the status report merged
/// with the constraint counts of the CIB.
#[derive(Debug, Clone, PartialEq)]
pub struct PacemakerSnapshot {
    pub status: ClusterStatus,
    pub constraints: Constraints,
}

struct Descriptors {
    set: DescriptorSet,
    nodes: Arc<MetricDescriptor>,
    node_attributes: Arc<MetricDescriptor>,
    resources: Arc<MetricDescriptor>,
    resource_flags: Arc<MetricDescriptor>,
    fail_count: Arc<MetricDescriptor>,
    migration_threshold: Arc<MetricDescriptor>,
    location_constraints: Arc<MetricDescriptor>,
    constraints: Arc<MetricDescriptor>,
    quorate: Arc<MetricDescriptor>,
    stonith_enabled: Arc<MetricDescriptor>,
    config_last_change: Arc<MetricDescriptor>,
}

impl Descriptors {
    fn new() -> Result<Self, prometheus::Error> {
        let mut set = DescriptorSet::new(SUBSYSTEM);
        Ok(Self {
            nodes: set.gauge(
                "nodes",
                "The status of each node in the cluster; 1 means the node is in that status, 0 otherwise.",
                &["node", "type", "status"],
            )?,
            node_attributes: set.gauge(
                "node_attributes",
                "Metadata attributes of each node; value is always 1.",
                &["node", "name", "value"],
            )?,
            resources: set.gauge(
                "resources",
                "The role of each resource instance; 1 means the instance is in that role, 0 otherwise.",
                &["node", "resource", "role"],
            )?,
            resource_flags: set.gauge(
                "resource_flags",
                "Status flags of each resource instance; 1 means the flag is set.",
                &["node", "resource", "flag"],
            )?,
            fail_count: set.counter(
                "fail_count",
                "The failcount of a resource on a node; INFINITY is reported as 1000000.",
                &["node", "resource"],
            )?,
            migration_threshold: set.gauge(
                "migration_threshold",
                "The number of failures after which a resource is moved away from a node.",
                &["node", "resource"],
            )?,
            location_constraints: set.gauge(
                "location_constraints",
                "Score of node-pinned location constraints; INFINITY is reported as 1000000.",
                &["constraint", "node", "resource", "role"],
            )?,
            constraints: set.gauge(
                "constraints",
                "Number of configured constraints by type.",
                &["type"],
            )?,
            quorate: set.gauge("quorate", "Whether the designated controller reports quorum.", &[])?,
            stonith_enabled: set.gauge("stonith_enabled", "Whether fencing is enabled.", &[])?,
            config_last_change: set.gauge(
                "config_last_change",
                "Unix timestamp of the last cluster configuration change.",
                &[],
            )?,
            set,
        })
    }
}

/// Resource manager collector built on `crm_mon` and `cibadmin`.
pub struct PacemakerCollector {
    crm_mon_path: PathBuf,
    cibadmin_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    metrics: Descriptors,
}

impl PacemakerCollector {
    pub fn new(
        crm_mon_path: impl Into<PathBuf>,
        cibadmin_path: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, CollectorError> {
        let crm_mon_path = crm_mon_path.into();
        let cibadmin_path = cibadmin_path.into();
        check_executable(&crm_mon_path)?;
        check_executable(&cibadmin_path)?;

        Ok(Self {
            crm_mon_path,
            cibadmin_path,
            runner,
            metrics: Descriptors::new()?,
        })
    }

    async fn snapshot(&self) -> Result<PacemakerSnapshot, CollectorError> {
        let (status, cib) = tokio::join!(
            self.runner.run(&self.crm_mon_path, CRM_MON_ARGS),
            self.runner.run(&self.cibadmin_path, CIBADMIN_ARGS),
        );
        let status = status?.into_report(&self.crm_mon_path)?;
        let cib = cib?.into_report(&self.cibadmin_path)?;

        Ok(PacemakerSnapshot {
            status: crm_mon::parse(&status)?,
            constraints: cib::parse(&cib)?,
        })
    }

    fn samples(&self, snapshot: &PacemakerSnapshot) -> Vec<Sample> {
        let m = &self.metrics;
        let status = &snapshot.status;
        let mut samples = Vec::new();

        for node in &status.nodes {
            for state in NODE_STATUSES {
                samples.push(Sample::new(
                    &m.nodes,
                    bool_value(node_status(node, state)),
                    vec![node.name.clone(), node.node_type.clone(), state.to_string()],
                ));
            }
        }

        for attribute in &status.node_attributes {
            samples.push(Sample::new(
                &m.node_attributes,
                1.0,
                vec![
                    attribute.node.clone(),
                    attribute.name.clone(),
                    attribute.value.clone(),
                ],
            ));
        }

        for resource in &status.resources {
            let labels = [resource.node.as_str(), resource.id.as_str()];
            samples.extend(state_samples(
                &m.resources,
                &labels,
                RESOURCE_ROLES,
                normalize_role(&resource.role),
            ));

            let flags = [
                resource.active,
                resource.orphaned,
                resource.blocked,
                resource.managed,
                resource.failed,
                resource.failure_ignored,
            ];
            for (flag, set) in RESOURCE_FLAGS.iter().zip(flags) {
                samples.push(Sample::new(
                    &m.resource_flags,
                    bool_value(set),
                    vec![resource.node.clone(), resource.id.clone(), flag.to_string()],
                ));
            }
        }

        for entry in &status.history {
            let labels = vec![entry.node.clone(), entry.resource.clone()];
            if let Some(count) = entry.fail_count {
                samples.push(Sample::new(&m.fail_count, count as f64, labels.clone()));
            }
            if let Some(threshold) = entry.migration_threshold {
                samples.push(Sample::new(&m.migration_threshold, threshold as f64, labels));
            }
        }

        let constraints = &snapshot.constraints;
        for location in &constraints.locations {
            samples.push(Sample::new(
                &m.location_constraints,
                location.score as f64,
                vec![
                    location.id.clone(),
                    location.node.clone(),
                    location.resource.clone(),
                    location.role.clone(),
                ],
            ));
        }
        for (kind, count) in [
            ("location", constraints.location_count),
            ("colocation", constraints.colocation_count),
            ("order", constraints.order_count),
        ] {
            samples.push(Sample::new(&m.constraints, count as f64, vec![kind.to_string()]));
        }

        samples.push(Sample::new(&m.quorate, bool_value(status.quorate), Vec::new()));
        samples.push(Sample::new(
            &m.stonith_enabled,
            bool_value(status.stonith_enabled),
            Vec::new(),
        ));
        if let Some(changed) = status.last_change {
            samples.push(Sample::new(&m.config_last_change, changed as f64, Vec::new()));
        }

        samples
    }
}

fn node_status(node: &Node, status: &str) -> bool {
    match status {
        "online" => node.online,
        "standby" => node.standby,
        "standby_onfail" => node.standby_onfail,
        "maintenance" => node.maintenance,
        "pending" => node.pending,
        "unclean" => node.unclean,
        "shutdown" => node.shutdown,
        "expected_up" => node.expected_up,
        "dc" => node.is_dc,
        _ => false,
    }
}

/// Map legacy role names onto the current ones; anything unknown is `Unknown`.
fn normalize_role(role: &str) -> &str {
    match role {
        "Master" => "Promoted",
        "Slave" => "Unpromoted",
        r if RESOURCE_ROLES.contains(&r) => r,
        _ => "Unknown",
    }
}

#[async_trait]
impl Collector for PacemakerCollector {
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

impl SubsystemCollector for PacemakerCollector {
    fn subsystem(&self) -> &'static str {
        SUBSYSTEM
    }
}

impl InstrumentableCollector for PacemakerCollector {}
