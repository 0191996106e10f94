pub mod parser;

use super::{Collector, InstrumentableCollector, SubsystemCollector};
use crate::command::{check_executable, CommandRunner};
use crate::errors::CollectorError;
use crate::metrics::{bool_value, DescriptorSet, MetricDescriptor, Sample};
use async_trait::async_trait;
use parser::{CorosyncSnapshot, Parser};
use std::path::PathBuf;
use std::sync::Arc;

const SUBSYSTEM: &str = "corosync";

const CFGTOOL_ARGS: &[&str] = &["-s"];
const QUORUMTOOL_ARGS: &[&str] = &["-p"];

struct Descriptors {
    set: DescriptorSet,
    quorate: Arc<MetricDescriptor>,
    ring_status: Arc<MetricDescriptor>,
    ring_errors: Arc<MetricDescriptor>,
    quorum_votes: Arc<MetricDescriptor>,
    member_votes: Arc<MetricDescriptor>,
}

impl Descriptors {
    fn new() -> Result<Self, prometheus::Error> {
        let mut set = DescriptorSet::new(SUBSYSTEM);
        Ok(Self {
            quorate: set.gauge("quorate", "Whether or not the cluster is quorate.", &[])?,
            ring_status: set.gauge(
                "ring_status",
                "Whether each ring (or knet link) is faulty: 1 means faulty, 0 means healthy.",
                &["ring_id", "node_id", "address"],
            )?,
            ring_errors: set.gauge("ring_errors", "The total number of faulty rings.", &[])?,
            quorum_votes: set.gauge(
                "quorum_votes",
                "Cluster quorum votes; one line per type.",
                &["type"],
            )?,
            member_votes: set.gauge(
                "member_votes",
                "How many votes each member node has contributed to the current quorum.",
                &["node_id", "node", "local"],
            )?,
            set,
        })
    }
}

/// Group communication collector built on `corosync-cfgtool` and
/// `corosync-quorumtool`.
pub struct CorosyncCollector {
    cfgtool_path: PathBuf,
    quorumtool_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    parser: Parser,
    metrics: Descriptors,
}

impl CorosyncCollector {
    pub fn new(
        cfgtool_path: impl Into<PathBuf>,
        quorumtool_path: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, CollectorError> {
        let cfgtool_path = cfgtool_path.into();
        let quorumtool_path = quorumtool_path.into();
        check_executable(&cfgtool_path)?;
        check_executable(&quorumtool_path)?;

        Ok(Self {
            cfgtool_path,
            quorumtool_path,
            runner,
            parser: Parser::new()?,
            metrics: Descriptors::new()?,
        })
    }

    async fn snapshot(&self) -> Result<CorosyncSnapshot, CollectorError> {
        let (rings, quorum) = tokio::join!(
            self.runner.run(&self.cfgtool_path, CFGTOOL_ARGS),
            self.runner.run(&self.quorumtool_path, QUORUMTOOL_ARGS),
        );
        // both tools exit non-zero on a degraded but still reportable cluster
        let rings = rings?.into_report(&self.cfgtool_path)?;
        let quorum = quorum?.into_report(&self.quorumtool_path)?;

        Ok(CorosyncSnapshot::merge(
            self.parser.parse_rings(&rings)?,
            self.parser.parse_quorum(&quorum)?,
        ))
    }

    fn samples(&self, snapshot: &CorosyncSnapshot) -> Vec<Sample> {
        let m = &self.metrics;
        let quorum = &snapshot.quorum;
        let mut samples = vec![Sample::new(&m.quorate, bool_value(quorum.quorate), Vec::new())];

        for ring in &snapshot.rings {
            samples.push(Sample::new(
                &m.ring_status,
                bool_value(ring.faulty),
                vec![ring.id.clone(), snapshot.node_id.clone(), ring.address.clone()],
            ));
        }
        samples.push(Sample::new(&m.ring_errors, snapshot.faulty_rings() as f64, Vec::new()));

        for (kind, votes) in [
            ("expected_votes", quorum.expected_votes),
            ("highest_expected", quorum.highest_expected),
            ("total_votes", quorum.total_votes),
            ("quorum", quorum.quorum),
        ] {
            samples.push(Sample::new(&m.quorum_votes, votes as f64, vec![kind.to_string()]));
        }

        for member in &quorum.members {
            samples.push(Sample::new(
                &m.member_votes,
                member.votes as f64,
                vec![member.node_id.clone(), member.name.clone(), member.local.to_string()],
            ));
        }

        samples
    }
}

#[async_trait]
impl Collector for CorosyncCollector {
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

impl SubsystemCollector for CorosyncCollector {
    fn subsystem(&self) -> &'static str {
        SUBSYSTEM
    }
}

impl InstrumentableCollector for CorosyncCollector {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::fixture::{fake_executable, FixtureRunner};
    use crate::metrics::check_arity;
    use std::path::Path;

    const CFGTOOL: &str = include_str!("../../../tests/fixtures/corosync/cfgtool_v2_faulty.txt");
    const QUORUMTOOL: &str = include_str!("../../../tests/fixtures/corosync/quorumtool.txt");

    fn collector(dir: &Path, runner: impl FnOnce(&Path, &Path) -> FixtureRunner) -> CorosyncCollector {
        let cfgtool = fake_executable(dir, "corosync-cfgtool");
        let quorumtool = fake_executable(dir, "corosync-quorumtool");
        let runner = runner(&cfgtool, &quorumtool);
        CorosyncCollector::new(cfgtool, quorumtool, Arc::new(runner)).unwrap()
    }

    #[tokio::test]
    async fn test_collect_one_faulty_ring() {
        let dir = tempfile::tempdir().unwrap();
        // cfgtool exits 1 when a ring is faulty but still prints the report
        let c = collector(dir.path(), |cfg, quorum| {
            FixtureRunner::new()
                .with_exit(cfg, CFGTOOL_ARGS, 1, CFGTOOL)
                .with(quorum, QUORUMTOOL_ARGS, QUORUMTOOL)
        });
        let samples = c.collect().await.unwrap();
        assert!(check_arity(&samples).is_ok());
        // quorate, 2 rings, ring_errors, 4 vote types, 2 members
        assert_eq!(samples.len(), 10);

        let rings: Vec<(&str, &str, f64)> = samples
            .iter()
            .filter(|s| s.name() == "ha_cluster_corosync_ring_status")
            .map(|s| (s.label("ring_id").unwrap(), s.label("address").unwrap(), s.value()))
            .collect();
        assert_eq!(rings, vec![("0", "10.0.0.1", 0.0), ("1", "172.16.0.1", 1.0)]);
        assert!(samples
            .iter()
            .filter(|s| s.name() == "ha_cluster_corosync_ring_status")
            .all(|s| s.label("node_id") == Some("16777226")));

        let value = |name: &str| samples.iter().find(|s| s.name() == name).unwrap().value();
        assert_eq!(value("ha_cluster_corosync_ring_errors"), 1.0);
        assert_eq!(value("ha_cluster_corosync_quorate"), 1.0);

        let local = samples
            .iter()
            .find(|s| s.name() == "ha_cluster_corosync_member_votes" && s.label("local") == Some("true"))
            .unwrap();
        assert_eq!(local.label("node"), Some("dma-dog-hana01"));
    }

    #[tokio::test]
    async fn test_quorumtool_failure_fails_scrape() {
        let dir = tempfile::tempdir().unwrap();
        let c = collector(dir.path(), |cfg, quorum| {
            FixtureRunner::new()
                .with(cfg, CFGTOOL_ARGS, CFGTOOL)
                .with_exit(quorum, QUORUMTOOL_ARGS, 1, "")
        });
        assert!(matches!(c.collect().await, Err(CollectorError::ExitStatus { .. })));

        let c = collector(dir.path(), |cfg, _| FixtureRunner::new().with(cfg, CFGTOOL_ARGS, CFGTOOL));
        assert!(matches!(c.collect().await, Err(CollectorError::Spawn { .. })));
    }

    #[test]
    fn test_construction_requires_both_tools() {
        let dir = tempfile::tempdir().unwrap();
        let cfgtool = fake_executable(dir.path(), "corosync-cfgtool");
        assert!(CorosyncCollector::new(
            cfgtool,
            dir.path().join("corosync-quorumtool"),
            Arc::new(FixtureRunner::new())
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_repeated_and_concurrent_scrapes_agree() {
        let dir = tempfile::tempdir().unwrap();
        let c = Arc::new(collector(dir.path(), |cfg, quorum| {
            FixtureRunner::new()
                .with_exit(cfg, CFGTOOL_ARGS, 1, CFGTOOL)
                .with(quorum, QUORUMTOOL_ARGS, QUORUMTOOL)
        }));
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
