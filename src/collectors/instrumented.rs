use super::{Collector, SubsystemCollector};
use crate::errors::CollectorError;
use crate::metrics::{bool_value, MetricDescriptor, MetricKind, Sample, NAMESPACE};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Adds scrape duration, success and error-count samples around any
/// instrumentable collector, leaving the inner samples untouched.
pub struct InstrumentedCollector {
    inner: Box<dyn Collector>,
    subsystem: &'static str,
    empty_means_failure: bool,
    duration: Arc<MetricDescriptor>,
    success: Arc<MetricDescriptor>,
    errors: Arc<MetricDescriptor>,
    failed_scrapes: AtomicU64,
}

impl InstrumentedCollector {
    pub fn new(
        inner: Box<dyn Collector>,
        subsystem: &'static str,
        empty_means_failure: bool,
    ) -> Result<Self, CollectorError> {
        let labels = [("collector", subsystem)];
        let descriptor = |name: &str, help: &str, kind| {
            MetricDescriptor::with_const_labels(
                &format!("{}_{}", NAMESPACE, name),
                help,
                kind,
                &[],
                &labels,
            )
            .map(Arc::new)
        };

        Ok(Self {
            duration: descriptor(
                "scrape_duration_seconds",
                "Duration of a collector scrape.",
                MetricKind::Gauge,
            )?,
            success: descriptor(
                "scrape_success",
                "Whether the last collector scrape succeeded.",
                MetricKind::Gauge,
            )?,
            errors: descriptor(
                "scrape_errors_total",
                "Number of failed collector scrapes since start.",
                MetricKind::Counter,
            )?,
            inner,
            subsystem,
            empty_means_failure,
            failed_scrapes: AtomicU64::new(0),
        })
    }

    /// Wrap `inner` if it opts into instrumentation, otherwise hand it back bare.
    pub fn instrument(inner: Box<dyn Collector>) -> Result<Box<dyn Collector>, CollectorError> {
        let capability = inner
            .as_instrumentable()
            .map(|c| (c.subsystem(), c.empty_means_failure()));
        match capability {
            Some((subsystem, empty_means_failure)) => {
                Ok(Box::new(Self::new(inner, subsystem, empty_means_failure)?))
            }
            None => Ok(inner),
        }
    }
}

#[async_trait]
impl Collector for InstrumentedCollector {
    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        let mut descriptors = self.inner.describe();
        descriptors.extend([
            Arc::clone(&self.duration),
            Arc::clone(&self.success),
            Arc::clone(&self.errors),
        ]);
        descriptors
    }

    async fn collect(&self) -> Result<Vec<Sample>, CollectorError> {
        let start = Instant::now();
        let result = self.inner.collect().await;
        let elapsed = start.elapsed().as_secs_f64();

        let (mut samples, ok) = match result {
            Ok(samples) if samples.is_empty() && self.empty_means_failure => {
                warn!(subsystem = self.subsystem, "scrape returned no samples");
                (samples, false)
            }
            Ok(samples) => (samples, true),
            Err(e) => {
                warn!(subsystem = self.subsystem, error = %e, "scrape failed");
                (Vec::new(), false)
            }
        };

        let failed = if ok {
            self.failed_scrapes.load(Ordering::Relaxed)
        } else {
            self.failed_scrapes.fetch_add(1, Ordering::Relaxed) + 1
        };

        samples.push(Sample::new(&self.duration, elapsed, Vec::new()));
        samples.push(Sample::new(&self.success, bool_value(ok), Vec::new()));
        samples.push(Sample::new(&self.errors, failed as f64, Vec::new()));
        Ok(samples)
    }

    fn as_subsystem(&self) -> Option<&dyn SubsystemCollector> {
        self.inner.as_subsystem()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::InstrumentableCollector;
    use crate::metrics::DescriptorSet;

    struct Stub {
        outcome: Option<usize>,
        empty_means_failure: bool,
        up: Arc<MetricDescriptor>,
        descriptors: DescriptorSet,
    }

    impl Stub {
        fn new(outcome: Option<usize>) -> Self {
            let mut descriptors = DescriptorSet::new("stub");
            let up = descriptors.gauge("up", "Stub metric.", &["n"]).unwrap();
            Self {
                outcome,
                empty_means_failure: true,
                up,
                descriptors,
            }
        }
    }

    #[async_trait]
    impl Collector for Stub {
        fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
            self.descriptors.descriptors()
        }

        async fn collect(&self) -> Result<Vec<Sample>, CollectorError> {
            match self.outcome {
                Some(n) => Ok((0..n)
                    .map(|i| Sample::new(&self.up, 1.0, vec![i.to_string()]))
                    .collect()),
                None => Err(CollectorError::parse("stub output", "garbage")),
            }
        }

        fn as_subsystem(&self) -> Option<&dyn SubsystemCollector> {
            Some(self)
        }

        fn as_instrumentable(&self) -> Option<&dyn InstrumentableCollector> {
            Some(self)
        }
    }

    impl SubsystemCollector for Stub {
        fn subsystem(&self) -> &'static str {
            "stub"
        }
    }

    impl InstrumentableCollector for Stub {
        fn empty_means_failure(&self) -> bool {
            self.empty_means_failure
        }
    }

    struct Bare;

    #[async_trait]
    impl Collector for Bare {
        fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
            Vec::new()
        }

        async fn collect(&self) -> Result<Vec<Sample>, CollectorError> {
            Ok(Vec::new())
        }
    }

    fn value(samples: &[Sample], name: &str) -> f64 {
        samples.iter().find(|s| s.name() == name).unwrap().value()
    }

    #[tokio::test]
    async fn test_success_adds_three_samples() {
        for n in [1, 5] {
            let c = InstrumentedCollector::instrument(Box::new(Stub::new(Some(n)))).unwrap();
            let samples = c.collect().await.unwrap();
            assert_eq!(samples.len(), n + 3);
            assert_eq!(value(&samples, "ha_cluster_scrape_success"), 1.0);
            assert_eq!(value(&samples, "ha_cluster_scrape_errors_total"), 0.0);
            assert!(value(&samples, "ha_cluster_scrape_duration_seconds") >= 0.0);
        }
    }

    #[tokio::test]
    async fn test_failure_flags_and_counts() {
        let c = InstrumentedCollector::instrument(Box::new(Stub::new(None))).unwrap();
        let first = c.collect().await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(value(&first, "ha_cluster_scrape_success"), 0.0);
        assert_eq!(value(&first, "ha_cluster_scrape_errors_total"), 1.0);

        let second = c.collect().await.unwrap();
        assert_eq!(value(&second, "ha_cluster_scrape_errors_total"), 2.0);
    }

    #[tokio::test]
    async fn test_empty_policy() {
        let c = InstrumentedCollector::instrument(Box::new(Stub::new(Some(0)))).unwrap();
        let samples = c.collect().await.unwrap();
        assert_eq!(value(&samples, "ha_cluster_scrape_success"), 0.0);

        let mut tolerant = Stub::new(Some(0));
        tolerant.empty_means_failure = false;
        let c = InstrumentedCollector::instrument(Box::new(tolerant)).unwrap();
        let samples = c.collect().await.unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(value(&samples, "ha_cluster_scrape_success"), 1.0);
    }

    #[test]
    fn test_describe_keeps_inner_names() {
        let c = InstrumentedCollector::instrument(Box::new(Stub::new(Some(1)))).unwrap();
        let names: Vec<String> = c.describe().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "ha_cluster_stub_up",
                "ha_cluster_scrape_duration_seconds",
                "ha_cluster_scrape_success",
                "ha_cluster_scrape_errors_total",
            ]
        );
        assert_eq!(c.as_subsystem().map(|s| s.subsystem()), Some("stub"));
        let consts: Vec<_> = c.describe()[1].const_labels().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        assert_eq!(consts, vec![("collector".to_string(), "stub".to_string())]);
    }

    #[test]
    fn test_non_instrumentable_stays_bare() {
        let c = InstrumentedCollector::instrument(Box::new(Bare)).unwrap();
        assert!(c.describe().is_empty());
        assert!(c.as_subsystem().is_none());
    }
}
