//! Metric model shared by every collector.
//!
//! A [`MetricDescriptor`] is fixed at collector construction and never changes
//! afterwards; a [`Sample`] is produced fresh on every scrape and then dropped.
//! Descriptors are backed by a [`prometheus::core::Desc`] so that metric and
//! label names are validated once, up front, by the exposition library itself.

use prometheus::core::Desc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const NAMESPACE: &str = "ha_cluster";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Static metadata of one metric family.
#[derive(Debug, Clone)]
pub struct MetricDescriptor {
    kind: MetricKind,
    desc: Desc,
}

impl MetricDescriptor {
    pub fn new(
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[&str],
    ) -> Result<Self, prometheus::Error> {
        Self::with_const_labels(name, help, kind, label_names, &[])
    }

    /// Descriptor whose identity also includes fixed label values, so that the
    /// same name can be registered more than once with different constants.
    pub fn with_const_labels(
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[&str],
        const_labels: &[(&str, &str)],
    ) -> Result<Self, prometheus::Error> {
        let const_labels: HashMap<String, String> = const_labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let desc = Desc::new(
            name.to_string(),
            help.to_string(),
            label_names.iter().map(|l| l.to_string()).collect(),
            const_labels,
        )?;
        Ok(Self { kind, desc })
    }

    pub fn name(&self) -> &str {
        &self.desc.fq_name
    }

    pub fn help(&self) -> &str {
        &self.desc.help
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn label_names(&self) -> &[String] {
        &self.desc.variable_labels
    }

    /// Constant labels, sorted by name.
    pub fn const_labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.desc
            .const_label_pairs
            .iter()
            .map(|p| (p.get_name(), p.get_value()))
    }

    /// Hash over the name and constant label values; equal ids collide on registration.
    pub fn id(&self) -> u64 {
        self.desc.id
    }

    /// Hash over the help text and label names; must agree for equal names.
    pub fn dim_hash(&self) -> u64 {
        self.desc.dim_hash
    }
}

/// One concrete value of a descriptor at scrape time.
#[derive(Debug, Clone)]
pub struct Sample {
    descriptor: Arc<MetricDescriptor>,
    label_values: Vec<String>,
    value: f64,
    timestamp_ms: Option<i64>,
}

impl Sample {
    pub fn new(descriptor: &Arc<MetricDescriptor>, value: f64, label_values: Vec<String>) -> Self {
        debug_assert_eq!(
            descriptor.label_names().len(),
            label_values.len(),
            "label arity mismatch for {}",
            descriptor.name()
        );
        Self {
            descriptor: Arc::clone(descriptor),
            label_values,
            value,
            timestamp_ms: None,
        }
    }

    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    pub fn descriptor(&self) -> &Arc<MetricDescriptor> {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn label_values(&self) -> &[String] {
        &self.label_values
    }

    /// Value of the named variable label, if the descriptor has it.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.descriptor
            .label_names()
            .iter()
            .position(|l| l == name)
            .and_then(|i| self.label_values.get(i))
            .map(String::as_str)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }

    /// Series identity: descriptor name plus label values.
    pub fn series_key(&self) -> (String, Vec<String>) {
        (self.name().to_string(), self.label_values.clone())
    }
}

/// Append-only set of descriptors owned by one collector.
#[derive(Debug, Default)]
pub struct DescriptorSet {
    subsystem: &'static str,
    descriptors: Vec<Arc<MetricDescriptor>>,
}

impl DescriptorSet {
    pub fn new(subsystem: &'static str) -> Self {
        Self {
            subsystem,
            descriptors: Vec::new(),
        }
    }

    pub fn gauge(
        &mut self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<Arc<MetricDescriptor>, prometheus::Error> {
        self.push(name, help, MetricKind::Gauge, labels)
    }

    pub fn counter(
        &mut self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<Arc<MetricDescriptor>, prometheus::Error> {
        self.push(name, help, MetricKind::Counter, labels)
    }

    fn push(
        &mut self,
        name: &str,
        help: &str,
        kind: MetricKind,
        labels: &[&str],
    ) -> Result<Arc<MetricDescriptor>, prometheus::Error> {
        let fq_name = format!("{}_{}_{}", NAMESPACE, self.subsystem, name);
        let descriptor = Arc::new(MetricDescriptor::new(&fq_name, help, kind, labels)?);
        self.descriptors.push(Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn descriptors(&self) -> Vec<Arc<MetricDescriptor>> {
        self.descriptors.clone()
    }
}

pub fn bool_value(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

/// One sample per known state: 1 for `current`, 0 for all others.
///
/// `labels` are the leading label values; the state name is appended as the
/// last label. The series set stays the same whatever the current state is.
pub fn state_samples(
    descriptor: &Arc<MetricDescriptor>,
    labels: &[&str],
    states: &[&str],
    current: &str,
) -> Vec<Sample> {
    if !states.contains(&current) {
        debug!(metric = descriptor.name(), state = current, "state not in the known set");
    }
    states
        .iter()
        .map(|state| {
            let mut values: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
            values.push(state.to_string());
            Sample::new(descriptor, bool_value(*state == current), values)
        })
        .collect()
}

/// Check that every sample's label values match its descriptor's label names.
pub fn check_arity(samples: &[Sample]) -> Result<(), String> {
    for sample in samples {
        let expected = sample.descriptor().label_names().len();
        if sample.label_values().len() != expected {
            return Err(format!(
                "{} has {} label values, expected {}",
                sample.name(),
                sample.label_values().len(),
                expected
            ));
        }
    }
    Ok(())
}
