//! Collector registry and text exposition.
//!
//! Registration enforces the Prometheus descriptor rules: a name plus its
//! constant label values may be registered once, and every descriptor sharing
//! a name must agree on help text, label names and kind. Scrapes run every
//! registered collector concurrently and merge their samples into families.

use crate::collectors::Collector;
use crate::errors::RegistryError;
use crate::metrics::{MetricKind, Sample};
use chrono::Utc;
use futures::future::join_all;
use prometheus::proto::{self, LabelPair, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Default)]
pub struct MetricsRegistry {
    collectors: Vec<Box<dyn Collector>>,
    ids: HashSet<u64>,
    dimensions: HashMap<String, (u64, MetricKind)>,
    family_order: Vec<String>,
    timestamps: bool,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp samples lacking a timestamp with the scrape time.
    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Validate every descriptor of `collector` and take ownership of it.
    ///
    /// Nothing is registered if any descriptor is rejected.
    pub fn register(&mut self, collector: Box<dyn Collector>) -> Result<(), RegistryError> {
        let descriptors = collector.describe();

        let mut new_ids = HashSet::new();
        let mut new_dimensions: HashMap<&str, (u64, MetricKind)> = HashMap::new();
        for descriptor in &descriptors {
            let name = descriptor.name();
            if self.ids.contains(&descriptor.id()) || !new_ids.insert(descriptor.id()) {
                return Err(RegistryError::Collision {
                    name: name.to_string(),
                });
            }
            let dimension = (descriptor.dim_hash(), descriptor.kind());
            let known = self
                .dimensions
                .get(name)
                .or_else(|| new_dimensions.get(name));
            match known {
                Some(existing) if *existing != dimension => {
                    return Err(RegistryError::InconsistentDescriptor {
                        name: name.to_string(),
                    })
                }
                Some(_) => {}
                None => {
                    new_dimensions.insert(name, dimension);
                }
            }
        }

        for descriptor in &descriptors {
            if !self.dimensions.contains_key(descriptor.name()) {
                self.family_order.push(descriptor.name().to_string());
                self.dimensions.insert(
                    descriptor.name().to_string(),
                    (descriptor.dim_hash(), descriptor.kind()),
                );
            }
        }
        self.ids.extend(new_ids);
        self.collectors.push(collector);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Subsystem names of the registered collectors, in registration order.
    pub fn subsystems(&self) -> Vec<&'static str> {
        self.collectors
            .iter()
            .filter_map(|c| c.as_subsystem().map(|s| s.subsystem()))
            .collect()
    }

    /// Run every collector once, concurrently, and merge their samples.
    pub async fn gather(&self) -> Vec<Sample> {
        let results = join_all(self.collectors.iter().map(|c| c.collect())).await;

        let mut samples = Vec::new();
        for (collector, result) in self.collectors.iter().zip(results) {
            match result {
                Ok(batch) => samples.extend(batch),
                Err(e) => {
                    let subsystem = collector.as_subsystem().map(|s| s.subsystem()).unwrap_or("unknown");
                    warn!(subsystem, error = %e, "collector failed");
                }
            }
        }

        samples.retain(|s| {
            let ok = s.label_values().len() == s.descriptor().label_names().len();
            if !ok {
                warn!(metric = s.name(), "dropping sample with mismatched labels");
            }
            ok
        });

        if self.timestamps {
            let now = Utc::now().timestamp_millis();
            samples = samples
                .into_iter()
                .map(|s| match s.timestamp_ms() {
                    Some(_) => s,
                    None => s.with_timestamp_ms(now),
                })
                .collect();
        }
        samples
    }

    /// Group `samples` into families in registration order.
    pub fn families(&self, samples: &[Sample]) -> Vec<MetricFamily> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut families: Vec<MetricFamily> = Vec::new();
        for name in &self.family_order {
            index.insert(name.as_str(), families.len());
            families.push(MetricFamily::default());
        }

        let mut seen = HashSet::new();
        for sample in samples {
            let descriptor = sample.descriptor();
            if !seen.insert((descriptor.id(), sample.label_values())) {
                debug!(metric = sample.name(), "dropping duplicate series");
                continue;
            }

            let slot = match index.get(sample.name()) {
                Some(slot) => *slot,
                None => {
                    index.insert(sample.name(), families.len());
                    families.push(MetricFamily::default());
                    families.len() - 1
                }
            };
            let family = &mut families[slot];
            if family.get_metric().is_empty() {
                family.set_name(descriptor.name().to_string());
                family.set_help(descriptor.help().to_string());
                family.set_field_type(match descriptor.kind() {
                    MetricKind::Gauge => MetricType::GAUGE,
                    MetricKind::Counter => MetricType::COUNTER,
                });
            }
            family.mut_metric().push(metric(sample));
        }

        families.retain(|f| !f.get_metric().is_empty());
        families
    }

    /// Render `samples` in the Prometheus text format.
    pub fn encode(&self, samples: &[Sample]) -> Result<String, RegistryError> {
        let families = self.families(samples);
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn metric(sample: &Sample) -> proto::Metric {
    let descriptor = sample.descriptor();
    let mut metric = proto::Metric::default();

    let constant = descriptor.const_labels();
    let variable = descriptor
        .label_names()
        .iter()
        .map(String::as_str)
        .zip(sample.label_values().iter().map(String::as_str));
    for (name, value) in constant.chain(variable) {
        let mut pair = LabelPair::default();
        pair.set_name(name.to_string());
        pair.set_value(value.to_string());
        metric.mut_label().push(pair);
    }

    match descriptor.kind() {
        MetricKind::Gauge => {
            let mut gauge = proto::Gauge::default();
            gauge.set_value(sample.value());
            metric.set_gauge(gauge);
        }
        MetricKind::Counter => {
            let mut counter = proto::Counter::default();
            counter.set_value(sample.value());
            metric.set_counter(counter);
        }
    }
    if let Some(timestamp_ms) = sample.timestamp_ms() {
        metric.set_timestamp_ms(timestamp_ms);
    }
    metric
}
