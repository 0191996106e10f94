pub mod corosync;
pub mod drbd;
pub mod instrumented;
pub mod pacemaker;
pub mod sbd;

use crate::errors::CollectorError;
use crate::metrics::{MetricDescriptor, Sample};
use async_trait::async_trait;
use std::sync::Arc;

pub use instrumented::InstrumentedCollector;

#[async_trait]
pub trait Collector: Send + Sync {
    /// Every descriptor this collector can emit; fixed at construction.
    fn describe(&self) -> Vec<Arc<MetricDescriptor>>;

    /// Run the subsystem tools, parse their output and return fresh samples.
    ///
    /// An `Err` means the scrape yielded nothing usable. Callers log it and
    /// keep serving; it never reaches the HTTP layer.
    async fn collect(&self) -> Result<Vec<Sample>, CollectorError>;

    fn as_subsystem(&self) -> Option<&dyn SubsystemCollector> {
        None
    }

    fn as_instrumentable(&self) -> Option<&dyn InstrumentableCollector> {
        None
    }
}

/// A collector with a human-readable subsystem name, used in logs.
pub trait SubsystemCollector {
    fn subsystem(&self) -> &'static str;
}

/// A collector that may be wrapped by [`InstrumentedCollector`].
pub trait InstrumentableCollector: SubsystemCollector {
    /// Whether a scrape returning zero samples counts as failed.
    fn empty_means_failure(&self) -> bool {
        true
    }
}
