//! Startup assembly of the subsystem collectors.

use crate::collectors::corosync::CorosyncCollector;
use crate::collectors::drbd::DrbdCollector;
use crate::collectors::pacemaker::PacemakerCollector;
use crate::collectors::sbd::SbdCollector;
use crate::collectors::{Collector, InstrumentedCollector};
use crate::command::{CommandRunner, DEFAULT_TIMEOUT};
use crate::errors::{CollectorError, RegistryError};
use crate::registry::MetricsRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Where each subsystem's tools and files live.
#[derive(Debug, Clone)]
pub struct CollectorPaths {
    pub crm_mon: PathBuf,
    pub cibadmin: PathBuf,
    pub corosync_cfgtool: PathBuf,
    pub corosync_quorumtool: PathBuf,
    pub sbd: PathBuf,
    pub sbd_config: PathBuf,
    pub drbdsetup: PathBuf,
    pub drbd_split_brain_dir: PathBuf,
    /// Bound on file reads done at scrape time.
    pub read_timeout: Duration,
}

impl Default for CollectorPaths {
    fn default() -> Self {
        Self {
            crm_mon: "/usr/sbin/crm_mon".into(),
            cibadmin: "/usr/sbin/cibadmin".into(),
            corosync_cfgtool: "/usr/sbin/corosync-cfgtool".into(),
            corosync_quorumtool: "/usr/sbin/corosync-quorumtool".into(),
            sbd: "/usr/sbin/sbd".into(),
            sbd_config: "/etc/sysconfig/sbd".into(),
            drbdsetup: "/sbin/drbdsetup".into(),
            drbd_split_brain_dir: "/var/run/drbd/splitbrain".into(),
            read_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Outcome of a successful registration pass.
#[derive(Debug, Default)]
pub struct Registration {
    pub registered: Vec<&'static str>,
    pub failed: Vec<(&'static str, CollectorError)>,
}

fn boxed<C: Collector + 'static>(collector: C) -> Box<dyn Collector> {
    Box::new(collector)
}

/// Build the four collectors, skip the ones that cannot start, instrument
/// the rest and register them with `registry`.
///
/// A descriptor collision, or no collector surviving construction, is fatal.
pub fn register_collectors(
    paths: &CollectorPaths,
    runner: Arc<dyn CommandRunner>,
    registry: &mut MetricsRegistry,
) -> Result<Registration, RegistryError> {
    let built = [
        (
            "pacemaker",
            PacemakerCollector::new(&paths.crm_mon, &paths.cibadmin, Arc::clone(&runner)).map(boxed),
        ),
        (
            "corosync",
            CorosyncCollector::new(
                &paths.corosync_cfgtool,
                &paths.corosync_quorumtool,
                Arc::clone(&runner),
            )
            .map(boxed),
        ),
        (
            "sbd",
            SbdCollector::new(&paths.sbd, &paths.sbd_config, Arc::clone(&runner))
                .map(|c| c.with_read_timeout(paths.read_timeout))
                .map(boxed),
        ),
        (
            "drbd",
            DrbdCollector::new(&paths.drbdsetup, &paths.drbd_split_brain_dir, Arc::clone(&runner))
                .map(|c| c.with_read_timeout(paths.read_timeout))
                .map(boxed),
        ),
    ];

    let mut registration = Registration::default();
    for (subsystem, collector) in built {
        let collector = match collector.and_then(InstrumentedCollector::instrument) {
            Ok(collector) => collector,
            Err(e) => {
                warn!(subsystem, error = %e, "could not initialize collector");
                registration.failed.push((subsystem, e));
                continue;
            }
        };
        registry.register(collector)?;
        info!("{} collector registered.", subsystem);
        registration.registered.push(subsystem);
    }

    if registration.registered.is_empty() {
        return Err(RegistryError::NoCollectors);
    }
    Ok(registration)
}
