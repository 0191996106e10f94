use crate::orchestrator::CollectorPaths;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "ha-cluster-exporter", version, about)]
pub struct Config {
    /// Address on which to expose metrics and the landing page.
    #[arg(long = "web.listen-address", env = "HA_CLUSTER_EXPORTER_LISTEN_ADDRESS", default_value = "0.0.0.0:9664")]
    pub listen_address: SocketAddr,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", env = "HA_CLUSTER_EXPORTER_TELEMETRY_PATH", default_value = "/metrics")]
    pub telemetry_path: String,

    /// Minimum log level; RUST_LOG takes precedence when set.
    #[arg(long = "log.level", env = "HA_CLUSTER_EXPORTER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging.
    #[arg(long = "log.json", env = "HA_CLUSTER_EXPORTER_LOG_JSON", default_value_t = false)]
    pub json_logs: bool,

    #[arg(long, env = "HA_CLUSTER_EXPORTER_CRM_MON_PATH", default_value = "/usr/sbin/crm_mon")]
    pub crm_mon_path: PathBuf,

    #[arg(long, env = "HA_CLUSTER_EXPORTER_CIBADMIN_PATH", default_value = "/usr/sbin/cibadmin")]
    pub cibadmin_path: PathBuf,

    #[arg(long, env = "HA_CLUSTER_EXPORTER_COROSYNC_CFGTOOL_PATH", default_value = "/usr/sbin/corosync-cfgtool")]
    pub corosync_cfgtool_path: PathBuf,

    #[arg(long, env = "HA_CLUSTER_EXPORTER_COROSYNC_QUORUMTOOL_PATH", default_value = "/usr/sbin/corosync-quorumtool")]
    pub corosync_quorumtool_path: PathBuf,

    #[arg(long, env = "HA_CLUSTER_EXPORTER_SBD_PATH", default_value = "/usr/sbin/sbd")]
    pub sbd_path: PathBuf,

    #[arg(long, env = "HA_CLUSTER_EXPORTER_SBD_CONFIG_PATH", default_value = "/etc/sysconfig/sbd")]
    pub sbd_config_path: PathBuf,

    #[arg(long, env = "HA_CLUSTER_EXPORTER_DRBDSETUP_PATH", default_value = "/sbin/drbdsetup")]
    pub drbdsetup_path: PathBuf,

    /// Directory the DRBD split-brain hook writes its marker files to.
    #[arg(long, env = "HA_CLUSTER_EXPORTER_DRBDSPLITBRAIN_PATH", default_value = "/var/run/drbd/splitbrain")]
    pub drbdsplitbrain_path: PathBuf,

    /// Add the scrape time to every sample (deprecated by Prometheus).
    #[arg(long, env = "HA_CLUSTER_EXPORTER_ENABLE_TIMESTAMPS", default_value_t = false)]
    pub enable_timestamps: bool,

    /// Timeout for each external command and file read, in milliseconds.
    #[arg(long, env = "HA_CLUSTER_EXPORTER_COMMAND_TIMEOUT_MS", default_value_t = 5000)]
    pub command_timeout_ms: u64,
}

impl Config {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn collector_paths(&self) -> CollectorPaths {
        CollectorPaths {
            crm_mon: self.crm_mon_path.clone(),
            cibadmin: self.cibadmin_path.clone(),
            corosync_cfgtool: self.corosync_cfgtool_path.clone(),
            corosync_quorumtool: self.corosync_quorumtool_path.clone(),
            sbd: self.sbd_path.clone(),
            sbd_config: self.sbd_config_path.clone(),
            drbdsetup: self.drbdsetup_path.clone(),
            drbd_split_brain_dir: self.drbdsplitbrain_path.clone(),
            read_timeout: self.command_timeout(),
        }
    }
}
