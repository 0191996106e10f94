//! `drbdsetup status --json` output and split-brain marker file names.

use crate::errors::CollectorError;
use serde::Deserialize;
use tracing::warn;

pub const SPLIT_BRAIN_PREFIX: &str = "drbd-split-brain-detected-";

#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub id: String,
    pub disk_state: String,
    pub quorum: bool,
    pub read: f64,
    pub written: f64,
    pub al_writes: f64,
    pub bm_writes: f64,
    pub upper_pending: f64,
    pub lower_pending: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerDevice {
    pub volume: String,
    pub peer_disk_state: String,
    pub percent_in_sync: f64,
    pub received: f64,
    pub sent: f64,
    pub pending: f64,
    pub unacked: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub peer_node_id: String,
    pub peer: String,
    pub state: String,
    pub peer_devices: Vec<PeerDevice>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub role: String,
    pub volumes: Vec<Volume>,
    pub connections: Vec<Connection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawResource {
    name: Option<String>,
    role: Option<String>,
    #[serde(default)]
    devices: Vec<RawDevice>,
    #[serde(default)]
    connections: Vec<RawConnection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawDevice {
    volume: Option<u32>,
    disk_state: Option<String>,
    #[serde(default)]
    quorum: bool,
    #[serde(default)]
    read: f64,
    #[serde(default)]
    written: f64,
    #[serde(default)]
    al_writes: f64,
    #[serde(default)]
    bm_writes: f64,
    #[serde(default)]
    upper_pending: f64,
    #[serde(default)]
    lower_pending: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConnection {
    peer_node_id: Option<u32>,
    name: Option<String>,
    connection_state: Option<String>,
    // drbdsetup spells this one with an underscore
    #[serde(default, rename = "peer_devices")]
    peer_devices: Vec<RawPeerDevice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawPeerDevice {
    volume: Option<u32>,
    peer_disk_state: Option<String>,
    #[serde(default)]
    percent_in_sync: f64,
    #[serde(default)]
    received: f64,
    #[serde(default)]
    sent: f64,
    #[serde(default)]
    pending: f64,
    #[serde(default)]
    unacked: f64,
}

pub fn parse_status(json: &str) -> Result<Vec<Resource>, CollectorError> {
    let raw: Vec<RawResource> =
        serde_json::from_str(json).map_err(|e| CollectorError::parse("drbdsetup status", e))?;

    let mut resources = Vec::with_capacity(raw.len());
    for resource in raw {
        let Some(name) = resource.name else {
            warn!("skipping drbd resource without a name");
            continue;
        };

        let volumes = resource
            .devices
            .into_iter()
            .filter_map(|d| {
                let Some(volume) = d.volume else {
                    warn!(resource = %name, "skipping drbd device without a volume id");
                    return None;
                };
                Some(Volume {
                    id: volume.to_string(),
                    disk_state: d.disk_state.unwrap_or_else(|| "DUnknown".to_string()),
                    quorum: d.quorum,
                    read: d.read,
                    written: d.written,
                    al_writes: d.al_writes,
                    bm_writes: d.bm_writes,
                    upper_pending: d.upper_pending,
                    lower_pending: d.lower_pending,
                })
            })
            .collect();

        let connections = resource
            .connections
            .into_iter()
            .filter_map(|c| {
                let Some(peer_node_id) = c.peer_node_id else {
                    warn!(resource = %name, "skipping drbd connection without a peer node id");
                    return None;
                };
                let peer_devices = c
                    .peer_devices
                    .into_iter()
                    .filter_map(|p| {
                        let Some(volume) = p.volume else {
                            warn!(resource = %name, peer_node_id, "skipping drbd peer device without a volume id");
                            return None;
                        };
                        Some(PeerDevice {
                            volume: volume.to_string(),
                            peer_disk_state: p.peer_disk_state.unwrap_or_else(|| "DUnknown".to_string()),
                            percent_in_sync: p.percent_in_sync,
                            received: p.received,
                            sent: p.sent,
                            pending: p.pending,
                            unacked: p.unacked,
                        })
                    })
                    .collect();
                Some(Connection {
                    peer_node_id: peer_node_id.to_string(),
                    peer: c.name.unwrap_or_default(),
                    state: c.connection_state.unwrap_or_else(|| "Unconnected".to_string()),
                    peer_devices,
                })
            })
            .collect();

        resources.push(Resource {
            name,
            role: resource.role.unwrap_or_else(|| "Unknown".to_string()),
            volumes,
            connections,
        });
    }
    Ok(resources)
}

/// Resource and volume encoded in a split-brain marker file name.
///
/// Resource names may contain `-`, so the volume is the last segment.
pub fn parse_split_brain_marker(file_name: &str) -> Option<(String, String)> {
    let rest = file_name.strip_prefix(SPLIT_BRAIN_PREFIX)?;
    let (resource, volume) = rest.rsplit_once('-')?;
    if resource.is_empty() || volume.is_empty() {
        return None;
    }
    Some((resource.to_string(), volume.to_string()))
}
