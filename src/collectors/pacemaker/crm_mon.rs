//! `crm_mon` XML status report.
//!
//! Both the legacy `<crm_mon>` document (`--as-xml`) and the newer
//! `<pacemaker-result>` one (`--output-as=xml`) carry the same `summary`,
//! `nodes`, `resources`, `node_attributes` and `node_history` sections, so a
//! single set of serde types reads either; the root element name is ignored.

use crate::errors::CollectorError;
use chrono::{Local, NaiveDateTime, TimeZone};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::warn;

/// Pacemaker prints an infinite failcount or score as this value.
pub const INFINITY: i64 = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStatus {
    pub dc: Option<String>,
    pub quorate: bool,
    pub stonith_enabled: bool,
    pub last_change: Option<i64>,
    pub nodes: Vec<Node>,
    pub resources: Vec<Resource>,
    pub node_attributes: Vec<NodeAttribute>,
    pub history: Vec<ResourceHistory>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub name: String,
    pub id: String,
    pub node_type: String,
    pub online: bool,
    pub standby: bool,
    pub standby_onfail: bool,
    pub maintenance: bool,
    pub pending: bool,
    pub unclean: bool,
    pub shutdown: bool,
    pub expected_up: bool,
    pub is_dc: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resource {
    pub id: String,
    pub agent: String,
    pub role: String,
    /// Node the instance runs on, empty when it runs nowhere.
    pub node: String,
    pub active: bool,
    pub orphaned: bool,
    pub blocked: bool,
    pub managed: bool,
    pub failed: bool,
    pub failure_ignored: bool,
    pub group: Option<String>,
    /// Clone or bundle the instance is a replica of.
    pub clone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeAttribute {
    pub node: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceHistory {
    pub node: String,
    pub resource: String,
    pub fail_count: Option<i64>,
    pub migration_threshold: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    summary: Option<RawSummary>,
    nodes: Option<RawNodes>,
    #[serde(default)]
    resources: RawResources,
    #[serde(default)]
    node_attributes: RawNodeAttributes,
    #[serde(default)]
    node_history: RawNodeHistory,
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    current_dc: Option<RawDc>,
    last_change: Option<RawTime>,
    cluster_options: Option<RawClusterOptions>,
}

#[derive(Debug, Deserialize)]
struct RawDc {
    #[serde(rename = "@present")]
    present: Option<bool>,
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@with_quorum")]
    with_quorum: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawTime {
    #[serde(rename = "@time")]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawClusterOptions {
    #[serde(rename = "@stonith-enabled")]
    stonith_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawNodes {
    #[serde(rename = "node", default)]
    nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "@type")]
    node_type: Option<String>,
    #[serde(rename = "@online")]
    online: Option<bool>,
    #[serde(rename = "@standby")]
    standby: Option<bool>,
    #[serde(rename = "@standby_onfail")]
    standby_onfail: Option<bool>,
    #[serde(rename = "@maintenance")]
    maintenance: Option<bool>,
    #[serde(rename = "@pending")]
    pending: Option<bool>,
    #[serde(rename = "@unclean")]
    unclean: Option<bool>,
    #[serde(rename = "@shutdown")]
    shutdown: Option<bool>,
    #[serde(rename = "@expected_up")]
    expected_up: Option<bool>,
    #[serde(rename = "@is_dc")]
    is_dc: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResources {
    #[serde(rename = "resource", default)]
    resources: Vec<RawResource>,
    #[serde(rename = "group", default)]
    groups: Vec<RawGroup>,
    #[serde(rename = "clone", default)]
    clones: Vec<RawClone>,
    #[serde(rename = "bundle", default)]
    bundles: Vec<RawBundle>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "@resource_agent")]
    agent: Option<String>,
    #[serde(rename = "@role")]
    role: Option<String>,
    #[serde(rename = "@active")]
    active: Option<bool>,
    #[serde(rename = "@orphaned")]
    orphaned: Option<bool>,
    #[serde(rename = "@blocked")]
    blocked: Option<bool>,
    #[serde(rename = "@managed")]
    managed: Option<bool>,
    #[serde(rename = "@failed")]
    failed: Option<bool>,
    #[serde(rename = "@failure_ignored")]
    failure_ignored: Option<bool>,
    #[serde(rename = "node", default)]
    nodes: Vec<RawNodeRef>,
}

#[derive(Debug, Deserialize)]
struct RawNodeRef {
    #[serde(rename = "@name")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "resource", default)]
    resources: Vec<RawResource>,
}

#[derive(Debug, Deserialize)]
struct RawClone {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "resource", default)]
    resources: Vec<RawResource>,
    #[serde(rename = "group", default)]
    groups: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
struct RawBundle {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "replica", default)]
    replicas: Vec<RawReplica>,
}

#[derive(Debug, Deserialize)]
struct RawReplica {
    #[serde(rename = "resource", default)]
    resources: Vec<RawResource>,
}

#[derive(Debug, Default, Deserialize)]
struct RawNodeAttributes {
    #[serde(rename = "node", default)]
    nodes: Vec<RawAttributeNode>,
}

#[derive(Debug, Deserialize)]
struct RawAttributeNode {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "attribute", default)]
    attributes: Vec<RawAttribute>,
}

#[derive(Debug, Deserialize)]
struct RawAttribute {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@value")]
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawNodeHistory {
    #[serde(rename = "node", default)]
    nodes: Vec<RawHistoryNode>,
}

#[derive(Debug, Deserialize)]
struct RawHistoryNode {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "resource_history", default)]
    resources: Vec<RawResourceHistory>,
}

#[derive(Debug, Deserialize)]
struct RawResourceHistory {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "@fail-count")]
    fail_count: Option<String>,
    #[serde(rename = "@migration-threshold")]
    migration_threshold: Option<String>,
}

/// Parse a pacemaker integer, mapping `INFINITY` to [`INFINITY`].
pub fn parse_score(raw: &str) -> Option<i64> {
    match raw.trim() {
        "INFINITY" | "+INFINITY" => Some(INFINITY),
        "-INFINITY" => Some(-INFINITY),
        other => other.parse().ok(),
    }
}

/// crm_mon prints times like `Fri Oct 18 11:48:22 2019` in local time.
fn parse_time(raw: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%a %b %e %H:%M:%S %Y").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.timestamp())
}

pub fn parse(xml: &str) -> Result<ClusterStatus, CollectorError> {
    if xml.trim().is_empty() {
        return Err(CollectorError::parse("crm_mon output", "empty document"));
    }
    let raw: RawStatus =
        quick_xml::de::from_str(xml).map_err(|e| CollectorError::parse("crm_mon output", e))?;

    let summary = raw
        .summary
        .ok_or_else(|| CollectorError::parse("crm_mon output", "missing <summary>"))?;
    let raw_nodes = raw
        .nodes
        .ok_or_else(|| CollectorError::parse("crm_mon output", "missing <nodes>"))?;

    let dc = summary
        .current_dc
        .as_ref()
        .filter(|dc| dc.present.unwrap_or(false))
        .and_then(|dc| dc.name.clone());
    let quorate = summary
        .current_dc
        .as_ref()
        .and_then(|dc| dc.with_quorum)
        .unwrap_or(false);
    let stonith_enabled = summary
        .cluster_options
        .and_then(|o| o.stonith_enabled)
        .unwrap_or(false);
    let last_change = summary
        .last_change
        .and_then(|c| c.time)
        .and_then(|t| parse_time(&t));

    let mut nodes = Vec::with_capacity(raw_nodes.nodes.len());
    for node in raw_nodes.nodes {
        let Some(name) = node.name else {
            warn!(id = ?node.id, "skipping crm_mon node without a name");
            continue;
        };
        nodes.push(Node {
            name,
            id: node.id.unwrap_or_default(),
            node_type: node.node_type.unwrap_or_default(),
            online: node.online.unwrap_or(false),
            standby: node.standby.unwrap_or(false),
            standby_onfail: node.standby_onfail.unwrap_or(false),
            maintenance: node.maintenance.unwrap_or(false),
            pending: node.pending.unwrap_or(false),
            unclean: node.unclean.unwrap_or(false),
            shutdown: node.shutdown.unwrap_or(false),
            expected_up: node.expected_up.unwrap_or(false),
            is_dc: node.is_dc.unwrap_or(false),
        });
    }

    Ok(ClusterStatus {
        dc,
        quorate,
        stonith_enabled,
        last_change,
        nodes,
        resources: flatten_resources(raw.resources),
        node_attributes: node_attributes(raw.node_attributes),
        history: history(raw.node_history),
    })
}

/// Flatten primitives, groups, clones and bundle replicas into one instance
/// per (resource, node).
fn flatten_resources(raw: RawResources) -> Vec<Resource> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for resource in raw.resources {
        push_resource(&mut out, &mut seen, resource, None, None);
    }
    for group in raw.groups {
        push_group(&mut out, &mut seen, group, None);
    }
    for clone in raw.clones {
        let Some(clone_id) = clone.id else {
            warn!("skipping crm_mon clone without an id");
            continue;
        };
        for resource in clone.resources {
            push_resource(&mut out, &mut seen, resource, None, Some(&clone_id));
        }
        for group in clone.groups {
            push_group(&mut out, &mut seen, group, Some(&clone_id));
        }
    }
    for bundle in raw.bundles {
        let Some(bundle_id) = bundle.id else {
            warn!("skipping crm_mon bundle without an id");
            continue;
        };
        // replicas repeat the container and ip resources under distinct ids
        for resource in bundle.replicas.into_iter().flat_map(|r| r.resources) {
            push_resource(&mut out, &mut seen, resource, None, Some(&bundle_id));
        }
    }
    out
}

fn push_group(
    out: &mut Vec<Resource>,
    seen: &mut HashSet<(String, String)>,
    group: RawGroup,
    clone: Option<&str>,
) {
    let Some(group_id) = group.id else {
        warn!("skipping crm_mon group without an id");
        return;
    };
    for resource in group.resources {
        push_resource(out, seen, resource, Some(&group_id), clone);
    }
}

fn push_resource(
    out: &mut Vec<Resource>,
    seen: &mut HashSet<(String, String)>,
    raw: RawResource,
    group: Option<&str>,
    clone: Option<&str>,
) {
    let Some(id) = raw.id else {
        warn!("skipping crm_mon resource without an id");
        return;
    };

    let mut nodes: Vec<String> = raw.nodes.into_iter().filter_map(|n| n.name).collect();
    if nodes.is_empty() {
        nodes.push(String::new());
    }

    for node in nodes {
        // stopped clone instances repeat the same id with no node
        if !seen.insert((id.clone(), node.clone())) {
            continue;
        }
        out.push(Resource {
            id: id.clone(),
            agent: raw.agent.clone().unwrap_or_default(),
            role: raw.role.clone().unwrap_or_default(),
            node,
            active: raw.active.unwrap_or(false),
            orphaned: raw.orphaned.unwrap_or(false),
            blocked: raw.blocked.unwrap_or(false),
            managed: raw.managed.unwrap_or(false),
            failed: raw.failed.unwrap_or(false),
            failure_ignored: raw.failure_ignored.unwrap_or(false),
            group: group.map(str::to_string),
            clone: clone.map(str::to_string),
        });
    }
}

fn node_attributes(raw: RawNodeAttributes) -> Vec<NodeAttribute> {
    let mut out = Vec::new();
    for node in raw.nodes {
        let Some(node_name) = node.name else {
            warn!("skipping crm_mon node_attributes entry without a node name");
            continue;
        };
        for attribute in node.attributes {
            match (attribute.name, attribute.value) {
                (Some(name), Some(value)) => out.push(NodeAttribute {
                    node: node_name.clone(),
                    name,
                    value,
                }),
                _ => warn!(node = %node_name, "skipping incomplete node attribute"),
            }
        }
    }
    out
}

fn history(raw: RawNodeHistory) -> Vec<ResourceHistory> {
    let mut out = Vec::new();
    for node in raw.nodes {
        let Some(node_name) = node.name else {
            warn!("skipping crm_mon node_history entry without a node name");
            continue;
        };
        for entry in node.resources {
            let Some(resource) = entry.id else {
                warn!(node = %node_name, "skipping resource_history without an id");
                continue;
            };
            let number = |raw: Option<String>, field: &str| {
                let raw = raw?;
                let parsed = parse_score(&raw);
                if parsed.is_none() {
                    warn!(node = %node_name, resource = %resource, field, value = %raw, "unparseable value");
                }
                parsed
            };
            let fail_count = number(entry.fail_count, "fail-count");
            let migration_threshold = number(entry.migration_threshold, "migration-threshold");
            out.push(ResourceHistory {
                node: node_name.clone(),
                resource,
                fail_count,
                migration_threshold,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = include_str!("../../../tests/fixtures/pacemaker/crm_mon.xml");
    const CURRENT: &str = include_str!("../../../tests/fixtures/pacemaker/crm_mon_v2.xml");

    #[test]
    fn test_parse_summary() {
        let status = parse(LEGACY).unwrap();
        assert_eq!(status.dc.as_deref(), Some("node01"));
        assert!(status.quorate);
        assert!(status.stonith_enabled);
        let expected = parse_time("Fri Oct 18 11:48:22 2019");
        assert!(expected.is_some());
        assert_eq!(status.last_change, expected);
    }

    #[test]
    fn test_parse_nodes() {
        let status = parse(LEGACY).unwrap();
        assert_eq!(status.nodes.len(), 2);
        let node02 = &status.nodes[1];
        assert_eq!(node02.name, "node02");
        assert_eq!(node02.id, "1084783376");
        assert_eq!(node02.node_type, "member");
        assert!(node02.online && node02.standby && !node02.is_dc);
        assert!(status.nodes[0].is_dc);
    }

    #[test]
    fn test_flatten_resources() {
        let status = parse(LEGACY).unwrap();
        let ids: Vec<(&str, &str)> = status
            .resources
            .iter()
            .map(|r| (r.id.as_str(), r.node.as_str()))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("stonith-sbd", "node01"),
                ("test-stop", ""),
                ("rsc_ip_HA1_ASCS00", "node01"),
                ("rsc_sap_HA1_ASCS00", "node01"),
                ("rsc_SAPHanaTopology_PRD_HDB00", "node01"),
                ("rsc_SAPHanaTopology_PRD_HDB00", "node02"),
                ("rsc_SAPHana_PRD_HDB00", "node01"),
                ("rsc_SAPHana_PRD_HDB00", "node02"),
            ]
        );

        let slave = &status.resources[7];
        assert_eq!(slave.role, "Slave");
        assert!(slave.failed);
        assert_eq!(slave.clone.as_deref(), Some("msl_SAPHana_PRD_HDB00"));

        let sap = &status.resources[3];
        assert!(!sap.managed);
        assert_eq!(sap.group.as_deref(), Some("grp_HA1_ASCS00"));
        assert_eq!(sap.agent, "ocf::heartbeat:SAPInstance");
    }

    #[test]
    fn test_parse_history_and_attributes() {
        let status = parse(LEGACY).unwrap();
        assert_eq!(status.node_attributes.len(), 3);
        assert_eq!(
            status.node_attributes[2],
            NodeAttribute {
                node: "node02".into(),
                name: "hana_prd_clone_state".into(),
                value: "DEMOTED".into(),
            }
        );

        assert_eq!(status.history.len(), 4);
        assert_eq!(status.history[0].fail_count, None);
        assert_eq!(status.history[0].migration_threshold, Some(5000));
        assert_eq!(status.history[2].fail_count, Some(300));
        assert_eq!(status.history[3].fail_count, Some(INFINITY));
        assert_eq!(status.history[3].migration_threshold, Some(3));
    }

    #[test]
    fn test_parse_pacemaker_result_root() {
        let status = parse(CURRENT).unwrap();
        assert_eq!(status.dc.as_deref(), Some("alpha"));
        assert!(!status.quorate);
        assert!(!status.stonith_enabled);
        // the nameless node is skipped, not fatal
        assert_eq!(status.nodes.len(), 1);
        assert_eq!(status.resources.len(), 1);
        let vip = &status.resources[0];
        assert_eq!(vip.role, "Unpromoted");
        assert_eq!(vip.group.as_deref(), Some("grp"));
        assert_eq!(vip.clone.as_deref(), Some("cln_grp"));
    }

    #[test]
    fn test_flatten_bundle_replicas() {
        let bundle = r#"<bundle id="httpd-bundle" type="podman" image="localhost/httpd" unique="false" managed="true" failed="false">
      <replica id="0">
        <resource id="httpd-bundle-ip-192.168.122.131" resource_agent="ocf::heartbeat:IPaddr2" role="Started" active="true" orphaned="false" blocked="false" managed="true" failed="false" failure_ignored="false" nodes_running_on="1">
          <node name="alpha" id="1" cached="true"/>
        </resource>
        <resource id="b1r" resource_agent="ocf::heartbeat:apache" role="Started" active="true" orphaned="false" blocked="false" managed="true" failed="false" failure_ignored="false" nodes_running_on="1">
          <node name="alpha" id="1" cached="true"/>
        </resource>
      </replica>
    </bundle>
  </resources>"#;
        let xml = CURRENT.replacen("</resources>", bundle, 1);
        let status = parse(&xml).unwrap();

        let ids: Vec<&str> = status.resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["vip", "httpd-bundle-ip-192.168.122.131", "b1r"]);
        let b1r = &status.resources[2];
        assert_eq!(b1r.node, "alpha");
        assert_eq!(b1r.clone.as_deref(), Some("httpd-bundle"));
        assert_eq!(b1r.group, None);
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("INFINITY"), Some(INFINITY));
        assert_eq!(parse_score("+INFINITY"), Some(INFINITY));
        assert_eq!(parse_score("-INFINITY"), Some(-INFINITY));
        assert_eq!(parse_score("42"), Some(42));
        assert_eq!(parse_score("lots"), None);
    }

    #[test]
    fn test_malformed_input() {
        assert!(parse("").is_err());
        assert!(parse("   \n").is_err());
        assert!(parse("Error: cluster is not available on this node").is_err());
        assert!(parse(&LEGACY[..LEGACY.len() / 2]).is_err());
        assert!(parse("<crm_mon version=\"2.0.0\"><nodes/></crm_mon>").is_err());
        assert!(parse("<unrelated><thing a=\"b\"/></unrelated>").is_err());
    }
}
