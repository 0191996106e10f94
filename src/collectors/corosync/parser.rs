//! Text reports of `corosync-cfgtool -s` and `corosync-quorumtool -p`.
//!
//! Corosync 2 prints `RING ID n` blocks with a single status line, Corosync 3
//! prints `LINK ID n` blocks with one line per peer node. Both are handled.

use crate::errors::CollectorError;
use regex::Regex;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Ring {
    pub id: String,
    pub address: String,
    pub faulty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RingStatus {
    pub local_node_id: String,
    pub rings: Vec<Ring>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub node_id: String,
    pub name: String,
    pub votes: u64,
    pub local: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quorum {
    pub node_id: Option<String>,
    pub quorate: bool,
    pub expected_votes: u64,
    pub highest_expected: u64,
    pub total_votes: u64,
    pub quorum: u64,
    pub members: Vec<Member>,
}

/// Ring and quorum reports merged into one view keyed by the local node id.
#[derive(Debug, Clone, PartialEq)]
pub struct CorosyncSnapshot {
    pub node_id: String,
    pub rings: Vec<Ring>,
    pub quorum: Quorum,
}

impl CorosyncSnapshot {
    pub fn merge(rings: RingStatus, quorum: Quorum) -> Self {
        if let Some(quorum_node) = &quorum.node_id {
            if *quorum_node != rings.local_node_id {
                warn!(
                    cfgtool = %rings.local_node_id,
                    quorumtool = %quorum_node,
                    "corosync tools disagree on the local node id"
                );
            }
        }
        let unknown_local = !quorum.members.is_empty()
            && !quorum.members.iter().any(|m| m.node_id == rings.local_node_id);
        if unknown_local {
            warn!(node_id = %rings.local_node_id, "local node id is not in the membership list");
        }

        Self {
            node_id: rings.local_node_id,
            rings: rings.rings,
            quorum,
        }
    }

    pub fn faulty_rings(&self) -> usize {
        self.rings.iter().filter(|r| r.faulty).count()
    }
}

#[derive(Default)]
struct PendingRing {
    id: String,
    address: Option<String>,
    faulty: Option<bool>,
}

impl PendingRing {
    fn finish(self, rings: &mut Vec<Ring>) {
        match self.faulty {
            Some(faulty) => rings.push(Ring {
                id: self.id,
                address: self.address.unwrap_or_default(),
                faulty,
            }),
            None => warn!(ring = %self.id, "skipping corosync ring without a status"),
        }
    }
}

/// Compiled patterns for both reports; built once per collector.
#[derive(Debug)]
pub struct Parser {
    local_node: Regex,
    ring_header: Regex,
    ring_address: Regex,
    ring_status: Regex,
    link_peer: Regex,
    quorate: Regex,
    node_id: Regex,
    expected_votes: Regex,
    highest_expected: Regex,
    total_votes: Regex,
    quorum: Regex,
    member: Regex,
}

impl Parser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            local_node: Regex::new(r"(?m)^Local node ID (\w+)")?,
            ring_header: Regex::new(r"^(?:RING|LINK) ID (\w+)")?,
            ring_address: Regex::new(r"^\s+(?:id|addr)\s*=\s*(\S+)")?,
            ring_status: Regex::new(r"^\s+status\s*=\s*(.+?)\s*$")?,
            link_peer: Regex::new(r"^\s+nodeid:?\s+(\d+):\s+(\S+)")?,
            quorate: Regex::new(r"(?m)^Quorate:\s+(Yes|No)")?,
            node_id: Regex::new(r"(?m)^Node ID:\s+(\w+)")?,
            expected_votes: Regex::new(r"(?m)^Expected votes:\s+(\d+)")?,
            highest_expected: Regex::new(r"(?m)^Highest expected:\s+(\d+)")?,
            total_votes: Regex::new(r"(?m)^Total votes:\s+(\d+)")?,
            quorum: Regex::new(r"(?m)^Quorum:\s+(\d+)")?,
            member: Regex::new(
                r"^\s*(\w+)\s+(\d+)\s+(?:([A-Z]+(?:,[A-Z]+)*)\s+)?([^\s(]\S*)(\s+\(local\))?\s*$",
            )?,
        })
    }

    pub fn parse_rings(&self, text: &str) -> Result<RingStatus, CollectorError> {
        let local_node_id = self
            .local_node
            .captures(text)
            .map(|c| c[1].to_string())
            .ok_or_else(|| CollectorError::parse("corosync-cfgtool output", "missing local node id"))?;

        let mut rings = Vec::new();
        let mut current: Option<PendingRing> = None;

        for line in text.lines() {
            if let Some(caps) = self.ring_header.captures(line) {
                if let Some(done) = current.take() {
                    done.finish(&mut rings);
                }
                current = Some(PendingRing {
                    id: caps[1].to_string(),
                    ..Default::default()
                });
                continue;
            }
            let Some(ring) = current.as_mut() else {
                continue;
            };
            if let Some(caps) = self.ring_address.captures(line) {
                ring.address = Some(caps[1].to_string());
            } else if let Some(caps) = self.ring_status.captures(line) {
                ring.faulty = Some(caps[1].contains("FAULTY"));
            } else if let Some(caps) = self.link_peer.captures(line) {
                let down = &caps[2] == "disconnected";
                ring.faulty = Some(ring.faulty.unwrap_or(false) || down);
            }
        }
        if let Some(done) = current.take() {
            done.finish(&mut rings);
        }

        Ok(RingStatus {
            local_node_id,
            rings,
        })
    }

    pub fn parse_quorum(&self, text: &str) -> Result<Quorum, CollectorError> {
        let field = |re: &Regex, name: &str| -> Result<String, CollectorError> {
            re.captures(text)
                .map(|c| c[1].to_string())
                .ok_or_else(|| CollectorError::parse("corosync-quorumtool output", format!("missing {}", name)))
        };
        let number = |re: &Regex, name: &str| -> Result<u64, CollectorError> {
            field(re, name)?
                .parse()
                .map_err(|e| CollectorError::parse("corosync-quorumtool output", format!("{}: {}", name, e)))
        };

        let quorate = field(&self.quorate, "Quorate")? == "Yes";
        let expected_votes = number(&self.expected_votes, "Expected votes")?;
        let highest_expected = number(&self.highest_expected, "Highest expected")?;
        let total_votes = number(&self.total_votes, "Total votes")?;
        let quorum = number(&self.quorum, "Quorum")?;
        let node_id = field(&self.node_id, "Node ID").ok();

        Ok(Quorum {
            node_id,
            quorate,
            expected_votes,
            highest_expected,
            total_votes,
            quorum,
            members: self.members(text),
        })
    }

    fn members(&self, text: &str) -> Vec<Member> {
        let mut members = Vec::new();
        let rows = text
            .lines()
            .skip_while(|l| !l.starts_with("Membership information"))
            .skip_while(|l| !l.contains("Nodeid"))
            .skip(1);

        for row in rows {
            if row.trim().is_empty() {
                continue;
            }
            let Some(caps) = self.member.captures(row) else {
                warn!(row, "skipping unrecognised corosync membership row");
                continue;
            };
            let Ok(votes) = caps[2].parse::<u64>() else {
                warn!(row, "skipping corosync member with unparseable votes");
                continue;
            };
            members.push(Member {
                node_id: caps[1].to_string(),
                name: caps[4].to_string(),
                votes,
                local: caps.get(5).is_some(),
            });
        }
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFGTOOL_V2: &str = include_str!("../../../tests/fixtures/corosync/cfgtool_v2_faulty.txt");
    const CFGTOOL_V3: &str = include_str!("../../../tests/fixtures/corosync/cfgtool_v3.txt");
    const QUORUMTOOL: &str = include_str!("../../../tests/fixtures/corosync/quorumtool.txt");
    const QUORUMTOOL_V3: &str = include_str!("../../../tests/fixtures/corosync/quorumtool_v3.txt");

    #[test]
    fn test_parse_rings_v2() {
        let status = Parser::new().unwrap().parse_rings(CFGTOOL_V2).unwrap();
        assert_eq!(status.local_node_id, "16777226");
        assert_eq!(
            status.rings,
            vec![
                Ring {
                    id: "0".into(),
                    address: "10.0.0.1".into(),
                    faulty: false,
                },
                Ring {
                    id: "1".into(),
                    address: "172.16.0.1".into(),
                    faulty: true,
                },
            ]
        );
    }

    #[test]
    fn test_parse_links_v3() {
        let status = Parser::new().unwrap().parse_rings(CFGTOOL_V3).unwrap();
        assert_eq!(status.local_node_id, "1");
        assert_eq!(status.rings.len(), 2);
        assert_eq!(status.rings[0].address, "192.168.125.15");
        assert!(!status.rings[0].faulty);
        assert!(status.rings[1].faulty);
    }

    #[test]
    fn test_ring_without_status_is_skipped() {
        let text = "Local node ID 5\nRING ID 0\n\tid\t= 10.0.0.5\nRING ID 1\n\tid\t= 10.0.1.5\n\tstatus\t= ring 1 active with no faults\n";
        let status = Parser::new().unwrap().parse_rings(text).unwrap();
        assert_eq!(status.rings.len(), 1);
        assert_eq!(status.rings[0].id, "1");
    }

    #[test]
    fn test_parse_quorum() {
        let quorum = Parser::new().unwrap().parse_quorum(QUORUMTOOL).unwrap();
        assert!(quorum.quorate);
        assert_eq!(quorum.node_id.as_deref(), Some("16777226"));
        assert_eq!(
            (quorum.expected_votes, quorum.highest_expected, quorum.total_votes, quorum.quorum),
            (2, 2, 2, 1)
        );
        assert_eq!(
            quorum.members,
            vec![
                Member {
                    node_id: "16777226".into(),
                    name: "dma-dog-hana01".into(),
                    votes: 1,
                    local: true,
                },
                Member {
                    node_id: "16777227".into(),
                    name: "dma-dog-hana02".into(),
                    votes: 1,
                    local: false,
                },
            ]
        );
    }

    #[test]
    fn test_parse_quorum_with_qdevice_column() {
        let quorum = Parser::new().unwrap().parse_quorum(QUORUMTOOL_V3).unwrap();
        assert!(!quorum.quorate);
        assert_eq!(quorum.quorum, 2);
        assert_eq!(quorum.total_votes, 1);
        let names: Vec<(&str, &str, u64, bool)> = quorum
            .members
            .iter()
            .map(|m| (m.node_id.as_str(), m.name.as_str(), m.votes, m.local))
            .collect();
        assert_eq!(
            names,
            vec![
                ("1", "192.168.125.15", 1, true),
                ("2", "stretch-node-2.example.com", 0, false),
                ("0", "Qdevice", 1, false),
            ]
        );
    }

    #[test]
    fn test_merge_mismatch_keeps_both_sides() {
        let parser = Parser::new().unwrap();
        let rings = parser.parse_rings(CFGTOOL_V3).unwrap();
        let quorum = parser.parse_quorum(QUORUMTOOL).unwrap();
        let snapshot = CorosyncSnapshot::merge(rings, quorum);
        assert_eq!(snapshot.node_id, "1");
        assert_eq!(snapshot.quorum.members.len(), 2);
        assert_eq!(snapshot.faulty_rings(), 1);
    }

    #[test]
    fn test_malformed_input() {
        let parser = Parser::new().unwrap();
        assert!(parser.parse_rings("").is_err());
        assert!(parser.parse_rings("Could not initialize corosync configuration API error 2").is_err());
        assert!(parser.parse_quorum("").is_err());
        assert!(parser.parse_quorum(&QUORUMTOOL[..QUORUMTOOL.len() / 2]).is_err());
        assert!(parser.parse_quorum("Cannot initialize QUORUM service").is_err());
    }
}
