//! Constraint section of the CIB, as printed by `cibadmin --query --local`.

use super::crm_mon::parse_score;
use crate::errors::CollectorError;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Constraints {
    pub locations: Vec<LocationConstraint>,
    pub location_count: usize,
    pub colocation_count: usize,
    pub order_count: usize,
}

/// A node-pinned location constraint; rule-based ones are only counted.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationConstraint {
    pub id: String,
    pub resource: String,
    pub node: String,
    pub role: String,
    pub score: i64,
}

#[derive(Debug, Deserialize)]
struct RawCib {
    configuration: Option<RawConfiguration>,
}

#[derive(Debug, Deserialize)]
struct RawConfiguration {
    #[serde(default)]
    constraints: RawConstraints,
}

#[derive(Debug, Default, Deserialize)]
struct RawConstraints {
    #[serde(rename = "rsc_location", default)]
    locations: Vec<RawLocation>,
    #[serde(rename = "rsc_colocation", default)]
    colocations: Vec<RawConstraintRef>,
    #[serde(rename = "rsc_order", default)]
    orders: Vec<RawConstraintRef>,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "@rsc")]
    resource: Option<String>,
    #[serde(rename = "@node")]
    node: Option<String>,
    #[serde(rename = "@role")]
    role: Option<String>,
    #[serde(rename = "@score")]
    score: Option<String>,
}

/// Colocation and order constraints are only counted.
#[derive(Debug, Deserialize)]
struct RawConstraintRef {}

pub fn parse(xml: &str) -> Result<Constraints, CollectorError> {
    if xml.trim().is_empty() {
        return Err(CollectorError::parse("cibadmin output", "empty document"));
    }
    let raw: RawCib =
        quick_xml::de::from_str(xml).map_err(|e| CollectorError::parse("cibadmin output", e))?;
    let constraints = raw
        .configuration
        .ok_or_else(|| CollectorError::parse("cibadmin output", "missing <configuration>"))?
        .constraints;

    let location_count = constraints.locations.len();
    let mut locations = Vec::new();
    for location in constraints.locations {
        let Some(id) = location.id else {
            warn!("skipping rsc_location without an id");
            continue;
        };
        let (Some(resource), Some(node), Some(score)) =
            (location.resource, location.node, location.score)
        else {
            debug!(constraint = %id, "location constraint is rule based, counted only");
            continue;
        };
        let Some(score) = parse_score(&score) else {
            warn!(constraint = %id, score = %score, "skipping location constraint with unparseable score");
            continue;
        };
        locations.push(LocationConstraint {
            id,
            resource,
            node,
            role: location.role.unwrap_or_default(),
            score,
        });
    }

    Ok(Constraints {
        locations,
        location_count,
        colocation_count: constraints.colocations.len(),
        order_count: constraints.orders.len(),
    })
}
