//! The diff engine's output shape: `Operation`, its `fieldChanges`, and the
//! `Impact` assessment attached to it (§3, §4.3).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resource::{AnyResource, ResourceKind};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OperationType {
    Create,
    Update,
    Delete,
    NoChange,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Remove,
    Modify,
}

/// `Low < Medium < High < Critical`; declaration order is the order used by
/// `Ord`, which is what the summary's highest-risk aggregation (property 4)
/// relies on.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Low
    }
}

/// One entry in `Operation::fieldChanges`: a dotted/indexed path plus the
/// before/after JSON values.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<serde_json::Value>,
    pub change_type: ChangeType,
}

pub(crate) mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(d)?;
        Ok(Duration::from_nanos(nanos))
    }
}

/// Risk/impact assessment attached to every operation (§4.3's table).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Impact {
    pub is_destructive: bool,
    pub requires_downtime: bool,
    #[serde(with = "duration_nanos")]
    pub estimated_duration: Duration,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Impact {
    pub fn low(estimated_duration: Duration) -> Self {
        Self {
            is_destructive: false,
            requires_downtime: false,
            estimated_duration,
            risk_level: RiskLevel::Low,
            warnings: Vec::new(),
        }
    }
}

/// One classified resource transition, as produced by `computeProjectDiff`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub resource_kind: ResourceKind,
    pub resource_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<AnyResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<AnyResource>,
    #[serde(default)]
    pub field_changes: Vec<FieldChange>,
    pub impact: Impact,
}
