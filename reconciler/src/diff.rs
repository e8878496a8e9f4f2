//! The diff engine (§4.3): compares a desired [`ProjectState`] against a
//! discovered one and produces the list of [`Operation`]s needed to
//! reconcile them, each carrying field-level changes and an impact
//! assessment.

use std::collections::HashMap;
use std::time::Duration;

use reconciler_common::graph::node_id;
use reconciler_common::{
    AnyResource, ChangeType, FieldChange, Impact, Operation, OperationType, PlanConfig,
    ReconcileError, ResourceKind, RiskLevel,
};
use serde_json::Value;

/// Computes the set of operations that would bring `current` to `desired`.
pub struct DiffEngine {
    config: PlanConfig,
}

impl DiffEngine {
    pub fn new(config: PlanConfig) -> Self {
        Self { config }
    }

    pub fn compute_operations(
        &self,
        desired: &[AnyResource],
        current: &[AnyResource],
    ) -> Result<Vec<Operation>, ReconcileError> {
        let desired_by_id: HashMap<String, &AnyResource> = desired
            .iter()
            .map(|r| (node_id(r.kind(), &r.identity()), r))
            .collect();
        let current_by_id: HashMap<String, &AnyResource> = current
            .iter()
            .map(|r| (node_id(r.kind(), &r.identity()), r))
            .collect();

        let mut operations = Vec::new();

        for (id, desired_resource) in &desired_by_id {
            match current_by_id.get(id) {
                None => operations.push(self.create_operation(desired_resource)),
                Some(current_resource) => {
                    operations.push(self.update_or_no_change(current_resource, desired_resource))
                }
            }
        }

        for (id, current_resource) in &current_by_id {
            if !desired_by_id.contains_key(id) {
                operations.push(self.delete_operation(current_resource));
            }
        }

        Ok(operations)
    }

    /// Builds the operation for a resource present in `current` but not in
    /// `desired`: a real `Delete`, unless `preserveExisting` is configured,
    /// in which case the resource is left alone (§3 line 64).
    fn delete_operation(&self, current: &AnyResource) -> Operation {
        if self.config.preserve_existing {
            return Operation {
                op_type: OperationType::NoChange,
                resource_kind: current.kind(),
                resource_name: current.name().to_string(),
                desired: None,
                current: Some(current.clone()),
                field_changes: Vec::new(),
                impact: Impact::low(Duration::from_secs(0)),
            };
        }
        self.delete_operation_unconditionally(current)
    }

    fn create_operation(&self, desired: &AnyResource) -> Operation {
        let field_changes = diff_values(
            "",
            &Value::Null,
            &desired.normalized_spec_json(self.config.ignore_defaults),
            self.config.ignore_order_in_slices,
        );
        Operation {
            op_type: OperationType::Create,
            resource_kind: desired.kind(),
            resource_name: desired.name().to_string(),
            desired: Some(desired.clone()),
            current: None,
            impact: impact_for(desired.kind(), OperationType::Create, &field_changes),
            field_changes,
        }
    }

    fn delete_operation_unconditionally(&self, current: &AnyResource) -> Operation {
        let field_changes = diff_values(
            "",
            &current.normalized_spec_json(self.config.ignore_defaults),
            &Value::Null,
            self.config.ignore_order_in_slices,
        );
        Operation {
            op_type: OperationType::Delete,
            resource_kind: current.kind(),
            resource_name: current.name().to_string(),
            desired: None,
            current: Some(current.clone()),
            impact: impact_for(current.kind(), OperationType::Delete, &field_changes),
            field_changes,
        }
    }

    fn update_or_no_change(&self, current: &AnyResource, desired: &AnyResource) -> Operation {
        let current_json = current.normalized_spec_json(self.config.ignore_defaults);
        let desired_json = desired.normalized_spec_json(self.config.ignore_defaults);
        let field_changes = diff_values(
            "",
            &current_json,
            &desired_json,
            self.config.ignore_order_in_slices,
        );

        let op_type = if field_changes.is_empty() {
            OperationType::NoChange
        } else {
            OperationType::Update
        };

        Operation {
            op_type,
            resource_kind: desired.kind(),
            resource_name: desired.name().to_string(),
            desired: Some(desired.clone()),
            current: Some(current.clone()),
            impact: impact_for(desired.kind(), op_type, &field_changes),
            field_changes,
        }
    }
}

/// Recursively diffs two JSON values, emitting one [`FieldChange`] per leaf
/// (or per whole-array replacement, when `ignore_order_in_slices` is false
/// and the arrays differ only in order).
fn diff_values(path: &str, old: &Value, new: &Value, ignore_order_in_slices: bool) -> Vec<FieldChange> {
    if old == new {
        return Vec::new();
    }

    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut changes = Vec::new();
            let mut keys: Vec<&String> = old_map.keys().chain(new_map.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                let old_value = old_map.get(key).unwrap_or(&Value::Null);
                let new_value = new_map.get(key).unwrap_or(&Value::Null);
                changes.extend(diff_values(
                    &child_path,
                    old_value,
                    new_value,
                    ignore_order_in_slices,
                ));
            }
            changes
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            if ignore_order_in_slices {
                let mut sorted_old = old_items.clone();
                let mut sorted_new = new_items.clone();
                sorted_old.sort_by_key(|v| v.to_string());
                sorted_new.sort_by_key(|v| v.to_string());
                if sorted_old == sorted_new {
                    return Vec::new();
                }
            }
            vec![FieldChange {
                path: path.to_string(),
                old_value: Some(old.clone()),
                new_value: Some(new.clone()),
                change_type: classify_change(old, new),
            }]
        }
        _ => vec![FieldChange {
            path: path.to_string(),
            old_value: none_if_null(old),
            new_value: none_if_null(new),
            change_type: classify_change(old, new),
        }],
    }
}

fn none_if_null(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other.clone()),
    }
}

fn classify_change(old: &Value, new: &Value) -> ChangeType {
    match (old.is_null(), new.is_null()) {
        (true, false) => ChangeType::Add,
        (false, true) => ChangeType::Remove,
        _ => ChangeType::Modify,
    }
}

/// One row of §4.3's impact table: the baseline assessment for a
/// `(kind, opType)` pair before any field-level refinement is layered on.
struct ImpactTemplate {
    duration: Duration,
    risk: RiskLevel,
    destructive: bool,
    downtime: bool,
    warning: Option<&'static str>,
}

impl ImpactTemplate {
    const fn new(duration_secs: u64, risk: RiskLevel) -> Self {
        Self {
            duration: Duration::from_secs(duration_secs),
            risk,
            destructive: false,
            downtime: false,
            warning: None,
        }
    }

    const fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    const fn downtime(mut self) -> Self {
        self.downtime = true;
        self
    }

    const fn warn(mut self, warning: &'static str) -> Self {
        self.warning = Some(warning);
        self
    }

    fn into_impact(self) -> Impact {
        Impact {
            is_destructive: self.destructive,
            requires_downtime: self.downtime,
            estimated_duration: self.duration,
            risk_level: self.risk,
            warnings: self.warning.map(|w| w.to_string()).into_iter().collect(),
        }
    }
}

/// The literal `(kind, opType)` table from §4.3. Kinds without an explicit
/// row (`DatabaseRole`, `SearchIndex`, `VpcEndpoint`) fall back to a
/// conservative default: quick creates, a medium-risk update/delete.
fn base_impact(kind: ResourceKind, op_type: OperationType) -> ImpactTemplate {
    use OperationType::*;
    use ResourceKind::*;
    match (kind, op_type) {
        (_, NoChange) => ImpactTemplate::new(0, RiskLevel::Low),

        (Project, Create) => ImpactTemplate::new(2 * 60, RiskLevel::Low),
        (Project, Update) => ImpactTemplate::new(30, RiskLevel::Low),
        (Project, Delete) => ImpactTemplate::new(5 * 60, RiskLevel::Critical)
            .destructive()
            .downtime()
            .warn("permanently removes all resources"),

        (Cluster, Create) => {
            ImpactTemplate::new(15 * 60, RiskLevel::Medium).warn("will incur costs")
        }
        (Cluster, Update) => ImpactTemplate::new(5 * 60, RiskLevel::Low),
        (Cluster, Delete) => ImpactTemplate::new(10 * 60, RiskLevel::High)
            .destructive()
            .downtime()
            .warn("destroys all data"),

        (DatabaseUser, Create) => ImpactTemplate::new(30, RiskLevel::Low),
        (DatabaseUser, Update) => ImpactTemplate::new(30, RiskLevel::Low),
        (DatabaseUser, Delete) => ImpactTemplate::new(30, RiskLevel::Medium)
            .destructive()
            .warn("revokes access"),

        (NetworkAccess, Create) => ImpactTemplate::new(10, RiskLevel::Low),
        (NetworkAccess, Update) => ImpactTemplate::new(10, RiskLevel::Low),
        (NetworkAccess, Delete) => ImpactTemplate::new(10, RiskLevel::Medium).destructive(),

        (_, Create) => ImpactTemplate::new(5 * 60, RiskLevel::Low),
        (_, Update) => ImpactTemplate::new(5 * 60, RiskLevel::Medium),
        (_, Delete) => ImpactTemplate::new(5 * 60, RiskLevel::Medium).destructive(),
    }
}

fn field_path_contains(field_changes: &[FieldChange], needle: &str) -> bool {
    field_changes
        .iter()
        .any(|c| c.path.to_lowercase().contains(needle))
}

fn numeric_decrease(field_changes: &[FieldChange], path_suffix: &str) -> bool {
    field_changes.iter().any(|c| {
        c.path.to_lowercase().contains(path_suffix)
            && matches!(
                (c.old_value.as_ref().and_then(Value::as_f64), c.new_value.as_ref().and_then(Value::as_f64)),
                (Some(old), Some(new)) if new < old
            )
    })
}

fn bool_flip_to_false(field_changes: &[FieldChange], path_suffix: &str) -> bool {
    field_changes.iter().any(|c| {
        c.path.to_lowercase().contains(path_suffix)
            && matches!(
                (c.old_value.as_ref().and_then(Value::as_bool), c.new_value.as_ref().and_then(Value::as_bool)),
                (Some(true), Some(false))
            )
    })
}

/// Refines a `Cluster` update's baseline impact against the specific fields
/// that changed: instance size and topology changes require downtime,
/// MongoDB version upgrades are irreversible, disk shrinks can drop data,
/// and disabling backups raises risk even with no other change.
fn cluster_update_impact(field_changes: &[FieldChange]) -> Impact {
    let mut risk = RiskLevel::Low;
    let mut destructive = false;
    let mut downtime = false;
    let mut warnings = Vec::new();
    let mut duration = Duration::from_secs(5 * 60);

    if field_path_contains(field_changes, "instancesize") || field_path_contains(field_changes, "replicationspecs") {
        downtime = true;
        risk = risk.max(RiskLevel::High);
        duration = Duration::from_secs(17 * 60);
        warnings.push("changing instance size or topology may briefly interrupt connections".to_string());
    }
    if field_path_contains(field_changes, "mongodbversion") {
        risk = risk.max(RiskLevel::High);
        duration = duration.max(Duration::from_secs(30 * 60));
        warnings.push("MongoDB version upgrades cannot be reversed".to_string());
    }
    if numeric_decrease(field_changes, "disksizegb") {
        destructive = true;
        risk = RiskLevel::Critical;
        warnings.push("shrinking disk size can cause data loss".to_string());
    }
    if bool_flip_to_false(field_changes, "backupenabled") {
        risk = risk.max(RiskLevel::High);
        warnings.push("disabling backups leaves the cluster unprotected".to_string());
    }
    if risk == RiskLevel::Low && field_changes.len() > 3 {
        risk = RiskLevel::Medium;
    }

    Impact {
        is_destructive: destructive,
        requires_downtime: downtime,
        estimated_duration: duration,
        risk_level: risk,
        warnings,
    }
}

/// Refines a `DatabaseUser` update's baseline impact: credential or
/// authorization changes are medium risk with a warning, anything else
/// stays low risk.
fn database_user_update_impact(field_changes: &[FieldChange]) -> Impact {
    let sensitive = field_path_contains(field_changes, "password")
        || field_path_contains(field_changes, "roles")
        || field_path_contains(field_changes, "scopes");
    if sensitive {
        Impact {
            is_destructive: false,
            requires_downtime: false,
            estimated_duration: Duration::from_secs(30),
            risk_level: RiskLevel::Medium,
            warnings: vec!["changes credentials or authorization for this user".to_string()],
        }
    } else {
        Impact::low(Duration::from_secs(30))
    }
}

/// Impact assessment from §4.3's table: a baseline per `(kind, opType)`,
/// refined by the specific fields an `Update` touched.
fn impact_for(kind: ResourceKind, op_type: OperationType, field_changes: &[FieldChange]) -> Impact {
    match (kind, op_type) {
        (ResourceKind::Cluster, OperationType::Update) => cluster_update_impact(field_changes),
        (ResourceKind::DatabaseUser, OperationType::Update) => database_user_update_impact(field_changes),
        _ => base_impact(kind, op_type).into_impact(),
    }
}
