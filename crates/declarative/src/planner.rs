//! Planner - diffs the desired graph against recorded state
//!
//! The plan is a list of actions with explicit predecessor edges. Creates and
//! updates come first in forward topological order, deletes follow in reverse
//! topological order. The executor only looks at the edges, so unrelated
//! deletes may still run alongside creates.

use crate::error::ValidationError;
use crate::graph::{ResourceGraph, kahn_order};
use crate::reference::{Reference, resolve_attributes};
use crate::state::{StateRecord, StateSnapshot};
use crate::types::{ActionKind, Attributes};
use serde::Serialize;
use std::collections::HashMap;

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    /// Position in the plan
    pub index: usize,
    pub kind: ActionKind,
    pub name: String,
    pub resource_type: String,
    /// Desired attributes as declared, references included
    pub attributes: Attributes,
    /// Attributes with references resolved, when everything was known at plan time
    pub planned: Option<Attributes>,
    /// Last-applied attributes (updates and deletes)
    pub prior: Option<Attributes>,
    /// Provider identifier (updates and deletes)
    pub provider_id: Option<String>,
    /// Dependencies to record in state
    pub depends_on: Vec<String>,
    /// References only known after a predecessor has run
    pub deferred: Vec<Reference>,
    /// Actions that must succeed before this one starts
    pub predecessors: Vec<usize>,
}

impl Action {
    /// Whether some inputs are only known after apply
    pub fn has_deferred_inputs(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// One-line description used in logs
    pub fn describe(&self) -> String {
        format!("{} {} ({})", self.kind, self.name, self.resource_type)
    }
}

/// Counts of planned actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.create + self.update + self.delete
    }
}

/// Ordered set of actions reconciling desired with recorded state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// First action touching a resource
    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Position of the first action touching a resource
    pub fn position(&self, name: &str) -> Option<usize> {
        self.actions.iter().position(|a| a.name == name)
    }

    /// Inverse of the predecessor relation
    pub fn successors(&self) -> Vec<Vec<usize>> {
        let mut successors = vec![Vec::new(); self.actions.len()];
        for action in &self.actions {
            for &pred in &action.predecessors {
                successors[pred].push(action.index);
            }
        }
        successors
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action.kind {
                ActionKind::Create => summary.create += 1,
                ActionKind::Update => summary.update += 1,
                ActionKind::Delete => summary.delete += 1,
            }
        }
        summary
    }

    fn push(&mut self, mut action: Action) -> usize {
        let index = self.actions.len();
        action.index = index;
        action.predecessors.sort_unstable();
        action.predecessors.dedup();
        self.actions.push(action);
        index
    }
}

/// Compute the plan converging `snapshot` towards `graph`.
pub fn plan(graph: &ResourceGraph, snapshot: &StateSnapshot) -> Result<Plan, ValidationError> {
    graph.validate()?;
    check_types(graph, snapshot)?;

    let mut plan = Plan::default();
    // Create/update action per resource name
    let mut pending: HashMap<String, usize> = HashMap::new();

    for idx in graph.topological_order()? {
        let declaration = graph.resource(idx);
        let name = &declaration.name;

        // Outputs of anything being created or updated are only known after apply
        let lookup = |r: &Reference| {
            if pending.contains_key(&r.resource) {
                None
            } else {
                snapshot.lookup(r)
            }
        };

        let (planned, deferred) = match resolve_attributes(&declaration.attributes, &lookup) {
            Ok(resolved) => (Some(resolved), Vec::new()),
            Err(missing) => {
                // A missing output of a resource nothing will touch can never appear
                if let Some(unknown) = missing.iter().find(|r| !pending.contains_key(&r.resource)) {
                    return Err(ValidationError::UnknownOutput {
                        resource: name.clone(),
                        reference: unknown.to_string(),
                    });
                }
                (None, missing)
            }
        };

        let predecessors: Vec<usize> = graph
            .dependencies_of(idx)
            .iter()
            .filter_map(|&dep| pending.get(&graph.resource(dep).name).copied())
            .collect();

        let record = snapshot.get(name);
        let kind = match (record, &planned) {
            (None, _) => ActionKind::Create,
            (Some(record), Some(resolved)) if *resolved == record.attributes => continue,
            (Some(_), _) => ActionKind::Update,
        };

        let index = plan.push(Action {
            index: 0,
            kind,
            name: name.clone(),
            resource_type: declaration.resource_type.clone(),
            attributes: declaration.attributes.clone(),
            planned,
            prior: record.map(|r| r.attributes.clone()),
            provider_id: record.map(|r| r.provider_id.clone()),
            depends_on: graph.dependency_names(name),
            deferred,
            predecessors,
        });
        pending.insert(name.clone(), index);
    }

    let removed: Vec<&StateRecord> = snapshot
        .records
        .values()
        .filter(|r| !graph.contains(&r.name))
        .collect();
    plan_deletes(&mut plan, &removed, graph, snapshot, &pending)?;

    log::debug!("Planned {} actions", plan.len());
    Ok(plan)
}

/// Compute a plan deleting every recorded resource.
///
/// Ordering uses the dependencies recorded in state together with those of
/// the declared graph, so a stale record cannot reorder a teardown.
pub fn plan_destroy(graph: &ResourceGraph, snapshot: &StateSnapshot) -> Result<Plan, ValidationError> {
    let mut plan = Plan::default();
    let records: Vec<&StateRecord> = snapshot.records.values().collect();
    plan_deletes(&mut plan, &records, graph, snapshot, &HashMap::new())?;
    log::debug!("Planned teardown of {} resources", plan.len());
    Ok(plan)
}

fn check_types(graph: &ResourceGraph, snapshot: &StateSnapshot) -> Result<(), ValidationError> {
    for declaration in graph.iter() {
        if let Some(record) = snapshot.get(&declaration.name)
            && record.resource_type != declaration.resource_type
        {
            return Err(ValidationError::TypeChanged {
                name: declaration.name.clone(),
                from: record.resource_type.clone(),
                to: declaration.resource_type.clone(),
            });
        }
    }
    Ok(())
}

/// Append deletes for `records`, dependents first.
///
/// Each delete waits for the deletes of its former dependents and for the
/// updates of surviving resources that used to depend on it.
fn plan_deletes(
    plan: &mut Plan,
    records: &[&StateRecord],
    graph: &ResourceGraph,
    snapshot: &StateSnapshot,
    pending: &HashMap<String, usize>,
) -> Result<(), ValidationError> {
    if records.is_empty() {
        return Ok(());
    }

    let local: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.as_str(), i))
        .collect();

    // dependencies[i]: records i depended on; dependents[j]: records depending on j
    let mut dependencies = vec![Vec::new(); records.len()];
    let mut dependents = vec![Vec::new(); records.len()];
    for (i, record) in records.iter().enumerate() {
        for dep in delete_dependencies(record, graph) {
            if let Some(&j) = local.get(dep.as_str())
                && j != i
                && !dependencies[i].contains(&j)
            {
                dependencies[i].push(j);
                dependents[j].push(i);
            }
        }
    }

    let order = kahn_order(&dependents, &dependencies).ok_or_else(|| ValidationError::Cycle {
        cycle: records.iter().map(|r| r.name.clone()).collect(),
    })?;

    let mut delete_index: HashMap<usize, usize> = HashMap::new();
    for i in order {
        let record = records[i];

        let mut predecessors: Vec<usize> = dependents[i]
            .iter()
            .filter_map(|j| delete_index.get(j).copied())
            .collect();

        // Survivors that are being updated away from this resource
        for (survivor, &action) in pending {
            if let Some(previous) = snapshot.get(survivor)
                && previous.depends_on.iter().any(|d| d == &record.name)
            {
                predecessors.push(action);
            }
        }

        let index = plan.push(Action {
            index: 0,
            kind: ActionKind::Delete,
            name: record.name.clone(),
            resource_type: record.resource_type.clone(),
            attributes: Attributes::new(),
            planned: None,
            prior: Some(record.attributes.clone()),
            provider_id: Some(record.provider_id.clone()),
            depends_on: record.depends_on.clone(),
            deferred: Vec::new(),
            predecessors,
        });
        delete_index.insert(i, index);
    }

    Ok(())
}

fn delete_dependencies(record: &StateRecord, graph: &ResourceGraph) -> Vec<String> {
    let mut deps = record.depends_on.clone();
    for dep in graph.dependency_names(&record.name) {
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }
    deps
}
