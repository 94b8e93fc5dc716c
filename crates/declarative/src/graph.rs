//! Resource graph - declared resources and their dependency edges
//!
//! Resources live in an arena indexed by declaration order. Edges are stored
//! in both directions as index lists, so traversals never chase references.
//! An edge `a -> b` means `a` must exist before `b` is created, and `b` must
//! be destroyed before `a`.

use crate::error::ValidationError;
use crate::reference::collect_references;
use crate::types::Declaration;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Dependency graph of declared resources
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: Vec<Declaration>,
    index: HashMap<String, usize>,
    /// `dependencies[b]` lists every `a` with an edge `a -> b`
    dependencies: Vec<Vec<usize>>,
    /// `dependents[a]` lists every `b` with an edge `a -> b`
    dependents: Vec<Vec<usize>>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource whose dependencies are already declared.
    ///
    /// Dependencies are the explicit `depends_on` entries plus every resource
    /// referenced from the attributes.
    pub fn add_resource(&mut self, declaration: Declaration) -> Result<usize, ValidationError> {
        validate_name(&declaration.name)?;
        if self.index.contains_key(&declaration.name) {
            return Err(ValidationError::DuplicateName {
                name: declaration.name,
            });
        }

        let mut deps = Vec::new();
        for dep in required_dependencies(&declaration) {
            if dep == declaration.name {
                return Err(self_cycle(&dep));
            }
            let Some(&idx) = self.index.get(&dep) else {
                return Err(ValidationError::UnknownDependency {
                    resource: declaration.name,
                    dependency: dep,
                });
            };
            deps.push(idx);
        }

        let idx = self.insert(declaration);
        for dep in deps {
            self.link(dep, idx);
        }
        Ok(idx)
    }

    /// Build a graph from declarations in any order, then validate it.
    pub fn from_declarations<I>(declarations: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = Declaration>,
    {
        let mut graph = Self::new();
        for declaration in declarations {
            validate_name(&declaration.name)?;
            if graph.index.contains_key(&declaration.name) {
                return Err(ValidationError::DuplicateName {
                    name: declaration.name,
                });
            }
            graph.insert(declaration);
        }

        for idx in 0..graph.resources.len() {
            for dep in required_dependencies(&graph.resources[idx]) {
                let Some(&dep_idx) = graph.index.get(&dep) else {
                    return Err(ValidationError::UnknownDependency {
                        resource: graph.resources[idx].name.clone(),
                        dependency: dep,
                    });
                };
                if dep_idx == idx {
                    return Err(self_cycle(&dep));
                }
                graph.link(dep_idx, idx);
            }
        }

        graph.validate()?;
        Ok(graph)
    }

    /// Add an edge `from -> to` between two declared resources.
    ///
    /// This may introduce a cycle; call [`validate`](Self::validate) afterwards.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<(), ValidationError> {
        let to_idx = self
            .index_of(to)
            .ok_or_else(|| ValidationError::UnknownDependency {
                resource: from.to_string(),
                dependency: to.to_string(),
            })?;
        let from_idx = self
            .index_of(from)
            .ok_or_else(|| ValidationError::UnknownDependency {
                resource: to.to_string(),
                dependency: from.to_string(),
            })?;
        if from_idx == to_idx {
            return Err(self_cycle(from));
        }
        self.link(from_idx, to_idx);
        Ok(())
    }

    /// Check that the dependency relation is acyclic.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match find_cycle(&self.dependents) {
            Some(cycle) => Err(ValidationError::Cycle {
                cycle: cycle.into_iter().map(|i| self.resources[i].name.clone()).collect(),
            }),
            None => Ok(()),
        }
    }

    /// Dependencies before dependents, ties broken by declaration order
    pub fn topological_order(&self) -> Result<Vec<usize>, ValidationError> {
        kahn_order(&self.dependencies, &self.dependents).ok_or_else(|| self.cycle_error())
    }

    /// Dependents before dependencies, ties broken by declaration order
    pub fn reverse_topological_order(&self) -> Result<Vec<usize>, ValidationError> {
        kahn_order(&self.dependents, &self.dependencies).ok_or_else(|| self.cycle_error())
    }

    fn cycle_error(&self) -> ValidationError {
        self.validate()
            .err()
            .unwrap_or_else(|| ValidationError::Cycle { cycle: Vec::new() })
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Declaration> {
        self.index_of(name).map(|i| &self.resources[i])
    }

    /// Resource at an arena index
    pub fn resource(&self, idx: usize) -> &Declaration {
        &self.resources[idx]
    }

    /// Resources in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Declaration> {
        self.resources.iter()
    }

    /// Indices of the resources `idx` depends on
    pub fn dependencies_of(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    /// Indices of the resources depending on `idx`
    pub fn dependents_of(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Names of the resources `name` depends on, in declaration order
    pub fn dependency_names(&self, name: &str) -> Vec<String> {
        let Some(idx) = self.index_of(name) else {
            return Vec::new();
        };
        let mut deps = self.dependencies[idx].clone();
        deps.sort_unstable();
        deps.into_iter()
            .map(|i| self.resources[i].name.clone())
            .collect()
    }

    fn insert(&mut self, declaration: Declaration) -> usize {
        let idx = self.resources.len();
        self.index.insert(declaration.name.clone(), idx);
        self.resources.push(declaration);
        self.dependencies.push(Vec::new());
        self.dependents.push(Vec::new());
        idx
    }

    fn link(&mut self, from: usize, to: usize) {
        if !self.dependencies[to].contains(&from) {
            self.dependencies[to].push(from);
            self.dependents[from].push(to);
        }
    }
}

/// Explicit dependencies followed by referenced resources, without repeats
fn required_dependencies(declaration: &Declaration) -> Vec<String> {
    let mut deps: Vec<String> = Vec::new();
    let referenced = collect_references(&declaration.attributes)
        .into_iter()
        .map(|r| r.resource);
    for dep in declaration.depends_on.iter().cloned().chain(referenced) {
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }
    deps
}

/// Whether `name` matches `[A-Za-z0-9_-]+`
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidName {
            name: name.to_string(),
        })
    }
}

fn self_cycle(name: &str) -> ValidationError {
    ValidationError::Cycle {
        cycle: vec![name.to_string(), name.to_string()],
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Iterative three-colour DFS over a successor list.
///
/// Returns the nodes of the first cycle found, with the entry node repeated
/// at the end.
pub(crate) fn find_cycle(successors: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut color = vec![Color::White; successors.len()];

    for start in 0..successors.len() {
        if color[start] != Color::White {
            continue;
        }
        color[start] = Color::Gray;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if top.1 < successors[node].len() {
                let next = successors[node][top.1];
                top.1 += 1;
                match color[next] {
                    Color::White => {
                        color[next] = Color::Gray;
                        stack.push((next, 0));
                    }
                    Color::Gray => {
                        let from = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                        let mut cycle: Vec<usize> = stack[from..].iter().map(|&(n, _)| n).collect();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                stack.pop();
            }
        }
    }

    None
}

/// Kahn's algorithm with a min-heap, so ready nodes come out in index order.
///
/// `predecessors[i]` must be released before `i`; `successors` is the inverse
/// relation. Returns `None` if the relation has a cycle.
pub(crate) fn kahn_order(predecessors: &[Vec<usize>], successors: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut remaining: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = remaining
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(predecessors.len());

    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &next in &successors[node] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    (order.len() == predecessors.len()).then_some(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(graph: &ResourceGraph, order: &[usize]) -> Vec<String> {
        order
            .iter()
            .map(|&i| graph.resource(i).name.clone())
            .collect()
    }

    fn topology() -> ResourceGraph {
        ResourceGraph::from_declarations([
            Declaration::new("service", "compute")
                .attr("db", "${database.endpoint}")
                .depends_on("network"),
            Declaration::new("network", "network"),
            Declaration::new("database", "storage").depends_on("network"),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut graph = ResourceGraph::new();
        graph.add_resource(Declaration::new("net", "network")).unwrap();
        let err = graph.add_resource(Declaration::new("net", "network")).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateName { name: "net".into() });
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut graph = ResourceGraph::new();
        let err = graph
            .add_resource(Declaration::new("db", "storage").depends_on("net"))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownDependency {
                resource: "db".into(),
                dependency: "net".into(),
            }
        );
    }

    #[test]
    fn test_reference_counts_as_dependency() {
        let mut graph = ResourceGraph::new();
        let err = graph
            .add_resource(Declaration::new("svc", "compute").attr("vpc", "${net.id}"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownDependency { dependency, .. } if dependency == "net"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let mut graph = ResourceGraph::new();
        let err = graph.add_resource(Declaration::new("a/b", "x")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidName { .. }));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = ResourceGraph::from_declarations([Declaration::new("a", "x").depends_on("a")]).unwrap_err();
        assert!(matches!(err, ValidationError::Cycle { .. }));
    }

    #[test]
    fn test_forward_declarations_allowed() {
        let graph = topology();
        let order = graph.topological_order().unwrap();
        assert_eq!(names(&graph, &order), vec!["network", "database", "service"]);
    }

    #[test]
    fn test_reverse_order() {
        let graph = topology();
        let order = graph.reverse_topological_order().unwrap();
        assert_eq!(names(&graph, &order), vec!["service", "database", "network"]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let graph = ResourceGraph::from_declarations([
            Declaration::new("c", "x"),
            Declaration::new("a", "x"),
            Declaration::new("b", "x").depends_on("c"),
        ])
        .unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(names(&graph, &order), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cycle_detected_and_named() {
        let err = ResourceGraph::from_declarations([
            Declaration::new("a", "x").depends_on("c"),
            Declaration::new("b", "x").depends_on("a"),
            Declaration::new("c", "x").depends_on("b"),
            Declaration::new("d", "x"),
        ])
        .unwrap_err();
        let ValidationError::Cycle { cycle } = err else {
            panic!("expected cycle, got {err:?}");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(!cycle.contains(&"d".to_string()));
    }

    #[test]
    fn test_add_dependency_can_close_cycle() {
        let mut graph = ResourceGraph::new();
        graph.add_resource(Declaration::new("a", "x")).unwrap();
        graph
            .add_resource(Declaration::new("b", "x").depends_on("a"))
            .unwrap();
        assert!(graph.validate().is_ok());

        graph.add_dependency("b", "a").unwrap();
        assert!(matches!(graph.validate(), Err(ValidationError::Cycle { .. })));
        assert!(graph.topological_order().is_err());
    }

    #[test]
    fn test_add_dependency_names_both_ends() {
        let mut graph = ResourceGraph::new();
        graph.add_resource(Declaration::new("a", "x")).unwrap();

        let err = graph.add_dependency("a", "ghost").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnknownDependency { ref resource, ref dependency } if resource == "a" && dependency == "ghost"
        ));

        let err = graph.add_dependency("ghost", "a").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnknownDependency { ref resource, ref dependency } if resource == "a" && dependency == "ghost"
        ));
    }

    #[test]
    fn test_acyclic_graphs_validate() {
        // A layered graph where every node depends on all nodes of the previous layer
        let mut declarations = Vec::new();
        for layer in 0..4 {
            for i in 0..3 {
                let mut decl = Declaration::new(format!("n{layer}_{i}"), "x");
                if layer > 0 {
                    for j in 0..3 {
                        decl = decl.depends_on(format!("n{}_{j}", layer - 1));
                    }
                }
                declarations.push(decl);
            }
        }
        let graph = ResourceGraph::from_declarations(declarations).unwrap();
        let order = graph.topological_order().unwrap();
        let position: HashMap<usize, usize> = order.iter().enumerate().map(|(p, &i)| (i, p)).collect();
        for idx in 0..graph.len() {
            for &dep in graph.dependencies_of(idx) {
                assert!(position[&dep] < position[&idx]);
            }
        }
    }

    #[test]
    fn test_dependency_names() {
        let graph = topology();
        assert_eq!(graph.dependency_names("service"), vec!["network", "database"]);
        assert!(graph.dependency_names("missing").is_empty());
    }
}
