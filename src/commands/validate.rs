//! `validate` - manifest and graph checks without touching state

use anyhow::Result;
use declarative::{ResourceGraph, StateSnapshot};

use super::{Session, Status};
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<Status> {
    let session = Session::open(ctx)?;
    let graph = session.manifest.graph()?;

    // A first-run plan covers every declared resource, so preflight sees every type
    let plan = declarative::plan(&graph, &StateSnapshot::default())?;
    declarative::preflight(&plan, &session.providers())?;

    if !ctx.quiet {
        ui::header(&format!("{} ({})", ctx.file.display(), ctx.env));
        for line in creation_order(&graph)? {
            ui::dim(&line);
        }
        println!();
    }
    ui::success(&format!(
        "{} resources, {} dependencies, no cycles",
        graph.len(),
        edge_count(&graph)
    ));
    Ok(Status::Success)
}

/// One line per resource in the order apply would create them
fn creation_order(graph: &ResourceGraph) -> Result<Vec<String>> {
    let lines = graph
        .topological_order()?
        .into_iter()
        .map(|idx| {
            let resource = graph.resource(idx);
            let deps = graph.dependency_names(&resource.name);
            if deps.is_empty() {
                format!("{} ({})", resource.name, resource.resource_type)
            } else {
                format!("{} ({}) <- {}", resource.name, resource.resource_type, deps.join(", "))
            }
        })
        .collect();
    Ok(lines)
}

fn edge_count(graph: &ResourceGraph) -> usize {
    (0..graph.len()).map(|i| graph.dependencies_of(i).len()).sum()
}
