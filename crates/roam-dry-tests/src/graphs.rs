// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph shape builders and path helpers for fixture graphs.

use roam_core::{
    Fields, GraphError, GraphStore, NodeId, ObjectId, TravelResult, Value, ROOT_TYPE,
};

use crate::travel::{PLACE, ROAD};

/// Creates a [`PLACE`] called `name`.
pub fn place(graph: &mut GraphStore, name: &str) -> Result<NodeId, GraphError> {
    graph.create(PLACE, Fields::new().with("name", name))
}

/// Builds `from -> names[0] -> names[1] -> ...` over [`ROAD`]s and returns
/// the new places in order.
pub fn chain(graph: &mut GraphStore, from: NodeId, names: &[&str]) -> Result<Vec<NodeId>, GraphError> {
    let mut prev = from;
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let next = place(graph, name)?;
        graph.connect(prev, next, ROAD, Fields::new().with("label", *name), true)?;
        out.push(next);
        prev = next;
    }
    Ok(out)
}

/// Links `hub` to one new place per name and returns them in order.
pub fn star(graph: &mut GraphStore, hub: NodeId, names: &[&str]) -> Result<Vec<NodeId>, GraphError> {
    names
        .iter()
        .map(|name| {
            let spoke = place(graph, name)?;
            graph.connect(hub, spoke, ROAD, Fields::new().with("label", *name), true)?;
            Ok(spoke)
        })
        .collect()
}

/// Renders a walk path as place names. Roots render as `root`,
/// relationships as `~<label>`, anything unreadable as `?`.
pub fn names(graph: &mut GraphStore, path: &[ObjectId]) -> Vec<String> {
    let root_ty = roam_core::make_type_id(ROOT_TYPE);
    path.iter()
        .map(|id| {
            if graph.type_of(*id).ok() == Some(root_ty) {
                return "root".to_owned();
            }
            let (field, prefix) = match id {
                ObjectId::Node(_) => ("name", ""),
                ObjectId::Edge(_) => ("label", "~"),
            };
            match graph.get(*id, field) {
                Ok(Some(Value::Str(name))) => format!("{prefix}{name}"),
                _ => "?".to_owned(),
            }
        })
        .collect()
}

/// String reports of `result` that start with `prefix`, prefix stripped.
pub fn reports_with(result: &TravelResult, prefix: &str) -> Vec<String> {
    result
        .reports
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|report| report.strip_prefix(prefix))
        .map(str::to_owned)
        .collect()
}
