use crate::action::ActionCatalog;
use crate::transform::TransformKind;
use crate::{expr, Graph, NodeConfig, NodeId, NodeKind, StructuralError, StructuralErrorKind};
use std::collections::{HashMap, HashSet};

/// Check a candidate graph before any run or compile.
///
/// Checks run in order and the first failing one is reported: trigger
/// cardinality, duplicate ids, dangling edges, misplaced branches, cycles,
/// node completeness.
pub fn validate_structure(graph: &Graph, catalog: &dyn ActionCatalog) -> Result<(), StructuralError> {
    check_trigger_count(graph)?;
    check_duplicate_ids(graph)?;
    check_dangling_edges(graph)?;
    check_branches(graph)?;
    check_cycles(graph)?;
    check_completeness(graph, catalog)
}

fn check_trigger_count(graph: &Graph) -> Result<(), StructuralError> {
    let triggers: Vec<NodeId> = graph.triggers().map(|n| n.id.clone()).collect();
    match triggers.len() {
        1 => Ok(()),
        0 => Err(StructuralError::new(
            StructuralErrorKind::TriggerCount,
            "graph has no trigger node",
        )),
        n => Err(StructuralError::new(
            StructuralErrorKind::TriggerCount,
            format!("graph has {} trigger nodes, expected exactly one", n),
        )
        .with_nodes(triggers)),
    }
}

fn check_duplicate_ids(graph: &Graph) -> Result<(), StructuralError> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) && !duplicates.contains(&node.id) {
            duplicates.push(node.id.clone());
        }
    }
    if duplicates.is_empty() {
        return Ok(());
    }
    Err(StructuralError::new(
        StructuralErrorKind::DuplicateNode,
        format!("node ids used more than once: {}", duplicates.join(", ")),
    )
    .with_nodes(duplicates))
}

fn check_dangling_edges(graph: &Graph) -> Result<(), StructuralError> {
    let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut edges = Vec::new();
    let mut missing = Vec::new();
    for edge in &graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !ids.contains(endpoint.as_str()) {
                if !edges.contains(&edge.id) {
                    edges.push(edge.id.clone());
                }
                if !missing.contains(endpoint) {
                    missing.push(endpoint.clone());
                }
            }
        }
    }
    if edges.is_empty() {
        return Ok(());
    }
    Err(StructuralError::new(
        StructuralErrorKind::DanglingEdge,
        format!("edges reference unknown nodes: {}", missing.join(", ")),
    )
    .with_nodes(missing)
    .with_edges(edges))
}

fn check_branches(graph: &Graph) -> Result<(), StructuralError> {
    let kinds: HashMap<&str, NodeKind> = graph.nodes.iter().map(|n| (n.id.as_str(), n.kind())).collect();
    let offending: Vec<&crate::Edge> = graph
        .edges
        .iter()
        .filter(|e| e.branch.is_some() && kinds.get(e.source.as_str()) != Some(&NodeKind::Condition))
        .collect();
    if offending.is_empty() {
        return Ok(());
    }
    Err(StructuralError::new(
        StructuralErrorKind::UnexpectedBranch,
        "only edges leaving a condition node may carry a branch",
    )
    .with_nodes(offending.iter().map(|e| e.source.clone()))
    .with_edges(offending.iter().map(|e| e.id.clone())))
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-colour DFS over the non-trigger subgraph. A back edge to a gray
/// node (still on the stack) closes a cycle.
fn check_cycles(graph: &Graph) -> Result<(), StructuralError> {
    let index: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| !n.is_trigger())
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); graph.nodes.len()];
    for edge in &graph.edges {
        if let (Some(&from), Some(&to)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
            adjacency[from].push(to);
        }
    }

    let mut color = vec![Color::White; graph.nodes.len()];
    for start in 0..graph.nodes.len() {
        if graph.nodes[start].is_trigger() || color[start] != Color::White {
            continue;
        }
        // (node, next neighbour to visit)
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        color[start] = Color::Gray;

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if let Some(&succ) = adjacency[node].get(top.1) {
                top.1 += 1;
                match color[succ] {
                    Color::White => {
                        color[succ] = Color::Gray;
                        stack.push((succ, 0));
                    }
                    Color::Gray => {
                        let from = stack.iter().position(|&(n, _)| n == succ).unwrap_or(0);
                        let cycle: Vec<NodeId> = stack[from..]
                            .iter()
                            .map(|&(n, _)| graph.nodes[n].id.clone())
                            .collect();
                        return Err(StructuralError::new(
                            StructuralErrorKind::Cycle,
                            format!("cycle through {}", cycle.join(" -> ")),
                        )
                        .with_nodes(cycle));
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                stack.pop();
            }
        }
    }
    Ok(())
}

fn check_completeness(graph: &Graph, catalog: &dyn ActionCatalog) -> Result<(), StructuralError> {
    let mut offending = Vec::new();
    let mut reasons = Vec::new();

    for node in &graph.nodes {
        if let Some(reason) = incompleteness(&node.config, catalog) {
            reasons.push(format!("{}: {}", node.id, reason));
            offending.push(node.id.clone());
        }
    }
    if offending.is_empty() {
        return Ok(());
    }
    Err(StructuralError::new(StructuralErrorKind::IncompleteNode, reasons.join("; ")).with_nodes(offending))
}

fn incompleteness(config: &NodeConfig, catalog: &dyn ActionCatalog) -> Option<String> {
    match config {
        NodeConfig::Trigger(c) => c.trigger_type.is_none().then(|| "missing triggerType".to_string()),
        NodeConfig::Action(c) => {
            let Some(action_type) = c.action_type.as_deref() else {
                return Some("missing actionType".into());
            };
            let Some(schema) = catalog.config_schema(action_type) else {
                return Some(format!("unknown action '{}'", action_type));
            };
            let mut problems = Vec::new();
            for field in &schema {
                match c.fields.get(&field.name) {
                    None if field.required => problems.push(format!("missing '{}'", field.name)),
                    Some(v) if field.required && (v.is_null() || v.as_str().is_some_and(|s| s.trim().is_empty())) => {
                        problems.push(format!("empty '{}'", field.name))
                    }
                    Some(v) if !field.field_type.accepts(v) => problems.push(format!(
                        "'{}' should be {:?}, got {}",
                        field.name,
                        field.field_type,
                        v.type_name()
                    )),
                    _ => {}
                }
            }
            (!problems.is_empty()).then(|| problems.join(", "))
        }
        NodeConfig::Condition(c) => match c.condition.as_deref() {
            None => Some("missing condition".into()),
            Some(source) => expr::parse(source).err().map(|e| e.to_string()),
        },
        NodeConfig::Transform(c) => {
            let Some(transform_type) = c.transform_type.as_deref() else {
                return Some("missing transformType".into());
            };
            match TransformKind::parse(transform_type) {
                None => Some(format!("unknown transform '{}'", transform_type)),
                Some(kind) => {
                    let missing: Vec<&str> = kind
                        .required_fields()
                        .iter()
                        .copied()
                        .filter(|f| !c.fields.contains_key(*f))
                        .collect();
                    (!missing.is_empty()).then(|| format!("missing {}", missing.join(", ")))
                }
            }
        }
    }
}

/// Result of dropping surplus triggers from a candidate graph.
#[derive(Debug, Clone)]
pub struct TriggerRepair {
    pub graph: Graph,
    pub removed_nodes: Vec<NodeId>,
    pub removed_edges: Vec<String>,
}

impl TriggerRepair {
    pub fn is_noop(&self) -> bool {
        self.removed_nodes.is_empty()
    }
}

/// Keep the first trigger in node order and drop every other trigger along
/// with every edge touching one. The caller is told exactly what went.
pub fn repair_triggers(mut graph: Graph) -> TriggerRepair {
    let removed_nodes: Vec<NodeId> = graph.triggers().skip(1).map(|n| n.id.clone()).collect();
    if removed_nodes.is_empty() {
        return TriggerRepair {
            graph,
            removed_nodes,
            removed_edges: Vec::new(),
        };
    }

    let dropped: HashSet<&str> = removed_nodes.iter().map(String::as_str).collect();
    let (kept, removed): (Vec<_>, Vec<_>) = graph
        .edges
        .drain(..)
        .partition(|e| !dropped.contains(e.source.as_str()) && !dropped.contains(e.target.as_str()));
    graph.edges = kept;
    let mut first_seen = false;
    graph.nodes.retain(|n| {
        if !n.is_trigger() {
            return true;
        }
        let keep = !first_seen;
        first_seen = true;
        keep
    });
    let removed_edges: Vec<String> = removed.into_iter().map(|e| e.id).collect();

    tracing::warn!(
        removed_nodes = ?removed_nodes,
        removed_edges = ?removed_edges,
        "Dropped surplus trigger nodes"
    );

    TriggerRepair {
        graph,
        removed_nodes,
        removed_edges,
    }
}
