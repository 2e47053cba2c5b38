use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};
use stepcore::{Graph, StructuralError, StructuralErrorKind};

/// Scheduling view of a validated graph, shared by the engine and the
/// compiler. Node and edge positions refer to `graph.nodes` / `graph.edges`.
///
/// Edges pointing into the trigger are inert and left out.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    trigger: usize,
    order: Vec<usize>,
    layers: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
    ancestors: Vec<BTreeSet<usize>>,
    reachable: Vec<bool>,
    sinks: Vec<usize>,
}

impl ExecutionPlan {
    pub fn build(graph: &Graph) -> Result<Self, StructuralError> {
        let trigger = graph
            .nodes
            .iter()
            .position(|n| n.is_trigger())
            .ok_or_else(|| StructuralError::new(StructuralErrorKind::TriggerCount, "graph has no trigger node"))?;

        let mut dag: DiGraph<usize, usize> = DiGraph::with_capacity(graph.nodes.len(), graph.edges.len());
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();
        for (i, node) in graph.nodes.iter().enumerate() {
            index.insert(node.id.as_str(), dag.add_node(i));
        }

        let n = graph.nodes.len();
        let mut incoming = vec![Vec::new(); n];
        let mut outgoing = vec![Vec::new(); n];
        for (e, edge) in graph.edges.iter().enumerate() {
            let (Some(&from), Some(&to)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) else {
                return Err(StructuralError::new(
                    StructuralErrorKind::DanglingEdge,
                    format!("edge '{}' references an unknown node", edge.id),
                )
                .with_edges([edge.id.clone()]));
            };
            if to.index() == trigger {
                continue;
            }
            dag.add_edge(from, to, e);
            incoming[to.index()].push(e);
            outgoing[from.index()].push(e);
        }

        let sorted = toposort(&dag, None).map_err(|cycle| {
            let id = graph.nodes[cycle.node_id().index()].id.clone();
            StructuralError::new(StructuralErrorKind::Cycle, format!("cycle through {}", id)).with_nodes([id])
        })?;
        let order: Vec<usize> = sorted.iter().map(|ix| dag[*ix]).collect();

        let mut depth = vec![0usize; n];
        let mut ancestors = vec![BTreeSet::new(); n];
        for &node in &order {
            for pred in dag.neighbors_directed(NodeIndex::new(node), Direction::Incoming) {
                let pred = pred.index();
                depth[node] = depth[node].max(depth[pred] + 1);
                let inherited = ancestors[pred].clone();
                ancestors[node].extend(inherited);
                ancestors[node].insert(pred);
            }
        }

        let mut layers: Vec<Vec<usize>> = Vec::new();
        for &node in &order {
            if layers.len() <= depth[node] {
                layers.resize(depth[node] + 1, Vec::new());
            }
            layers[depth[node]].push(node);
        }
        for layer in &mut layers {
            layer.sort_unstable();
        }

        let mut reachable = vec![false; n];
        let mut dfs = Dfs::new(&dag, NodeIndex::new(trigger));
        while let Some(ix) = dfs.next(&dag) {
            reachable[ix.index()] = true;
        }

        let sinks = (0..n).filter(|&i| reachable[i] && outgoing[i].is_empty()).collect();

        Ok(Self {
            trigger,
            order,
            layers,
            incoming,
            outgoing,
            ancestors,
            reachable,
            sinks,
        })
    }

    pub fn trigger(&self) -> usize {
        self.trigger
    }

    /// Topological order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Nodes grouped by longest distance from a root; each layer only
    /// depends on earlier ones.
    pub fn layers(&self) -> &[Vec<usize>] {
        &self.layers
    }

    /// Layers flattened, the order the compiler emits nodes in.
    pub fn layered_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.layers.iter().flatten().copied()
    }

    pub fn incoming(&self, node: usize) -> &[usize] {
        &self.incoming[node]
    }

    pub fn outgoing(&self, node: usize) -> &[usize] {
        &self.outgoing[node]
    }

    pub fn ancestors(&self, node: usize) -> &BTreeSet<usize> {
        &self.ancestors[node]
    }

    pub fn is_ancestor(&self, candidate: usize, of: usize) -> bool {
        self.ancestors[of].contains(&candidate)
    }

    pub fn is_reachable(&self, node: usize) -> bool {
        self.reachable[node]
    }

    /// Reachable nodes without outgoing edges.
    pub fn sinks(&self) -> &[usize] {
        &self.sinks
    }
}
