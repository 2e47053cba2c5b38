use crate::{FlowError, Node, NodeKind};
use serde::{Deserialize, Serialize};

/// Outcome a Condition edge fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    True,
    False,
}

impl Branch {
    pub fn matches(&self, outcome: bool) -> bool {
        matches!((self, outcome), (Branch::True, true) | (Branch::False, false))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::True => "true",
            Branch::False => "false",
        }
    }
}

impl From<bool> for Branch {
    fn from(outcome: bool) -> Self {
        if outcome {
            Branch::True
        } else {
            Branch::False
        }
    }
}

/// Directed dependency between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
}

/// Complete workflow graph definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn add_node(&mut self, node: Node) -> String {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connect two nodes with an unconditional edge.
    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) -> String {
        let (source, target) = (source.into(), target.into());
        let id = format!("{}->{}", source, target);
        self.edges.push(Edge {
            id: id.clone(),
            source,
            target,
            branch: None,
        });
        id
    }

    /// Connect a Condition node to the successor fired on `branch`.
    pub fn connect_branch(
        &mut self,
        source: impl Into<String>,
        branch: Branch,
        target: impl Into<String>,
    ) -> String {
        let (source, target) = (source.into(), target.into());
        let id = format!("{}:{}->{}", source, branch.as_str(), target);
        self.edges.push(Edge {
            id: id.clone(),
            source,
            target,
            branch: Some(branch),
        });
        id
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// First trigger in node order.
    pub fn trigger(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.kind() == NodeKind::Trigger)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind() == NodeKind::Trigger)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Action identifiers used by the graph, in first-use order.
    pub fn action_types(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for action_type in self.nodes.iter().filter_map(|n| n.action_type()) {
            if !seen.contains(&action_type) {
                seen.push(action_type);
            }
        }
        seen
    }
}
