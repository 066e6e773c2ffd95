//! Graph builder
//!
//! Builds ordered adjacency maps from a stored workflow and validates the
//! structure with petgraph. Edge order is preserved exactly as stored because
//! edge selection picks the first match, which is observable behavior. Cycles
//! are allowed here; the flow executor's step budget bounds them at runtime.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{HashMap, HashSet};

use crate::error::EngineError;
use crate::workflow::types::{Edge, Node, Workflow};

/// Adjacency view of one workflow, ready for execution
#[derive(Debug)]
pub struct FlowGraph {
    nodes: HashMap<String, Node>,
    out_edges: HashMap<String, Vec<Edge>>,
    in_edges: HashMap<String, Vec<Edge>>,
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl FlowGraph {
    /// Build the adjacency maps; edges referencing unknown nodes are a
    /// configuration error.
    pub fn build(workflow: &Workflow) -> Result<Self, EngineError> {
        let mut nodes = HashMap::new();
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for node in &workflow.nodes {
            nodes.insert(node.id.clone(), node.clone());
            let index = graph.add_node(node.id.clone());
            indices.insert(node.id.clone(), index);
        }

        let mut out_edges: HashMap<String, Vec<Edge>> = HashMap::new();
        let mut in_edges: HashMap<String, Vec<Edge>> = HashMap::new();
        for edge in &workflow.edges {
            let source = indices.get(&edge.source).ok_or_else(|| {
                EngineError::config(
                    "edges",
                    format!("edge '{}' references unknown source node '{}'", edge.id, edge.source),
                )
            })?;
            let target = indices.get(&edge.target).ok_or_else(|| {
                EngineError::config(
                    "edges",
                    format!("edge '{}' references unknown target node '{}'", edge.id, edge.target),
                )
            })?;
            graph.add_edge(*source, *target, ());
            out_edges
                .entry(edge.source.clone())
                .or_default()
                .push(edge.clone());
            in_edges
                .entry(edge.target.clone())
                .or_default()
                .push(edge.clone());
        }

        Ok(Self {
            nodes,
            out_edges,
            in_edges,
            graph,
            indices,
        })
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Outgoing edges of a node in stored order
    pub fn outgoing(&self, id: &str) -> &[Edge] {
        self.out_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incoming edges of a node in stored order
    pub fn incoming(&self, id: &str) -> &[Edge] {
        self.in_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Node ids not reachable from any of the given start nodes; used by the
    /// registry to warn about orphaned nodes at compile time.
    pub fn unreachable_from<'a>(
        &self,
        starts: impl IntoIterator<Item = &'a str>,
    ) -> Vec<String> {
        let mut reached: HashSet<NodeIndex> = HashSet::new();
        for start in starts {
            if let Some(&index) = self.indices.get(start) {
                let mut bfs = Bfs::new(&self.graph, index);
                while let Some(visited) = bfs.next(&self.graph) {
                    reached.insert(visited);
                }
            }
        }
        self.indices
            .iter()
            .filter(|(_, index)| !reached.contains(index))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow(nodes: Vec<(&str, &str)>, edges: Vec<(&str, &str, &str)>) -> Workflow {
        serde_json::from_value(json!({
            "id": "wf",
            "name": "test",
            "nodes": nodes.iter().map(|(id, ty)| json!({"id": id, "type": ty})).collect::<Vec<_>>(),
            "edges": edges.iter().map(|(s, t, h)| json!({
                "id": format!("{s}-{t}"), "source": s, "target": t, "sourceHandle": h
            })).collect::<Vec<_>>(),
        }))
        .unwrap()
    }

    #[test]
    fn preserves_stored_edge_order() {
        let wf = workflow(
            vec![("a", "trigger"), ("b", "response"), ("c", "response")],
            vec![("a", "b", "x"), ("a", "c", "")],
        );
        let graph = FlowGraph::build(&wf).unwrap();
        let out = graph.outgoing("a");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].target, "b");
        assert_eq!(out[1].target, "c");
        assert_eq!(graph.incoming("b")[0].source, "a");
    }

    #[test]
    fn unknown_edge_endpoint_is_a_config_error() {
        let wf = workflow(vec![("a", "trigger")], vec![("a", "ghost", "")]);
        let err = FlowGraph::build(&wf).unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }

    #[test]
    fn reports_nodes_unreachable_from_triggers() {
        let wf = workflow(
            vec![("t", "trigger"), ("a", "transform"), ("orphan", "response")],
            vec![("t", "a", "")],
        );
        let graph = FlowGraph::build(&wf).unwrap();
        let unreachable = graph.unreachable_from(["t"]);
        assert_eq!(unreachable, vec!["orphan".to_string()]);
    }

    #[test]
    fn cycles_are_allowed_at_build_time() {
        let wf = workflow(
            vec![("t", "trigger"), ("a", "transform")],
            vec![("t", "a", ""), ("a", "a", "")],
        );
        assert!(FlowGraph::build(&wf).is_ok());
    }
}
