//! The node-graph model the compiler consumes.
//!
//! This is the contract with the (external) graph editor: plain serde-derived
//! data describing nodes, pins, and links, plus the routed-traversal queries
//! the compiler needs. The compiler never mutates a [`Program`]; it takes an
//! immutable snapshot for the whole duration of a compile.

mod node;
mod routing;

pub use node::{
    DataDomain, DataInterfaceSpec, KernelSpec, LoopPinPair, LoopTerminalKind, LoopTerminalSpec,
    Node, Pin, PinDirection, SubgraphPort, SubgraphRef, ValueSpec,
};
pub use routing::{GraphView, RoutedNode, RoutedPin, TraversalContext};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::GraphType;

/// Identifies one external entity instance (e.g. one mesh component) that
/// supplies per-element counts and state to data providers bound to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentBinding {
    pub name: String,
    pub component_type: String,
}

/// One end of a link.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinRef {
    pub node: String,
    pub pin: String,
}

impl PinRef {
    pub fn new(node: &str, pin: &str) -> PinRef {
        PinRef {
            node: node.to_string(),
            pin: pin.to_string(),
        }
    }
}

/// A directed connection from an output pin to an input pin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Link {
    pub from: PinRef,
    pub to: PinRef,
}

/// Shorthand used heavily by tests and fixtures.
pub fn link(from_node: &str, from_pin: &str, to_node: &str, to_pin: &str) -> Link {
    Link {
        from: PinRef::new(from_node, from_pin),
        to: PinRef::new(to_node, to_pin),
    }
}

/// One authored node graph. Node ids must be unique across the whole
/// [`Program`]; graph names must be unique among subgraphs and functions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeGraph {
    pub name: String,
    pub graph_type: GraphType,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
    /// Nested graphs owned by subgraph reference nodes in this graph.
    #[serde(default)]
    pub subgraphs: Vec<NodeGraph>,
}

impl NodeGraph {
    pub fn new(name: &str, graph_type: GraphType) -> NodeGraph {
        NodeGraph {
            name: name.to_string(),
            graph_type,
            nodes: Vec::new(),
            links: Vec::new(),
            subgraphs: Vec::new(),
        }
    }
}

/// A full compilable asset: component bindings (index 0 is the primary
/// binding), the top-level graphs, and shared function graphs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub bindings: Vec<ComponentBinding>,
    #[serde(default)]
    pub graphs: Vec<NodeGraph>,
    /// Graphs shared by function-reference nodes across the program.
    #[serde(default)]
    pub functions: Vec<NodeGraph>,
}

impl Program {
    pub fn from_json(text: &str) -> Result<Program> {
        serde_json::from_str(text).context("failed to parse program json")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize program")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Value};

    #[test]
    fn program_round_trips_through_json() {
        let mut graph = NodeGraph::new("update", GraphType::Update);
        graph.nodes.push(
            Node::new("v").with_value(ValueSpec {
                identifier: "scale".to_string(),
                value: Value::Float(2.0),
                variable: false,
            }).with_pins(vec![Pin::output("out", DataType::Float)]),
        );
        graph.links.push(link("v", "out", "sink", "in"));
        let program = Program {
            name: "asset".to_string(),
            bindings: vec![ComponentBinding {
                name: "mesh".to_string(),
                component_type: "SkinnedMesh".to_string(),
            }],
            graphs: vec![graph],
            functions: Vec::new(),
        };

        let text = program.to_json().expect("serialize");
        let back = Program::from_json(&text).expect("parse");
        assert_eq!(back.graphs[0].nodes[0].id, "v");
        assert_eq!(back.graphs[0].links[0].to, PinRef::new("sink", "in"));
    }
}
