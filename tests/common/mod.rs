//! Shared graph-building helpers for the compiler integration tests.

#![allow(dead_code)]

use node_forge_compute::compute_graph::{BoundProvider, ComputeGraph};
use node_forge_compute::graph::{
    ComponentBinding, DataInterfaceSpec, KernelSpec, Link, LoopPinPair, LoopTerminalKind,
    LoopTerminalSpec, Node, NodeGraph, Pin, PinDirection, Program, ValueSpec,
};
use node_forge_compute::types::{DataType, GraphType, Value};

pub fn program(graphs: Vec<NodeGraph>) -> Program {
    Program {
        name: "asset".to_string(),
        bindings: vec![ComponentBinding {
            name: "mesh".to_string(),
            component_type: "SkinnedMesh".to_string(),
        }],
        graphs,
        functions: Vec::new(),
    }
}

pub fn update_graph(nodes: Vec<Node>, links: Vec<Link>) -> NodeGraph {
    let mut graph = NodeGraph::new("update", GraphType::Update);
    graph.nodes = nodes;
    graph.links = links;
    graph
}

/// Per-element data source backed by the primary component binding.
pub fn source_interface(id: &str, mutable: bool) -> Node {
    Node::new(id)
        .with_data_interface(DataInterfaceSpec { binding: 0, mutable })
        .with_pins(vec![
            Pin::output("data", DataType::Float).per_element(&["vertex"]),
        ])
}

/// Per-element sink; a terminal when its input is connected.
pub fn sink_interface(id: &str) -> Node {
    Node::new(id)
        .with_data_interface(DataInterfaceSpec {
            binding: 0,
            mutable: false,
        })
        .with_pins(vec![
            Pin::input("in", DataType::Float).per_element(&["vertex"]),
        ])
}

pub fn value_node(id: &str, identifier: &str, value: f32, variable: bool) -> Node {
    Node::new(id)
        .with_value(ValueSpec {
            identifier: identifier.to_string(),
            value: Value::Float(value),
            variable,
        })
        .with_pins(vec![Pin::output("out", DataType::Float)])
}

/// Constant with an override input pin.
pub fn overridable_constant(id: &str, identifier: &str, value: f32) -> Node {
    Node::new(id)
        .with_value(ValueSpec {
            identifier: identifier.to_string(),
            value: Value::Float(value),
            variable: false,
        })
        .with_pins(vec![
            Pin::input("override", DataType::Float),
            Pin::output("out", DataType::Float),
        ])
}

pub fn kernel_spec(body: &str) -> KernelSpec {
    KernelSpec {
        entry_point: "main_cs".to_string(),
        source: body.to_string(),
        group_size: [64, 1, 1],
        primary_group: "primary".to_string(),
        atomic_outputs: Vec::new(),
        readback_outputs: Vec::new(),
    }
}

/// Kernel with one per-element input `in` under the primary group and one
/// per-element output `out`.
pub fn pass_kernel(id: &str) -> Node {
    Node::new(id)
        .with_kernel(kernel_spec("Write_out(index, Read_in(index));"))
        .with_pins(vec![
            Pin::group(
                "primary",
                PinDirection::Input,
                vec![Pin::input("in", DataType::Float).per_element(&["vertex"])],
            ),
            Pin::output("out", DataType::Float).per_element(&["vertex"]),
        ])
}

/// Kernel reading one singleton value pin `scale` and writing `out`.
pub fn scale_kernel(id: &str) -> Node {
    Node::new(id)
        .with_kernel(kernel_spec("Write_out(index, Read_scale());"))
        .with_pins(vec![
            Pin::group(
                "primary",
                PinDirection::Input,
                vec![Pin::input("scale", DataType::Float)],
            ),
            Pin::output("out", DataType::Float).per_element(&["vertex"]),
        ])
}

/// Entry/return terminal pair over one per-element boundary resource named
/// `data`, with index/count pins on the entry.
pub fn loop_pair(entry_id: &str, return_id: &str, count: u32) -> (Node, Node) {
    let pairs = vec![LoopPinPair {
        name: "data".to_string(),
        entry_in: "data_in".to_string(),
        entry_out: "data_out".to_string(),
        return_in: "data_ret_in".to_string(),
        return_out: "data_ret_out".to_string(),
    }];
    let entry = Node::new(entry_id)
        .with_loop_terminal(LoopTerminalSpec {
            kind: LoopTerminalKind::Entry,
            pair_node: return_id.to_string(),
            count,
            pairs: pairs.clone(),
            index_pin: Some("index".to_string()),
            count_pin: Some("count".to_string()),
        })
        .with_pins(vec![
            Pin::input("data_in", DataType::Float).per_element(&["vertex"]),
            Pin::output("data_out", DataType::Float).per_element(&["vertex"]),
            Pin::output("index", DataType::Uint),
            Pin::output("count", DataType::Uint),
        ]);
    let ret = Node::new(return_id)
        .with_loop_terminal(LoopTerminalSpec {
            kind: LoopTerminalKind::Return,
            pair_node: entry_id.to_string(),
            count,
            pairs,
            index_pin: None,
            count_pin: None,
        })
        .with_pins(vec![
            Pin::input("data_ret_in", DataType::Float).per_element(&["vertex"]),
            Pin::output("data_ret_out", DataType::Float).per_element(&["vertex"]),
        ]);
    (entry, ret)
}

pub fn provider_index(graph: &ComputeGraph, name: &str) -> Option<usize> {
    graph.providers.iter().position(|p| p.provider.name == name)
}

pub fn provider_named<'a>(graph: &'a ComputeGraph, name: &str) -> &'a BoundProvider {
    graph
        .providers
        .iter()
        .find(|p| p.provider.name == name)
        .unwrap_or_else(|| {
            let names: Vec<&str> = graph.providers.iter().map(|p| p.provider.name.as_str()).collect();
            panic!("provider '{name}' not registered, got: {names:?}")
        })
}

pub fn kernel_index(graph: &ComputeGraph, name: &str) -> usize {
    graph
        .kernels
        .iter()
        .position(|k| k.name == name)
        .unwrap_or_else(|| {
            let names: Vec<&str> = graph.kernels.iter().map(|k| k.name.as_str()).collect();
            panic!("kernel '{name}' not scheduled, got: {names:?}")
        })
}
