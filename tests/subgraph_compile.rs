//! A kernel nested in a referenced subgraph compiles under its traversal
//! context, wired to the outer graph's providers.

mod common;

use common::*;
use node_forge_compute::graph::{Node, NodeGraph, Pin, SubgraphPort, link};
use node_forge_compute::types::{DataType, GraphType};
use node_forge_compute::{CompileStatus, Compiler};

#[test]
fn kernel_inside_a_subgraph_binds_outer_providers() {
    let mut inner = NodeGraph::new("inner", GraphType::Subgraph);
    inner.nodes = vec![
        Node::new("inner_entry")
            .with_subgraph_port(SubgraphPort::Entry)
            .with_pins(vec![
                Pin::output("in", DataType::Float).per_element(&["vertex"]),
            ]),
        pass_kernel("inner_k"),
        Node::new("inner_return")
            .with_subgraph_port(SubgraphPort::Return)
            .with_pins(vec![
                Pin::input("out", DataType::Float).per_element(&["vertex"]),
            ]),
    ];
    inner.links = vec![
        link("inner_entry", "in", "inner_k", "in"),
        link("inner_k", "out", "inner_return", "out"),
    ];

    let mut outer = update_graph(
        vec![
            source_interface("src", true),
            Node::new("ref").with_subgraph("inner").with_pins(vec![
                Pin::input("in", DataType::Float).per_element(&["vertex"]),
                Pin::output("out", DataType::Float).per_element(&["vertex"]),
            ]),
            sink_interface("sink"),
        ],
        vec![
            link("src", "data", "ref", "in"),
            link("ref", "out", "sink", "in"),
        ],
    );
    outer.subgraphs.push(inner);

    let output = Compiler::default()
        .compile(&program(vec![outer]))
        .expect("compile");

    assert_eq!(output.status, CompileStatus::Compiled, "{:?}", output.diagnostics);
    assert_eq!(output.compute_graphs.len(), 1);
    let compiled = &output.compute_graphs[0];

    // One invocation of the nested kernel, labeled by its context.
    assert_eq!(compiled.kernels.len(), 1);
    assert_eq!(compiled.kernels[0].name, "ref/inner_k");
    assert_eq!(compiled.kernel_nodes[0].as_deref(), Some("inner_k"));

    // Wired straight through the boundary: reads the outer source, writes
    // the outer sink.
    let src_index = provider_index(compiled, "src").expect("src registered");
    let sink_index = provider_index(compiled, "sink").expect("sink registered");
    assert!(
        compiled
            .edges
            .iter()
            .any(|e| e.is_input && e.kernel_index == 0 && e.provider_index == src_index)
    );
    assert!(
        compiled
            .edges
            .iter()
            .any(|e| !e.is_input && e.kernel_index == 0 && e.provider_index == sink_index)
    );
}
