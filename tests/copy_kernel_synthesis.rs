//! Copy kernels bridge non-kernel providers into sinks.

mod common;

use common::*;
use node_forge_compute::graph::link;
use node_forge_compute::types::GraphType;
use node_forge_compute::{CompileStatus, Compiler};

#[test]
fn value_wired_straight_into_a_sink_gets_a_copy_kernel() {
    // Same graph as the basic scenario, plus the value wired directly into a
    // second sink with no kernel in between.
    let graph = update_graph(
        vec![
            value_node("v", "scale_v", 2.0, true),
            scale_kernel("k"),
            sink_interface("sink_a"),
            sink_interface("sink_b"),
        ],
        vec![
            link("v", "out", "k", "scale"),
            link("k", "out", "sink_a", "in"),
            link("v", "out", "sink_b", "in"),
        ],
    );
    let output = Compiler::default()
        .compile(&program(vec![graph]))
        .expect("compile");

    assert_eq!(output.status, CompileStatus::Compiled, "{:?}", output.diagnostics);
    assert_eq!(output.compute_graphs.len(), 1);
    let compiled = &output.compute_graphs[0];
    assert_eq!(compiled.graph_type, GraphType::Update);

    // Both the real kernel and the synthesized copy kernel live in the same
    // compute graph; the copy has no kernel dependency and runs first.
    assert_eq!(compiled.kernels.len(), 2);
    assert_eq!(compiled.kernel_nodes[0], None, "copy kernel runs first");
    assert_eq!(compiled.kernel_nodes[1].as_deref(), Some("k"));

    let values_index = provider_index(compiled, "update.values").expect("value carrier");
    let sink_b_index = provider_index(compiled, "sink_b").expect("sink_b registered");
    assert!(
        compiled
            .edges
            .iter()
            .any(|e| e.is_input && e.kernel_index == 0 && e.provider_index == values_index),
        "copy kernel reads the value carrier"
    );
    assert!(
        compiled
            .edges
            .iter()
            .any(|e| !e.is_input && e.kernel_index == 0 && e.provider_index == sink_b_index),
        "copy kernel writes sink_b"
    );

    node_forge_compute::wgsl::validate_wgsl(&compiled.kernels[0].source.source)
        .expect("copy kernel source is valid WGSL");
}

#[test]
fn interface_to_interface_link_gets_a_copy_kernel_with_fan_out() {
    // A source interface feeding two sinks directly: one copy kernel per
    // source pin, with both writes fanned out of the single read.
    let graph = update_graph(
        vec![
            source_interface("src", true),
            sink_interface("sink_a"),
            sink_interface("sink_b"),
            // A kernel elsewhere keeps the graph non-trivial and ensures the
            // copy scheduling tolerates real kernels being present.
            value_node("v", "scale_v", 1.0, true),
            scale_kernel("k"),
            sink_interface("sink_c"),
        ],
        vec![
            link("src", "data", "sink_a", "in"),
            link("src", "data", "sink_b", "in"),
            link("v", "out", "k", "scale"),
            link("k", "out", "sink_c", "in"),
        ],
    );
    let output = Compiler::default()
        .compile(&program(vec![graph]))
        .expect("compile");

    assert_eq!(output.status, CompileStatus::Compiled, "{:?}", output.diagnostics);
    assert_eq!(output.compute_graphs.len(), 1);
    let compiled = &output.compute_graphs[0];

    // One real kernel, one copy kernel (one source pin, two targets).
    assert_eq!(compiled.kernels.len(), 2);
    let copy_index = compiled
        .kernel_nodes
        .iter()
        .position(|n| n.is_none())
        .expect("copy kernel present");

    let src_index = provider_index(compiled, "src").expect("src registered");
    let copy_writes: Vec<usize> = compiled
        .edges
        .iter()
        .filter(|e| !e.is_input && e.kernel_index == copy_index)
        .map(|e| e.provider_index)
        .collect();
    assert_eq!(copy_writes.len(), 2, "one write per fan-out target");
    assert!(copy_writes.contains(&provider_index(compiled, "sink_a").expect("sink_a")));
    assert!(copy_writes.contains(&provider_index(compiled, "sink_b").expect("sink_b")));
    assert!(
        compiled
            .edges
            .iter()
            .any(|e| e.is_input && e.kernel_index == copy_index && e.provider_index == src_index),
        "copy kernel reads the source interface"
    );
}
