//! Value usage classification, override chains, and property pin overrides.

mod common;

use common::*;
use node_forge_compute::graph::{DataInterfaceSpec, Node, Pin, link};
use node_forge_compute::types::DataType;
use node_forge_compute::{CompileStatus, Compiler};

#[test]
fn override_chain_resolves_to_the_root_value() {
    // c2 overrides c1; the kernel reads c1 but must bind c2's value.
    let graph = update_graph(
        vec![
            value_node("c2", "root_v", 5.0, true),
            overridable_constant("c1", "leaf_v", 1.0),
            scale_kernel("k"),
            sink_interface("sink"),
        ],
        vec![
            link("c2", "out", "c1", "override"),
            link("c1", "out", "k", "scale"),
            link("k", "out", "sink", "in"),
        ],
    );
    let output = Compiler::default()
        .compile(&program(vec![graph]))
        .expect("compile");

    assert_eq!(output.status, CompileStatus::Compiled, "{:?}", output.diagnostics);
    // Only the root of the override chain is emitted.
    assert!(output.values.contains_key("root_v"));
    assert!(!output.values.contains_key("leaf_v"));
    assert!(output.values["root_v"].usage.device);

    let compiled = &output.compute_graphs[0];
    let carrier = provider_named(compiled, "update.values");
    assert_eq!(carrier.provider.read_fns.len(), 1);
    assert_eq!(carrier.provider.read_fns[0].name, "Read_root_v");
}

#[test]
fn value_on_a_property_pin_stays_host_side() {
    // A sink with a host-side property pin driven by a value node: no copy
    // kernel, host usage, and a recorded override.
    let sink = Node::new("sink")
        .with_data_interface(DataInterfaceSpec {
            binding: 0,
            mutable: false,
        })
        .with_property_pins(&["limit"])
        .with_pins(vec![
            Pin::input("in", DataType::Float).per_element(&["vertex"]),
            Pin::input("limit", DataType::Float),
        ]);
    let graph = update_graph(
        vec![
            value_node("v", "limit_v", 8.0, true),
            value_node("s", "scale_v", 2.0, true),
            scale_kernel("k"),
            sink,
        ],
        vec![
            link("s", "out", "k", "scale"),
            link("k", "out", "sink", "in"),
            link("v", "out", "sink", "limit"),
        ],
    );
    let output = Compiler::default()
        .compile(&program(vec![graph]))
        .expect("compile");

    assert_eq!(output.status, CompileStatus::Compiled, "{:?}", output.diagnostics);
    let description = output.values.get("limit_v").expect("property value emitted");
    assert!(description.usage.host);
    assert!(!description.usage.device);
    assert!(description.value.is_some());
    assert!(description.shader_bytes.is_none());

    assert_eq!(
        output.property_overrides["sink"]["limit"],
        "limit_v".to_string()
    );

    // No copy kernel: the one kernel in the graph is the real one.
    let compiled = &output.compute_graphs[0];
    assert_eq!(compiled.kernels.len(), 1);
    assert_eq!(compiled.kernel_nodes[0].as_deref(), Some("k"));
    // The property value never joins the device-side carrier.
    let carrier = provider_named(compiled, "update.values");
    assert!(carrier.provider.read_fns.iter().all(|f| f.name != "Read_limit_v"));
}

#[test]
fn unreferenced_values_are_dropped_silently() {
    // A value node connected to nothing does not reach any terminal and is
    // excluded from the output without a diagnostic.
    let graph = update_graph(
        vec![
            value_node("dangling", "unused_v", 3.0, true),
            value_node("s", "scale_v", 2.0, true),
            scale_kernel("k"),
            sink_interface("sink"),
        ],
        vec![link("s", "out", "k", "scale"), link("k", "out", "sink", "in")],
    );
    let output = Compiler::default()
        .compile(&program(vec![graph]))
        .expect("compile");

    assert_eq!(output.status, CompileStatus::Compiled, "{:?}", output.diagnostics);
    assert!(!output.values.contains_key("unused_v"));
    assert!(output.values.contains_key("scale_v"));
}

#[test]
fn value_shared_by_two_graphs_merges_usage() {
    // The same identifier used on the device in the update graph and
    // host-side in a trigger graph keeps both payloads.
    let update = update_graph(
        vec![
            value_node("v1", "shared_v", 2.0, true),
            scale_kernel("k"),
            sink_interface("sink"),
        ],
        vec![link("v1", "out", "k", "scale"), link("k", "out", "sink", "in")],
    );

    let trigger_sink = Node::new("tsink")
        .with_data_interface(DataInterfaceSpec {
            binding: 0,
            mutable: false,
        })
        .with_property_pins(&["limit"])
        .with_pins(vec![
            Pin::input("in", DataType::Float).per_element(&["vertex"]),
            Pin::input("limit", DataType::Float),
        ]);
    let mut trigger = node_forge_compute::graph::NodeGraph::new(
        "on_demand",
        node_forge_compute::types::GraphType::Trigger,
    );
    trigger.nodes = vec![
        value_node("v2", "shared_v", 2.0, true),
        value_node("s2", "scale2_v", 1.0, true),
        scale_kernel("k2"),
        trigger_sink,
    ];
    trigger.links = vec![
        link("s2", "out", "k2", "scale"),
        link("k2", "out", "tsink", "in"),
        link("v2", "out", "tsink", "limit"),
    ];

    let output = Compiler::default()
        .compile(&program(vec![update, trigger]))
        .expect("compile");

    assert_eq!(output.status, CompileStatus::Compiled, "{:?}", output.diagnostics);
    let shared = output.values.get("shared_v").expect("merged value");
    assert!(shared.usage.device && shared.usage.host);
    assert!(shared.shader_bytes.is_some());
    assert!(shared.value.is_some());
}
