//! Diagnostic behavior: warnings keep empty success, errors clear output.

mod common;

use common::*;
use node_forge_compute::graph::{
    ComponentBinding, DataInterfaceSpec, Node, NodeGraph, Pin, PinDirection, Program, link,
};
use node_forge_compute::types::{DataType, GraphType};
use node_forge_compute::{CompileStatus, Compiler, DiagnosticLevel};

#[test]
fn missing_update_graph_is_an_error() {
    let mut setup_only = NodeGraph::new("setup", GraphType::Setup);
    setup_only.nodes = vec![sink_interface("sink")];
    let output = Compiler::default()
        .compile(&program(vec![setup_only]))
        .expect("compile");
    assert_eq!(output.status, CompileStatus::HasErrors);
    assert!(output.compute_graphs.is_empty());
    assert!(
        output
            .diagnostics
            .iter()
            .any(|d| d.level == DiagnosticLevel::Error && d.message.contains("no update graph"))
    );
}

#[test]
fn graph_without_terminals_warns_and_returns_empty_output() {
    // A source with nothing written into any sink: warning, empty result.
    let graph = update_graph(vec![source_interface("src", true)], Vec::new());
    let output = Compiler::default()
        .compile(&program(vec![graph]))
        .expect("compile");
    assert_eq!(output.status, CompileStatus::HasWarnings);
    assert!(output.compute_graphs.is_empty());
    assert!(
        output
            .diagnostics
            .iter()
            .any(|d| d.level == DiagnosticLevel::Warning
                && d.message.contains("no connected output data interface"))
    );
}

#[test]
fn empty_kernel_source_aborts_with_a_kernel_error() {
    let mut kernel = scale_kernel("k");
    if let Some(spec) = kernel.kernel.as_mut() {
        spec.source = String::new();
    }
    let graph = update_graph(
        vec![
            value_node("v", "scale_v", 2.0, true),
            kernel,
            sink_interface("sink"),
        ],
        vec![link("v", "out", "k", "scale"), link("k", "out", "sink", "in")],
    );
    let output = Compiler::default()
        .compile(&program(vec![graph]))
        .expect("compile");

    assert_eq!(output.status, CompileStatus::HasErrors);
    assert!(output.compute_graphs.is_empty(), "failed compile leaves no output");
    assert!(output.values.is_empty());
    assert_eq!(output.node_levels.get("k"), Some(&DiagnosticLevel::Error));
    assert!(
        output
            .diagnostics
            .iter()
            .any(|d| d.node.as_deref() == Some("k") && d.message.contains("no source"))
    );
}

#[test]
fn ambiguous_primary_binding_is_a_structural_error() {
    // The kernel's primary group reaches interfaces on two different
    // component bindings.
    let mut bindings_program = {
        let src_a = source_interface("src_a", true);
        let src_b = Node::new("src_b")
            .with_data_interface(DataInterfaceSpec {
                binding: 1,
                mutable: true,
            })
            .with_pins(vec![
                Pin::output("data", DataType::Float).per_element(&["vertex"]),
            ]);
        let kernel = Node::new("k")
            .with_kernel(kernel_spec(
                "Write_out(index, Read_a(index) + Read_b(index));",
            ))
            .with_pins(vec![
                Pin::group(
                    "primary",
                    PinDirection::Input,
                    vec![
                        Pin::input("a", DataType::Float).per_element(&["vertex"]),
                        Pin::input("b", DataType::Float).per_element(&["vertex"]),
                    ],
                ),
                Pin::output("out", DataType::Float).per_element(&["vertex"]),
            ]);
        let graph = update_graph(
            vec![src_a, src_b, kernel, sink_interface("sink")],
            vec![
                link("src_a", "data", "k", "a"),
                link("src_b", "data", "k", "b"),
                link("k", "out", "sink", "in"),
            ],
        );
        program(vec![graph])
    };
    bindings_program.bindings.push(ComponentBinding {
        name: "cloth".to_string(),
        component_type: "ClothMesh".to_string(),
    });

    let output = Compiler::default()
        .compile(&bindings_program)
        .expect("compile");
    assert_eq!(output.status, CompileStatus::HasErrors);
    assert!(output.compute_graphs.is_empty());
    assert!(
        output
            .diagnostics
            .iter()
            .any(|d| d.node.as_deref() == Some("k")
                && d.message.contains("component bindings"))
    );
}

#[test]
fn out_of_range_component_binding_is_reported_against_the_node() {
    let bad_sink = Node::new("sink")
        .with_data_interface(DataInterfaceSpec {
            binding: 7,
            mutable: false,
        })
        .with_pins(vec![
            Pin::input("in", DataType::Float).per_element(&["vertex"]),
        ]);
    let graph = update_graph(
        vec![
            value_node("v", "scale_v", 2.0, true),
            scale_kernel("k"),
            bad_sink,
        ],
        vec![link("v", "out", "k", "scale"), link("k", "out", "sink", "in")],
    );
    let output = Compiler::default()
        .compile(&program(vec![graph]))
        .expect("compile");
    assert_eq!(output.status, CompileStatus::HasErrors);
    assert_eq!(output.node_levels.get("sink"), Some(&DiagnosticLevel::Error));
}

#[test]
fn malformed_links_are_a_model_contract_error() {
    // A link referencing a missing pin breaks the graph-model contract and
    // surfaces as a hard error, not a diagnostic.
    let graph = update_graph(
        vec![sink_interface("sink")],
        vec![link("ghost", "out", "sink", "in")],
    );
    assert!(Compiler::default().compile(&program(vec![graph])).is_err());
}

#[test]
fn empty_program_is_accepted() {
    let output = Compiler::default()
        .compile(&Program {
            name: "asset".to_string(),
            bindings: vec![ComponentBinding {
                name: "mesh".to_string(),
                component_type: "Mesh".to_string(),
            }],
            graphs: vec![NodeGraph::new("update", GraphType::Update)],
            functions: Vec::new(),
        })
        .expect("compile");
    assert_eq!(output.status, CompileStatus::Compiled);
    assert!(output.compute_graphs.is_empty());
}
