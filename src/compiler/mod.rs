//! The compile pass: from a node-graph snapshot to ordered compute graphs.
//!
//! Compilation is one synchronous walk over an immutable [`Program`]: collect
//! the contributing nodes behind each terminal sink, unroll loops into
//! per-iteration instances, classify intermediate buffers, synthesize copy
//! kernels where non-kernel providers meet, schedule, and emit one
//! [`ComputeGraph`] per execution phase that has work. User-facing problems
//! become [`Diagnostic`]s in the output; an `Err` from [`Compiler::compile`]
//! means a compiler invariant broke, not that the graph was bad.

mod bind;
mod collect;
mod copy;
mod emit;
mod loops;
mod schedule;
mod values;

use std::collections::HashMap;

use anyhow::Result;

use crate::compute_graph::ComputeGraph;
use crate::diag::{CompileStatus, Diagnostic, DiagnosticLevel, Diagnostics};
use crate::graph::{
    GraphView, LoopTerminalKind, Node, NodeGraph, PinDirection, Program, RoutedNode,
};
use crate::types::{DataType, DataTypeRegistry, GraphType, Value, ValueUsage};

/// Explicit configuration for one compiler instance; nothing here is global
/// process state.
#[derive(Clone, Debug, Default)]
pub struct CompilerConfig {
    pub registry: DataTypeRegistry,
    /// Run naga over every generated kernel source during compilation.
    /// Always available separately through [`crate::wgsl::validate_wgsl`].
    pub validate_kernel_sources: bool,
}

/// Host/device description of one named value referenced by the compiled
/// graphs.
#[derive(Clone, Debug)]
pub struct ValueDescription {
    pub data_type: DataType,
    pub usage: ValueUsage,
    /// Present when the value is consumed host-side.
    pub value: Option<Value>,
    /// Shader-encoded payload, present when the value is consumed on the
    /// device.
    pub shader_bytes: Option<Vec<u8>>,
}

/// Everything one compile pass produces. On error the compute graphs, value
/// map, and overrides are empty; the diagnostics and per-node levels always
/// describe what happened.
#[derive(Debug, Default)]
pub struct CompileOutput {
    pub status: CompileStatus,
    pub compute_graphs: Vec<ComputeGraph>,
    pub values: HashMap<String, ValueDescription>,
    /// Data-interface node id → (property pin id → value identifier), for
    /// host-side property overrides that never touch the GPU.
    pub property_overrides: HashMap<String, HashMap<String, String>>,
    pub diagnostics: Vec<Diagnostic>,
    pub node_levels: HashMap<String, DiagnosticLevel>,
}

pub struct Compiler {
    config: CompilerConfig,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new(CompilerConfig::default())
    }
}

#[derive(Default)]
struct GraphResult {
    compute_graphs: Vec<ComputeGraph>,
    values: HashMap<String, ValueDescription>,
    property_overrides: HashMap<String, HashMap<String, String>>,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Compiler {
        Compiler { config }
    }

    /// Compile every setup/update/trigger graph of the program. The caller
    /// must not mutate the program for the duration of the call; any
    /// previously compiled output should be discarded before inspecting the
    /// fresh one, so a failed recompile leaves "no compiled output" rather
    /// than stale plans.
    pub fn compile(&self, program: &Program) -> Result<CompileOutput> {
        let mut diags = Diagnostics::default();
        let mut output = CompileOutput::default();

        if !program
            .graphs
            .iter()
            .any(|g| g.graph_type == GraphType::Update)
        {
            diags.error(None, "no update graph found, compilation aborted");
            let (diagnostics, node_levels, status) = diags.into_parts();
            output.diagnostics = diagnostics;
            output.node_levels = node_levels;
            output.status = status;
            return Ok(output);
        }

        let view = GraphView::new(program)?;
        for graph in &program.graphs {
            if !graph.graph_type.is_compiled() {
                continue;
            }
            let result = self.compile_graph(&view, graph, &mut diags)?;
            output.compute_graphs.extend(result.compute_graphs);
            for (identifier, description) in result.values {
                merge_value(&mut output.values, identifier, description);
            }
            for (provider, overrides) in result.property_overrides {
                output
                    .property_overrides
                    .entry(provider)
                    .or_default()
                    .extend(overrides);
            }
        }

        let (diagnostics, node_levels, status) = diags.into_parts();
        output.diagnostics = diagnostics;
        output.node_levels = node_levels;
        output.status = status;
        if status == CompileStatus::HasErrors {
            output.compute_graphs.clear();
            output.values.clear();
            output.property_overrides.clear();
        }
        Ok(output)
    }

    fn compile_graph(
        &self,
        view: &GraphView,
        graph: &NodeGraph,
        diags: &mut Diagnostics,
    ) -> Result<GraphResult> {
        if graph.nodes.is_empty() {
            return Ok(GraphResult::default());
        }

        // Terminal sinks seed collection; a graph that writes nothing is a
        // null graph, not an error.
        let terminals: Vec<&Node> = graph
            .nodes
            .iter()
            .filter(|node| is_terminal(view, node))
            .collect();
        if terminals.is_empty() {
            diags.warning(
                None,
                format!(
                    "no connected output data interface nodes found, compilation for graph '{}' aborted",
                    graph.name
                ),
            );
            return Ok(GraphResult::default());
        }

        let collected = collect::collect_nodes(view, &terminals)?;

        let mut validation_failed = false;
        for routed in &collected.order {
            if let Some(message) = validate_for_compile(&self.config, view, routed)? {
                validation_failed = true;
                diags.error(Some(routed.node.as_str()), message);
            }
        }
        if validation_failed {
            return Ok(GraphResult::default());
        }

        let loop_plan = loops::plan_loops(view, &collected)?;
        let (phases, phase_order) = assign_phases(view, graph, &collected)?;
        let instances = loops::instance_nodes(view, &collected, &loop_plan)?;
        let analysis = values::propagate_value_usage(view, &collected)?;

        let Some(mut bound) = bind::bind_providers(
            &self.config,
            view,
            graph,
            &collected,
            &instances,
            &analysis,
            &phases,
            diags,
        )?
        else {
            return Ok(GraphResult::default());
        };

        let copies = copy::plan_copy_kernels(view, &mut bound, &analysis)?;

        let Some(compute_graphs) = emit::emit_compute_graphs(
            &self.config,
            view,
            graph,
            &instances,
            &phases,
            &phase_order,
            &bound,
            &copies,
            diags,
        )?
        else {
            return Ok(GraphResult::default());
        };

        Ok(GraphResult {
            compute_graphs,
            values: bound.values,
            property_overrides: bound.property_overrides,
        })
    }
}

/// A terminal is a data-interface sink: something writes into it and nothing
/// reads out of it.
fn is_terminal(view: &GraphView, node: &Node) -> bool {
    if !node.is_data_interface() {
        return false;
    }
    let mut connected_input = false;
    for pin in node.pins_by_direction(PinDirection::Input, true) {
        if !pin.is_grouping() && view.has_raw_sources(&node.id, &pin.id) {
            connected_input = true;
        }
    }
    for pin in node.pins_by_direction(PinDirection::Output, true) {
        if !pin.is_grouping() && view.has_raw_consumers(&node.id, &pin.id) {
            return false;
        }
    }
    connected_input
}

/// Per-kernel execution phase. Non-update graphs keep their own phase; in an
/// update graph, a kernel whose transitive inputs never change between
/// executions is hoisted into the synthesized setup phase.
fn assign_phases(
    view: &GraphView,
    graph: &NodeGraph,
    collected: &collect::CollectedGraph,
) -> Result<(HashMap<RoutedNode, GraphType>, Vec<GraphType>)> {
    let mut phases: HashMap<RoutedNode, GraphType> = HashMap::new();
    let mut order: Vec<GraphType> = Vec::new();
    for routed in &collected.order {
        if !view.node(&routed.node)?.is_kernel() {
            continue;
        }
        let phase = if graph.graph_type != GraphType::Update {
            graph.graph_type
        } else if has_mutable_input(view, collected, routed)? {
            GraphType::Update
        } else {
            GraphType::Setup
        };
        phases.insert(routed.clone(), phase);
        if !order.contains(&phase) {
            order.push(phase);
        }
    }
    Ok((phases, order))
}

fn has_mutable_input(
    view: &GraphView,
    collected: &collect::CollectedGraph,
    start: &RoutedNode,
) -> Result<bool> {
    let mut visited: std::collections::HashSet<RoutedNode> = std::collections::HashSet::new();
    let mut queue: Vec<RoutedNode> = vec![start.clone()];
    while let Some(current) = queue.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        for input in collected.inputs_of(&current) {
            let node = view.node(&input.node)?;
            if node.data_interface.as_ref().is_some_and(|i| i.mutable) {
                return Ok(true);
            }
            if node.value.as_ref().is_some_and(|v| v.variable) {
                return Ok(true);
            }
            queue.push(input.clone());
        }
    }
    Ok(false)
}

/// Per-node structural validation, run over the collected set before any
/// transformation. Returns the first problem found for the node.
fn validate_for_compile(
    config: &CompilerConfig,
    view: &GraphView,
    routed: &RoutedNode,
) -> Result<Option<String>> {
    let node = view.node(&routed.node)?;

    if let Some(kernel) = &node.kernel {
        let Some(group) = node.find_pin(&kernel.primary_group) else {
            return Ok(Some(format!(
                "kernel '{}' has no primary group pin '{}'",
                node.id, kernel.primary_group
            )));
        };
        if !group.is_grouping() {
            return Ok(Some(format!(
                "kernel '{}' primary pin '{}' is not a grouping pin",
                node.id, kernel.primary_group
            )));
        }
        for pin in node.pins_by_direction(PinDirection::Output, true) {
            if pin.is_grouping() {
                continue;
            }
            if pin.domain.is_singleton() {
                return Ok(Some(format!(
                    "kernel '{}' output '{}' must be per-element",
                    node.id, pin.id
                )));
            }
        }
        for direction in [PinDirection::Input, PinDirection::Output] {
            for pin in node.pins_by_direction(direction, true) {
                if pin.is_grouping() {
                    continue;
                }
                let Some(data_type) = pin.data_type else {
                    return Ok(Some(format!(
                        "kernel '{}' pin '{}' has no data type",
                        node.id, pin.id
                    )));
                };
                if !config.registry.is_registered(data_type) {
                    return Ok(Some(format!(
                        "kernel '{}' pin '{}' uses unregistered data type {data_type:?}",
                        node.id, pin.id
                    )));
                }
            }
        }
    }

    if let Some(value) = &node.value {
        let outputs: Vec<_> = node
            .pins_by_direction(PinDirection::Output, true)
            .into_iter()
            .filter(|p| !p.is_grouping())
            .collect();
        if outputs.len() != 1 {
            return Ok(Some(format!(
                "value node '{}' must have exactly one output pin",
                node.id
            )));
        }
        if !config.registry.is_registered(value.value.data_type()) {
            return Ok(Some(format!(
                "value node '{}' uses unregistered data type {:?}",
                node.id,
                value.value.data_type()
            )));
        }
    }

    if let Some(interface) = &node.data_interface {
        if interface.binding >= view.program.bindings.len() {
            return Ok(Some(format!(
                "data interface '{}' references component binding {} but only {} exist",
                node.id,
                interface.binding,
                view.program.bindings.len()
            )));
        }
    }

    if let Some(terminal) = &node.loop_terminal {
        let pair = view.node(&terminal.pair_node);
        let Ok(pair) = pair else {
            return Ok(Some(format!(
                "loop terminal '{}' pairs missing node '{}'",
                node.id, terminal.pair_node
            )));
        };
        let Some(pair_spec) = &pair.loop_terminal else {
            return Ok(Some(format!(
                "loop terminal '{}' pairs non-terminal node '{}'",
                node.id, terminal.pair_node
            )));
        };
        let reciprocal = pair_spec.pair_node == node.id;
        let opposite = match terminal.kind {
            LoopTerminalKind::Entry => pair_spec.kind == LoopTerminalKind::Return,
            LoopTerminalKind::Return => pair_spec.kind == LoopTerminalKind::Entry,
        };
        if !reciprocal || !opposite {
            return Ok(Some(format!(
                "loop terminal pairing between '{}' and '{}' is inconsistent",
                node.id, terminal.pair_node
            )));
        }
    }

    if let Some(subgraph) = &node.subgraph {
        if !view.subgraph_ports_present(&subgraph.graph) {
            return Ok(Some(format!(
                "subgraph reference '{}' targets graph '{}' without entry/return ports",
                node.id, subgraph.graph
            )));
        }
    }

    Ok(None)
}

/// Usage-union merge across graphs: the first graph to demand a side supplies
/// that side's payload.
fn merge_value(
    values: &mut HashMap<String, ValueDescription>,
    identifier: String,
    description: ValueDescription,
) {
    match values.entry(identifier) {
        std::collections::hash_map::Entry::Occupied(mut existing) => {
            let existing = existing.get_mut();
            if description.usage.host && !existing.usage.host {
                existing.usage.host = true;
                existing.value = description.value;
            }
            if description.usage.device && !existing.usage.device {
                existing.usage.device = true;
                existing.shader_bytes = description.shader_bytes;
            }
        }
        std::collections::hash_map::Entry::Vacant(slot) => {
            slot.insert(description);
        }
    }
}
