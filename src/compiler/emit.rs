//! Assembly of the final per-phase compute graphs: provider registration,
//! kernel binding, copy-kernel scheduling, and edge emission.

use std::collections::HashMap;

use anyhow::{Result, anyhow};

use crate::compiler::bind::BindPlan;
use crate::compiler::copy::{CopyKernelEntry, build_copy_kernel};
use crate::compiler::loops::{InstancePlan, InstancedNode};
use crate::compiler::schedule::{SchedKey, insert_copy_kernels};
use crate::compiler::CompilerConfig;
use crate::compute_graph::{BoundProvider, ComputeGraph, GraphEdge};
use crate::diag::Diagnostics;
use crate::graph::{GraphView, NodeGraph, RoutedNode};
use crate::kernel::{BindingMap, BoundKernel, KernelInvocation, create_kernel_source};
use crate::provider::ProviderId;
use crate::types::GraphType;
use crate::wgsl;

/// Per-graph provider registration: each provider appears once, in first-use
/// order, keeping indices stable for edge emission.
#[derive(Default)]
struct ProviderRegistrar {
    order: Vec<ProviderId>,
    index: HashMap<ProviderId, usize>,
}

impl ProviderRegistrar {
    fn register(&mut self, id: ProviderId) {
        if !self.index.contains_key(&id) {
            self.index.insert(id, self.order.len());
            self.order.push(id);
        }
    }

    fn index_of(&self, id: ProviderId) -> Result<usize> {
        self.index
            .get(&id)
            .copied()
            .ok_or_else(|| anyhow!("provider bound by a kernel was never registered"))
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_compute_graphs(
    config: &CompilerConfig,
    view: &GraphView,
    graph: &NodeGraph,
    instances: &InstancePlan,
    phases: &HashMap<RoutedNode, GraphType>,
    phase_order: &[GraphType],
    bind: &BindPlan,
    copies: &[CopyKernelEntry],
    diags: &mut Diagnostics,
) -> Result<Option<Vec<ComputeGraph>>> {
    let mut types: Vec<GraphType> = phase_order.to_vec();
    if !copies.is_empty() && !types.contains(&graph.graph_type) {
        types.push(graph.graph_type);
    }

    // Synthesized setup phases run before the graph's own phase.
    let mut infos: Vec<(String, GraphType)> = Vec::new();
    for ty in types {
        if ty == graph.graph_type {
            infos.push((graph.name.clone(), ty));
        } else {
            infos.insert(0, (format!("{}$Setup", graph.name), ty));
        }
    }

    let mut compute_graphs: Vec<ComputeGraph> = Vec::new();
    for (name, graph_type) in infos {
        let Some(compute_graph) = emit_one(
            config, view, graph, instances, phases, bind, copies, diags, name, graph_type,
        )?
        else {
            return Ok(None);
        };
        compute_graphs.push(compute_graph);
    }
    Ok(Some(compute_graphs))
}

#[allow(clippy::too_many_arguments)]
fn emit_one(
    config: &CompilerConfig,
    view: &GraphView,
    graph: &NodeGraph,
    instances: &InstancePlan,
    phases: &HashMap<RoutedNode, GraphType>,
    bind: &BindPlan,
    copies: &[CopyKernelEntry],
    diags: &mut Diagnostics,
    name: String,
    graph_type: GraphType,
) -> Result<Option<ComputeGraph>> {
    let include_copies = graph_type == graph.graph_type;
    let mut registrar = ProviderRegistrar::default();

    // Register every provider the phase's kernels touch, inputs before
    // outputs before the execution provider, then the copy-kernel providers.
    for instance in &instances.instances {
        if !is_phase_kernel(view, phases, instance, graph_type)? {
            continue;
        }
        for input in bind.kernel_inputs.get(instance).map(Vec::as_slice).unwrap_or(&[]) {
            registrar.register(input.provider);
        }
        for output in bind.kernel_outputs.get(instance).map(Vec::as_slice).unwrap_or(&[]) {
            for (provider, _) in &output.targets {
                registrar.register(*provider);
            }
        }
        let exec = bind
            .kernel_exec
            .get(instance)
            .copied()
            .ok_or_else(|| anyhow!("kernel instance has no execution provider"))?;
        registrar.register(exec);
    }
    if include_copies {
        for entry in copies {
            registrar.register(entry.exec);
            registrar.register(entry.read.0);
            for (_, provider, _) in &entry.writes {
                registrar.register(*provider);
            }
        }
    }

    // Bind the real kernels in instanced (execution) order.
    let mut scheduled: Vec<(BoundKernel, SchedKey)> = Vec::new();
    let mut producers: HashMap<InstancedNode, SchedKey> = HashMap::new();
    for instance in &instances.instances {
        if !is_phase_kernel(view, phases, instance, graph_type)? {
            continue;
        }
        let node = view.node(&instance.node.node)?;
        let spec = node
            .kernel
            .as_ref()
            .ok_or_else(|| anyhow!("phase kernel lost its kernel capability"))?;
        let label = instance.label();
        let inputs = bind
            .kernel_inputs
            .get(instance)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let outputs = bind
            .kernel_outputs
            .get(instance)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let exec = bind
            .kernel_exec
            .get(instance)
            .copied()
            .ok_or_else(|| anyhow!("kernel instance has no execution provider"))?;

        let (source, input_bindings, output_bindings) = match create_kernel_source(
            spec,
            &label,
            exec,
            inputs,
            outputs,
            &bind.table,
            &config.registry,
        ) {
            Ok(bound) => bound,
            Err(message) => {
                diags.error(Some(node.id.as_str()), format!("{message}, compilation aborted"));
                return Ok(None);
            }
        };

        if inputs.is_empty() || outputs.is_empty() {
            diags.error(
                Some(node.id.as_str()),
                "kernel has either no input or no output bindings, compilation aborted",
            );
            return Ok(None);
        }
        if !has_execution_binding(bind, &input_bindings) {
            diags.error(
                Some(node.id.as_str()),
                "kernel has no execution data interface connected, compilation aborted",
            );
            return Ok(None);
        }
        if config.validate_kernel_sources {
            if let Err(error) = wgsl::validate_wgsl(&source.source) {
                diags.error(
                    Some(node.id.as_str()),
                    format!("kernel '{label}' source failed validation: {error:#}, compilation aborted"),
                );
                return Ok(None);
            }
        }

        producers.insert(instance.clone(), SchedKey::Real(instance.clone()));
        for written in bind.direct_written.get(instance).map(Vec::as_slice).unwrap_or(&[]) {
            if view.node(&written.node.node)?.is_resource_interface() {
                producers
                    .entry(written.clone())
                    .or_insert(SchedKey::Real(instance.clone()));
            }
        }

        scheduled.push((
            BoundKernel {
                name: label,
                source,
                inputs: input_bindings,
                outputs: output_bindings,
                node: Some(node.id.clone()),
            },
            SchedKey::Real(instance.clone()),
        ));
    }

    if include_copies && !copies.is_empty() {
        let mut copy_kernels: Vec<BoundKernel> = Vec::new();
        for (index, entry) in copies.iter().enumerate() {
            let bound = build_copy_kernel(entry, bind, &config.registry)?;
            if config.validate_kernel_sources {
                if let Err(error) = wgsl::validate_wgsl(&bound.source.source) {
                    return Err(anyhow!("synthesized copy kernel failed validation: {error:#}"));
                }
            }
            for (target, _, _) in &entry.writes {
                if view.node(&target.node.node.node)?.is_resource_interface() {
                    producers
                        .entry(target.node.clone())
                        .or_insert(SchedKey::Copy(index));
                }
            }
            copy_kernels.push(bound);
        }
        let depends: Vec<Option<SchedKey>> = copies
            .iter()
            .map(|entry| producers.get(&entry.source.node).cloned())
            .collect();
        scheduled = insert_copy_kernels(scheduled, copy_kernels, depends)?;
    }

    // Edges, one per bound parameter slot.
    let mut edges: Vec<GraphEdge> = Vec::new();
    for (kernel_index, (kernel, _)) in scheduled.iter().enumerate() {
        push_edges(&mut edges, bind, &registrar, kernel_index, &kernel.inputs, true)?;
        push_edges(&mut edges, bind, &registrar, kernel_index, &kernel.outputs, false)?;
    }

    let providers = registrar
        .order
        .iter()
        .map(|id| BoundProvider {
            provider: bind.table.get(*id).clone(),
            binding: bind.table.binding(*id),
        })
        .collect();
    let kernel_nodes = scheduled.iter().map(|(k, _)| k.node.clone()).collect();
    let kernels = scheduled
        .into_iter()
        .map(|(k, _)| KernelInvocation {
            name: k.name,
            source: k.source,
        })
        .collect();

    Ok(Some(ComputeGraph {
        name,
        graph_type,
        bindings: view.program.bindings.clone(),
        providers,
        kernels,
        kernel_nodes,
        edges,
    }))
}

fn is_phase_kernel(
    view: &GraphView,
    phases: &HashMap<RoutedNode, GraphType>,
    instance: &InstancedNode,
    graph_type: GraphType,
) -> Result<bool> {
    if !view.node(&instance.node.node)?.is_kernel() {
        return Ok(false);
    }
    Ok(phases.get(&instance.node).copied() == Some(graph_type))
}

fn has_execution_binding(bind: &BindPlan, inputs: &BindingMap) -> bool {
    inputs
        .values()
        .any(|binding| bind.table.get(binding.provider).is_execution())
}

fn push_edges(
    edges: &mut Vec<GraphEdge>,
    bind: &BindPlan,
    registrar: &ProviderRegistrar,
    kernel_index: usize,
    bindings: &BindingMap,
    is_input: bool,
) -> Result<()> {
    for (slot, binding) in bindings {
        let provider = bind.table.get(binding.provider);
        let provider_fn_name = if is_input {
            provider.read_fns.get(binding.function).map(|f| f.name.as_str())
        } else {
            provider.write_fns.get(binding.function).map(|f| f.name.as_str())
        };
        let function_name = if provider_fn_name == Some(binding.function_name.as_str()) {
            None
        } else {
            Some(binding.function_name.clone())
        };
        edges.push(GraphEdge {
            is_input,
            kernel_index,
            kernel_binding: *slot,
            provider_index: registrar.index_of(binding.provider)?,
            provider_function: binding.function,
            function_name,
        });
    }
    Ok(())
}
