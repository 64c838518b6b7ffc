//! Provider realization and kernel binding: data-interface providers, the
//! graph value carrier, per-iteration loop providers, buffer strategy
//! classification for kernel outputs, and collection of the links that need
//! a synthesized copy kernel.

use std::collections::{HashMap, HashSet};

use anyhow::{Result, anyhow};

use crate::compiler::collect::CollectedGraph;
use crate::compiler::loops::{InstancePlan, InstancedNode, InstancedPin};
use crate::compiler::values::{ValueAnalysis, root_value_identifier};
use crate::compiler::{CompilerConfig, ValueDescription};
use crate::diag::Diagnostics;
use crate::graph::{GraphView, KernelSpec, NodeGraph, PinDirection, RoutedNode};
use crate::kernel::{KernelInput, KernelOutput};
use crate::provider::{
    DataProvider, ProviderId, ProviderTable, interface_read_index, interface_write_index,
};
use crate::types::{DataType, GraphType};

/// Links that must be bridged by synthesized copy kernels, keyed by source
/// pin in first-use order. One copy kernel per source pin.
#[derive(Default)]
pub(crate) struct CopyLinkSet {
    pub order: Vec<InstancedPin>,
    pub targets: HashMap<InstancedPin, Vec<InstancedPin>>,
}

impl CopyLinkSet {
    fn add(&mut self, source: InstancedPin, target: InstancedPin) {
        let list = self.targets.entry(source.clone()).or_default();
        if list.is_empty() {
            self.order.push(source);
        }
        list.push(target);
    }
}

/// Everything the emitter needs about providers and kernel wiring.
pub(crate) struct BindPlan {
    pub table: ProviderTable,
    pub node_providers: HashMap<RoutedNode, ProviderId>,
    pub loop_providers: HashMap<RoutedNode, Vec<ProviderId>>,
    pub graph_values: ProviderId,
    pub gpu_value_fn: HashMap<String, usize>,
    pub values: HashMap<String, ValueDescription>,
    pub kernel_exec: HashMap<InstancedNode, ProviderId>,
    pub kernel_inputs: HashMap<InstancedNode, Vec<KernelInput>>,
    pub kernel_outputs: HashMap<InstancedNode, Vec<KernelOutput>>,
    pub output_buffers: HashMap<InstancedPin, ProviderId>,
    /// Interfaces a kernel writes without an intermediate buffer; readers of
    /// those interfaces must schedule after the writer.
    pub direct_written: HashMap<InstancedNode, Vec<InstancedNode>>,
    pub copy_links: CopyLinkSet,
    pub property_overrides: HashMap<String, HashMap<String, String>>,
}

/// What consumes one kernel output pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConsumerKind {
    Interface,
    Kernel { phase: GraphType },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BufferDecision {
    pub needs_buffer: bool,
    pub persistent: bool,
    pub copy_to_interface: bool,
    pub zero_init: bool,
}

/// Decide the buffer strategy for one kernel output pin against the full set
/// of its consumers. Pure, so reclassification is trivially idempotent.
pub(crate) fn classify_output(
    readback: bool,
    atomic: bool,
    graph_type: GraphType,
    producer_phase: GraphType,
    consumers: &[ConsumerKind],
) -> BufferDecision {
    let mut decision = BufferDecision {
        needs_buffer: false,
        persistent: false,
        copy_to_interface: false,
        zero_init: atomic,
    };
    if readback || atomic {
        decision.needs_buffer = true;
        decision.copy_to_interface = true;
    }
    for consumer in consumers {
        match consumer {
            ConsumerKind::Interface => {
                // A setup-phase kernel feeding a sink of an update graph must
                // survive until the update graph runs, then be copied in.
                if graph_type == GraphType::Update && producer_phase == GraphType::Setup {
                    decision.needs_buffer = true;
                    decision.persistent = true;
                    decision.copy_to_interface = true;
                }
            }
            ConsumerKind::Kernel { phase } => {
                decision.needs_buffer = true;
                if *phase != producer_phase {
                    decision.persistent = true;
                }
            }
        }
    }
    if !decision.needs_buffer {
        decision.zero_init = false;
    }
    decision
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn bind_providers(
    config: &CompilerConfig,
    view: &GraphView,
    graph: &NodeGraph,
    collected: &CollectedGraph,
    instances: &InstancePlan,
    analysis: &ValueAnalysis,
    phases: &HashMap<RoutedNode, GraphType>,
    diags: &mut Diagnostics,
) -> Result<Option<BindPlan>> {
    let mut table = ProviderTable::default();
    let mut node_providers: HashMap<RoutedNode, ProviderId> = HashMap::new();
    let mut loop_providers: HashMap<RoutedNode, Vec<ProviderId>> = HashMap::new();

    // Realize data-interface nodes and per-iteration loop providers.
    for routed in &collected.order {
        let node = view.node(&routed.node)?;
        if let Some(spec) = &node.data_interface {
            let id = table.add(DataProvider::from_interface_node(node), spec.binding);
            node_providers.insert(routed.clone(), id);
        } else if let Some(spec) = &node.loop_terminal {
            if spec.kind == crate::graph::LoopTerminalKind::Entry {
                let mut per_iteration = Vec::new();
                for index in 0..spec.count {
                    let name = format!("{}.iteration{index}", routed.label());
                    let id = table.add(
                        DataProvider::loop_iteration(&name, index, spec.count),
                        PRIMARY_BINDING,
                    );
                    per_iteration.push(id);
                }
                loop_providers.insert(routed.clone(), per_iteration);
            }
        }
    }

    // Fold active values into per-identifier descriptions; device-used
    // values also join the graph value carrier, once each.
    let mut values: HashMap<String, ValueDescription> = HashMap::new();
    let mut gpu_values: Vec<(String, DataType)> = Vec::new();
    for node_id in &analysis.active {
        let node = view.node(node_id)?;
        let Some(spec) = &node.value else {
            continue;
        };
        let usage = analysis.usage.get(node_id).copied().unwrap_or_default();
        if usage.is_empty() {
            // Unreferenced value; dropped from the output without complaint.
            continue;
        }
        let description = values
            .entry(spec.identifier.clone())
            .or_insert_with(|| ValueDescription {
                data_type: spec.value.data_type(),
                usage: Default::default(),
                value: None,
                shader_bytes: None,
            });
        description.usage = description.usage.union(usage);
        if description.usage.host && description.value.is_none() {
            description.value = Some(spec.value.clone());
        }
        if description.usage.device && description.shader_bytes.is_none() {
            description.shader_bytes = Some(spec.value.shader_bytes());
            gpu_values.push((spec.identifier.clone(), spec.value.data_type()));
        }
    }
    let gpu_value_fn: HashMap<String, usize> = gpu_values
        .iter()
        .enumerate()
        .map(|(index, (identifier, _))| (identifier.clone(), index))
        .collect();
    let graph_values = table.add(
        DataProvider::graph_values(&graph.name, &gpu_values),
        PRIMARY_BINDING,
    );

    let mut bind = BindPlan {
        table,
        node_providers,
        loop_providers,
        graph_values,
        gpu_value_fn,
        values,
        kernel_exec: HashMap::new(),
        kernel_inputs: HashMap::new(),
        kernel_outputs: HashMap::new(),
        output_buffers: HashMap::new(),
        direct_written: HashMap::new(),
        copy_links: CopyLinkSet::default(),
        property_overrides: HashMap::new(),
    };

    // Links where a value or interface feeds an interface with no kernel in
    // between need a copy kernel; value-to-property-pin links stay host-side.
    for source in &instances.source_order {
        let source_node = view.node(&source.node.node.node)?;
        for target in instances.consumers_of(source) {
            let target_node = view.node(&target.node.node.node)?;
            if !target_node.is_data_interface() {
                continue;
            }
            if source_node.is_data_interface() {
                bind.copy_links.add(source.clone(), target.clone());
            } else if source_node.is_value() {
                if target_node.property_pins.contains(&target.pin) {
                    continue;
                }
                bind.copy_links.add(source.clone(), target.clone());
            }
        }
    }

    for instance in &instances.instances {
        let node = view.node(&instance.node.node)?;

        if let Some(kernel) = &node.kernel {
            if !bind_kernel_instance(
                config, view, graph, instances, analysis, phases, diags, &mut bind, instance,
                node.id.as_str(), kernel,
            )? {
                return Ok(None);
            }
        }

        if !node.property_pins.is_empty() && node.is_data_interface() {
            for pin_id in &node.property_pins {
                let target = InstancedPin {
                    node: instance.clone(),
                    pin: pin_id.clone(),
                };
                let Some(source) = instances.sources.get(&target) else {
                    continue;
                };
                let source_node = view.node(&source.node.node.node)?;
                if source_node.is_value() {
                    let identifier =
                        root_value_identifier(view, &analysis.overrides, &source.node.node)?;
                    bind.property_overrides
                        .entry(node.id.clone())
                        .or_default()
                        .insert(pin_id.clone(), identifier);
                }
            }
        }
    }

    Ok(Some(bind))
}

/// Component bindings are indexed into the program's binding list; index 0
/// is the primary binding that graph-level providers attach to.
pub(crate) const PRIMARY_BINDING: usize = 0;

#[allow(clippy::too_many_arguments)]
fn bind_kernel_instance(
    config: &CompilerConfig,
    view: &GraphView,
    graph: &NodeGraph,
    instances: &InstancePlan,
    analysis: &ValueAnalysis,
    phases: &HashMap<RoutedNode, GraphType>,
    diags: &mut Diagnostics,
    bind: &mut BindPlan,
    instance: &InstancedNode,
    node_id: &str,
    kernel: &KernelSpec,
) -> Result<bool> {
    let node = view.node(&instance.node.node)?;

    // The kernel's primary group must resolve to exactly one component
    // binding; it decides the execution domain's element count.
    let bindings = primary_bindings(view, instances, instance, kernel)?;
    if bindings.len() != 1 {
        diags.error(
            Some(node_id),
            format!(
                "missing or multiple component bindings found in primary group of kernel '{node_id}', compilation aborted"
            ),
        );
        return Ok(false);
    }
    let primary = bindings
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("primary binding set emptied unexpectedly"))?;

    let producer_phase = phases
        .get(&instance.node)
        .copied()
        .ok_or_else(|| anyhow!("kernel '{node_id}' has no phase assignment"))?;

    let exec_name = format!("{}.execution", instance.label());
    let domain = node
        .find_pin(&kernel.primary_group)
        .and_then(|group| group.sub_pins.iter().find(|p| !p.domain.is_singleton()))
        .map(|p| p.domain.expression())
        .unwrap_or_default();
    let exec = bind
        .table
        .add(DataProvider::kernel_execution(&exec_name, &domain), primary);
    bind.kernel_exec.insert(instance.clone(), exec);

    // Inputs.
    let mut inputs: Vec<KernelInput> = Vec::new();
    for pin in node.pins_by_direction(PinDirection::Input, true) {
        if pin.is_grouping() {
            continue;
        }
        let target = InstancedPin {
            node: instance.clone(),
            pin: pin.id.clone(),
        };
        let Some(source) = instances.sources.get(&target) else {
            continue;
        };
        let source_node = view.node(&source.node.node.node)?;

        if source_node.is_value() {
            let identifier = root_value_identifier(view, &analysis.overrides, &source.node.node)?;
            if let Some(&function) = bind.gpu_value_fn.get(&identifier) {
                inputs.push(KernelInput {
                    pin: pin.id.clone(),
                    provider: bind.graph_values,
                    function,
                });
            }
        } else if let Some(&provider) = bind.node_providers.get(&source.node.node) {
            let function = interface_read_index(source_node, &source.pin).ok_or_else(|| {
                anyhow!(
                    "pin {}.{} missing from interface provider functions",
                    source.node.node.node,
                    source.pin
                )
            })?;
            inputs.push(KernelInput {
                pin: pin.id.clone(),
                provider,
                function,
            });
        } else if let Some(&provider) = bind.output_buffers.get(source) {
            inputs.push(KernelInput {
                pin: pin.id.clone(),
                provider,
                function: DataProvider::BUFFER_READ_FN,
            });
        } else if source_node.is_loop_terminal() && pin.domain.is_singleton() {
            if let Some(per_iteration) = bind.loop_providers.get(&source.node.node) {
                if per_iteration.is_empty() {
                    continue;
                }
                let spec = source_node
                    .loop_terminal
                    .as_ref()
                    .ok_or_else(|| anyhow!("loop provider exists for a non-terminal node"))?;
                let function = if spec.index_pin.as_deref() == Some(source.pin.as_str()) {
                    DataProvider::LOOP_INDEX_FN
                } else if spec.count_pin.as_deref() == Some(source.pin.as_str()) {
                    DataProvider::LOOP_COUNT_FN
                } else {
                    continue;
                };
                let index = (instance.iteration as usize).min(per_iteration.len() - 1);
                inputs.push(KernelInput {
                    pin: pin.id.clone(),
                    provider: per_iteration[index],
                    function,
                });
            }
        }
    }

    // Outputs: classify each pin against its consumers, create at most one
    // buffer per (instance, pin), then route interface targets either
    // directly or through a copy kernel.
    let mut outputs: Vec<KernelOutput> = Vec::new();
    for pin in node.pins_by_direction(PinDirection::Output, true) {
        if pin.is_grouping() {
            continue;
        }
        let source = InstancedPin {
            node: instance.clone(),
            pin: pin.id.clone(),
        };
        let readback = kernel.readback_outputs.contains(&pin.id);
        let atomic = kernel.atomic_outputs.contains(&pin.id);

        let mut consumer_kinds: Vec<ConsumerKind> = Vec::new();
        let mut interface_targets: Vec<InstancedPin> = Vec::new();
        for target in instances.consumers_of(&source) {
            let target_node = view.node(&target.node.node.node)?;
            if target_node.is_data_interface() {
                consumer_kinds.push(ConsumerKind::Interface);
                interface_targets.push(target.clone());
            } else if target_node.is_kernel() {
                let phase = phases
                    .get(&target.node.node)
                    .copied()
                    .ok_or_else(|| anyhow!("consumer kernel has no phase assignment"))?;
                consumer_kinds.push(ConsumerKind::Kernel { phase });
            }
        }

        let decision = classify_output(
            readback,
            atomic,
            graph.graph_type,
            producer_phase,
            &consumer_kinds,
        );

        let data_type = pin.data_type.ok_or_else(|| {
            anyhow!("kernel output {}.{} has no data type", node_id, pin.id)
        })?;
        if !config.registry.is_registered(data_type) {
            diags.error(
                Some(node_id),
                format!(
                    "kernel '{node_id}' output '{}' uses unregistered data type {data_type:?}, compilation aborted",
                    pin.id
                ),
            );
            return Ok(false);
        }

        let mut targets: Vec<(ProviderId, usize)> = Vec::new();
        if decision.needs_buffer {
            let name = format!("{}.{}", instance.label(), pin.id);
            let provider = DataProvider::buffer(&name, data_type, decision.persistent, decision.zero_init);
            let id = bind.table.add(provider, primary);
            bind.output_buffers.insert(source.clone(), id);
            // Every connected kernel reads this one buffer instance.
            targets.push((id, DataProvider::BUFFER_WRITE_FN));
        }
        for target in interface_targets {
            if decision.copy_to_interface {
                bind.copy_links.add(source.clone(), target);
            } else {
                let target_node = view.node(&target.node.node.node)?;
                let Some(&provider) = bind.node_providers.get(&target.node.node) else {
                    continue;
                };
                let function = interface_write_index(target_node, &target.pin).ok_or_else(|| {
                    anyhow!(
                        "pin {}.{} missing from interface provider functions",
                        target.node.node.node,
                        target.pin
                    )
                })?;
                targets.push((provider, function));
                bind.direct_written
                    .entry(instance.clone())
                    .or_default()
                    .push(target.node.clone());
            }
        }
        if !targets.is_empty() {
            outputs.push(KernelOutput {
                pin: pin.id.clone(),
                data_type,
                targets,
            });
        }
    }

    bind.kernel_inputs.insert(instance.clone(), inputs);
    bind.kernel_outputs.insert(instance.clone(), outputs);
    Ok(true)
}

/// Collect the component bindings reachable from a kernel's primary group:
/// interface sources contribute their binding, kernel sources contribute
/// their own primary group recursively. A kernel whose primary group reaches
/// no interface at all (e.g. it only reads values) inherits the binding of
/// the interfaces it writes instead.
fn primary_bindings(
    view: &GraphView,
    instances: &InstancePlan,
    instance: &InstancedNode,
    kernel: &KernelSpec,
) -> Result<HashSet<usize>> {
    let mut out: HashSet<usize> = HashSet::new();
    let mut visited: HashSet<InstancedNode> = HashSet::new();
    let mut queue: Vec<(InstancedNode, String)> = vec![(instance.clone(), kernel.primary_group.clone())];
    visited.insert(instance.clone());

    while let Some((current, group_pin)) = queue.pop() {
        let node = view.node(&current.node.node)?;
        let Some(group) = node.find_pin(&group_pin) else {
            continue;
        };
        for sub in &group.sub_pins {
            let target = InstancedPin {
                node: current.clone(),
                pin: sub.id.clone(),
            };
            let Some(source) = instances.sources.get(&target) else {
                continue;
            };
            let source_node = view.node(&source.node.node.node)?;
            if let Some(interface) = &source_node.data_interface {
                out.insert(interface.binding);
            } else if let Some(source_kernel) = &source_node.kernel {
                if visited.insert(source.node.clone()) {
                    queue.push((source.node.clone(), source_kernel.primary_group.clone()));
                }
            }
        }
    }
    if !out.is_empty() {
        return Ok(out);
    }

    // Fallback: walk downstream through consumers to the interfaces this
    // kernel ultimately writes.
    let mut visited: HashSet<InstancedNode> = HashSet::new();
    let mut queue: Vec<InstancedNode> = vec![instance.clone()];
    visited.insert(instance.clone());
    while let Some(current) = queue.pop() {
        let node = view.node(&current.node.node)?;
        for pin in node.pins_by_direction(PinDirection::Output, true) {
            if pin.is_grouping() {
                continue;
            }
            let source = InstancedPin {
                node: current.clone(),
                pin: pin.id.clone(),
            };
            for target in instances.consumers_of(&source) {
                let target_node = view.node(&target.node.node.node)?;
                if let Some(interface) = &target_node.data_interface {
                    out.insert(interface.binding);
                } else if target_node.is_kernel() && visited.insert(target.node.clone()) {
                    queue.push(target.node.clone());
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_idempotent_and_matches_rules() {
        let consumers = [
            ConsumerKind::Interface,
            ConsumerKind::Kernel {
                phase: GraphType::Update,
            },
        ];
        let first = classify_output(false, false, GraphType::Update, GraphType::Update, &consumers);
        let second = classify_output(false, false, GraphType::Update, GraphType::Update, &consumers);
        assert_eq!(first, second);
        // Same-phase kernel consumer: transient buffer, direct sink write.
        assert!(first.needs_buffer);
        assert!(!first.persistent);
        assert!(!first.copy_to_interface);
    }

    #[test]
    fn setup_feeding_update_sink_is_persistent_and_copied() {
        let decision = classify_output(
            false,
            false,
            GraphType::Update,
            GraphType::Setup,
            &[ConsumerKind::Interface],
        );
        assert!(decision.needs_buffer);
        assert!(decision.persistent);
        assert!(decision.copy_to_interface);
    }

    #[test]
    fn cross_phase_kernel_consumer_needs_persistence_without_copy() {
        let decision = classify_output(
            false,
            false,
            GraphType::Update,
            GraphType::Setup,
            &[ConsumerKind::Kernel {
                phase: GraphType::Update,
            }],
        );
        assert!(decision.needs_buffer);
        assert!(decision.persistent);
        assert!(!decision.copy_to_interface);
    }

    #[test]
    fn atomic_outputs_zero_init_their_buffer() {
        let decision = classify_output(
            false,
            true,
            GraphType::Update,
            GraphType::Update,
            &[ConsumerKind::Kernel {
                phase: GraphType::Update,
            }],
        );
        assert!(decision.needs_buffer);
        assert!(decision.zero_init);
        assert!(decision.copy_to_interface);
    }

    #[test]
    fn unconsumed_output_needs_nothing() {
        let decision = classify_output(false, false, GraphType::Update, GraphType::Update, &[]);
        assert_eq!(
            decision,
            BufferDecision {
                needs_buffer: false,
                persistent: false,
                copy_to_interface: false,
                zero_init: false,
            }
        );
    }
}
