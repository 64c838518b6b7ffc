//! Loop analysis and unrolling: zero-count elision, per-iteration node
//! instances, and the instanced link map that chains iterations together.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Result, anyhow};

use crate::compiler::collect::CollectedGraph;
use crate::graph::{
    GraphView, LoopTerminalKind, LoopTerminalSpec, Node, PinDirection, PinRef, RoutedNode,
    RoutedPin,
};

/// A routed node replicated for one loop iteration. Non-looped nodes use
/// iteration 0.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct InstancedNode {
    pub node: RoutedNode,
    pub iteration: u32,
}

impl InstancedNode {
    pub fn label(&self) -> String {
        if self.iteration == 0 {
            self.node.label()
        } else {
            format!("{}#{}", self.node.label(), self.iteration)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct InstancedPin {
    pub node: InstancedNode,
    pub pin: String,
}

/// Loop structure discovered on the collected graph.
pub(crate) struct LoopPlan {
    /// Routed terminals of loops with count zero.
    pub skipped_terminals: HashSet<RoutedNode>,
    /// Kernels elided from the plan: interior of skipped loops, plus any
    /// kernel whose consumers are all skipped.
    pub skipped_kernels: HashSet<RoutedNode>,
    /// Kernels strictly inside a loop, keyed by the loop's entry terminal,
    /// in execution order.
    pub entry_kernels: HashMap<RoutedNode, Vec<RoutedNode>>,
    /// Ultimate source for each loop-terminal input pin, resolved through
    /// chains of adjacent (and skipped) loops.
    pub terminal_sources: HashMap<RoutedPin, RoutedPin>,
}

pub(crate) fn loop_count(view: &GraphView, node: &Node, spec: &LoopTerminalSpec) -> Result<u32> {
    match spec.kind {
        LoopTerminalKind::Entry => Ok(spec.count),
        LoopTerminalKind::Return => {
            let entry = view.node(&spec.pair_node)?;
            let entry_spec = entry
                .loop_terminal
                .as_ref()
                .ok_or_else(|| anyhow!("loop terminal {} pairs a non-terminal node", node.id))?;
            Ok(entry_spec.count)
        }
    }
}

/// Find the entry terminal of the innermost loop enclosing a kernel, by
/// walking upstream and balancing return/entry crossings.
fn find_loop_entry(
    view: &GraphView,
    collected: &CollectedGraph,
    kernel: &RoutedNode,
) -> Result<Option<RoutedNode>> {
    let mut queue: VecDeque<(RoutedNode, u32)> = VecDeque::new();
    let mut visited: HashSet<(RoutedNode, u32)> = HashSet::new();
    queue.push_back((kernel.clone(), 0));
    while let Some((current, depth)) = queue.pop_front() {
        if !visited.insert((current.clone(), depth)) {
            continue;
        }
        for input in collected.inputs_of(&current) {
            let node = view.node(&input.node)?;
            match node.loop_terminal.as_ref().map(|s| s.kind) {
                Some(LoopTerminalKind::Entry) => {
                    if depth == 0 {
                        return Ok(Some(input.clone()));
                    }
                    queue.push_back((input.clone(), depth - 1));
                }
                Some(LoopTerminalKind::Return) => {
                    queue.push_back((input.clone(), depth + 1));
                }
                None => queue.push_back((input.clone(), depth)),
            }
        }
    }
    Ok(None)
}

pub(crate) fn plan_loops(view: &GraphView, collected: &CollectedGraph) -> Result<LoopPlan> {
    let mut plan = LoopPlan {
        skipped_terminals: HashSet::new(),
        skipped_kernels: HashSet::new(),
        entry_kernels: HashMap::new(),
        terminal_sources: HashMap::new(),
    };

    for routed in &collected.order {
        let node = view.node(&routed.node)?;
        if let Some(spec) = &node.loop_terminal {
            if loop_count(view, node, spec)? == 0 {
                plan.skipped_terminals.insert(routed.clone());
            }
        }
    }

    for routed in &collected.order {
        let node = view.node(&routed.node)?;
        if !node.is_kernel() {
            continue;
        }
        if let Some(entry) = find_loop_entry(view, collected, routed)? {
            plan.entry_kernels
                .entry(entry.clone())
                .or_default()
                .push(routed.clone());
            if plan.skipped_terminals.contains(&entry) {
                plan.skipped_kernels.insert(routed.clone());
            }
        }
    }

    // Backward pass: a kernel whose consumers are all skipped kernels writes
    // nothing anyone reads; elide it too. Non-kernel consumers keep a kernel
    // alive.
    for routed in collected.order.iter().rev() {
        let node = view.node(&routed.node)?;
        if !node.is_kernel() || plan.skipped_kernels.contains(routed) {
            continue;
        }
        let consumers = collected.outputs_of(routed);
        if consumers.iter().all(|c| plan.skipped_kernels.contains(c)) {
            plan.skipped_kernels.insert(routed.clone());
        }
    }

    resolve_terminal_sources(view, collected, &mut plan)?;
    Ok(plan)
}

/// For every loop-terminal input pin, chase the value it receives through
/// chains of neighboring loop terminals to a real producer pin. A skipped
/// loop is traversed entry-to-entry, which is what reroutes consumers of an
/// elided loop to whatever fed it.
fn resolve_terminal_sources(
    view: &GraphView,
    collected: &CollectedGraph,
    plan: &mut LoopPlan,
) -> Result<()> {
    for routed in &collected.order {
        let node = view.node(&routed.node)?;
        let Some(spec) = &node.loop_terminal else {
            continue;
        };
        if spec.kind == LoopTerminalKind::Return && plan.skipped_terminals.contains(routed) {
            continue;
        }

        for pin in node.pins_by_direction(PinDirection::Input, true) {
            if pin.is_grouping() {
                continue;
            }
            let start = RoutedPin {
                pin: PinRef::new(&routed.node, &pin.id),
                context: routed.context.clone(),
            };
            let mut source: Option<RoutedPin> = None;
            let mut queue: VecDeque<RoutedPin> = VecDeque::new();
            let mut visited: HashSet<RoutedPin> = HashSet::new();
            queue.push_back(start.clone());
            while let Some(work) = queue.pop_front() {
                if !visited.insert(work.clone()) {
                    continue;
                }
                let next = view.connected_sources(&work.pin.node, &work.pin.pin, &work.context);
                if next.len() != 1 {
                    continue;
                }
                let next_pin = &next[0];
                let next_node = view.node(&next_pin.pin.node)?;
                if let Some(next_spec) = &next_node.loop_terminal {
                    let side = match (spec.kind, next_spec.kind) {
                        // Entry fed by a preceding loop's return: read through
                        // that loop, or bypass it entirely when skipped.
                        (LoopTerminalKind::Entry, LoopTerminalKind::Return) => {
                            if plan.skipped_terminals.contains(&next_pin.routed_node()) {
                                LoopTerminalKind::Entry
                            } else {
                                LoopTerminalKind::Return
                            }
                        }
                        // Return fed straight from its entry (empty interior).
                        (LoopTerminalKind::Return, LoopTerminalKind::Entry) => {
                            LoopTerminalKind::Entry
                        }
                        _ => continue,
                    };
                    let Some(counterpart) = next_spec.counterpart_input(&next_pin.pin.pin, side)
                    else {
                        continue;
                    };
                    let host = next_spec.side_node(&next_pin.pin.node, side);
                    queue.push_back(RoutedPin {
                        pin: PinRef::new(host, counterpart),
                        context: next_pin.context.clone(),
                    });
                } else {
                    source = Some(next_pin.clone());
                }
            }
            if let Some(source) = source {
                plan.terminal_sources.insert(start, source);
            }
        }
    }
    Ok(())
}

/// Per-iteration instances plus the final (target pin → source pin) link
/// map over instances.
pub(crate) struct InstancePlan {
    pub instances: Vec<InstancedNode>,
    pub sources: HashMap<InstancedPin, InstancedPin>,
    pub consumers: HashMap<InstancedPin, Vec<InstancedPin>>,
    /// Source pins in first-use order, for deterministic downstream walks.
    pub source_order: Vec<InstancedPin>,
}

impl InstancePlan {
    pub fn consumers_of(&self, source: &InstancedPin) -> &[InstancedPin] {
        self.consumers.get(source).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub(crate) fn instance_nodes(
    view: &GraphView,
    collected: &CollectedGraph,
    plan: &LoopPlan,
) -> Result<InstancePlan> {
    let mut instances: Vec<InstancedNode> = Vec::new();
    let mut max_iteration: HashMap<RoutedNode, u32> = HashMap::new();

    for routed in &collected.order {
        if plan.skipped_kernels.contains(routed) {
            continue;
        }
        let node = view.node(&routed.node)?;

        // Unroll when the walk reaches a live return terminal: every interior
        // kernel gains instances 1..count, appended in execution order.
        if let Some(spec) = &node.loop_terminal {
            if spec.kind == LoopTerminalKind::Return && !plan.skipped_terminals.contains(routed) {
                let entry = RoutedNode::new(&spec.pair_node, routed.context.clone());
                if let Some(looped) = plan.entry_kernels.get(&entry) {
                    let count = loop_count(view, node, spec)?;
                    for iteration in 1..count {
                        for kernel in looped {
                            instances.push(InstancedNode {
                                node: kernel.clone(),
                                iteration,
                            });
                        }
                    }
                    for kernel in looped {
                        max_iteration.insert(kernel.clone(), count.saturating_sub(1));
                    }
                }
            }
        }

        instances.push(InstancedNode {
            node: routed.clone(),
            iteration: 0,
        });
        max_iteration.entry(routed.clone()).or_insert(0);
    }

    let mut sources: HashMap<InstancedPin, InstancedPin> = HashMap::new();
    let mut target_order: Vec<InstancedPin> = Vec::new();

    for instance in &instances {
        let node = view.node(&instance.node.node)?;
        if !node.is_kernel() && !node.is_data_interface() {
            continue;
        }
        for pin in node.pins_by_direction(PinDirection::Input, true) {
            if pin.is_grouping() {
                continue;
            }
            let target = InstancedPin {
                node: instance.clone(),
                pin: pin.id.clone(),
            };
            let others = view.connected_sources(&instance.node.node, &pin.id, &instance.node.context);
            if others.len() != 1 {
                continue;
            }
            let other = &others[0];
            let other_node = view.node(&other.pin.node)?;
            let other_pin = view.pin(&other.pin.node, &other.pin.pin)?;

            if let Some(spec) = &other_node.loop_terminal {
                if !other_pin.domain.is_singleton() {
                    link_looped_resource(
                        view, plan, &max_iteration, &mut sources, &mut target_order, instance,
                        node, &target, other, spec,
                    )?;
                    continue;
                }
            }

            // Plain connection: clamp this instance's iteration into the
            // source's unrolled range.
            let source_node = other.routed_node();
            if plan.skipped_kernels.contains(&source_node) {
                continue;
            }
            let max = max_iteration.get(&source_node).copied().unwrap_or(0);
            insert_link(
                &mut sources,
                &mut target_order,
                target,
                InstancedPin {
                    node: InstancedNode {
                        node: source_node,
                        iteration: instance.iteration.min(max),
                    },
                    pin: other.pin.pin.clone(),
                },
            );
        }
    }

    // The final map decides consumers; stale entries overwritten above must
    // not leak into the reverse direction.
    let mut consumers: HashMap<InstancedPin, Vec<InstancedPin>> = HashMap::new();
    let mut source_order: Vec<InstancedPin> = Vec::new();
    for target in &target_order {
        let Some(source) = sources.get(target) else {
            continue;
        };
        let list = consumers.entry(source.clone()).or_default();
        if list.is_empty() {
            source_order.push(source.clone());
        }
        list.push(target.clone());
    }

    Ok(InstancePlan {
        instances,
        sources,
        consumers,
        source_order,
    })
}

enum AddKind {
    LastInstance,
    PreviousInstance,
    AllButLastInstance,
}

/// Wire one consumer pin that reads a non-singleton loop boundary pin.
#[allow(clippy::too_many_arguments)]
fn link_looped_resource(
    view: &GraphView,
    plan: &LoopPlan,
    max_iteration: &HashMap<RoutedNode, u32>,
    sources: &mut HashMap<InstancedPin, InstancedPin>,
    target_order: &mut Vec<InstancedPin>,
    instance: &InstancedNode,
    consumer: &Node,
    target: &InstancedPin,
    other: &RoutedPin,
    spec: &LoopTerminalSpec,
) -> Result<()> {
    let other_routed = other.routed_node();
    let entry_host = spec.side_node(&other.pin.node, LoopTerminalKind::Entry).to_string();
    let return_host = spec.side_node(&other.pin.node, LoopTerminalKind::Return).to_string();
    let entry_in = spec.counterpart_input(&other.pin.pin, LoopTerminalKind::Entry);
    let return_in = spec.counterpart_input(&other.pin.pin, LoopTerminalKind::Return);

    let mut add = |host: &str, pin_id: Option<&str>, kind: AddKind| {
        let Some(pin_id) = pin_id else {
            return;
        };
        let key = RoutedPin {
            pin: PinRef::new(host, pin_id),
            context: other.context.clone(),
        };
        let Some(source) = plan.terminal_sources.get(&key) else {
            return;
        };
        let source_node = source.routed_node();
        if plan.skipped_kernels.contains(&source_node) {
            return;
        }
        let max = max_iteration.get(&source_node).copied().unwrap_or(0);
        match kind {
            AddKind::LastInstance => {
                insert_link(
                    sources,
                    target_order,
                    target.clone(),
                    instanced(source, &source_node, max),
                );
            }
            AddKind::PreviousInstance => {
                let iteration = instance.iteration.saturating_sub(1).min(max);
                insert_link(
                    sources,
                    target_order,
                    target.clone(),
                    instanced(source, &source_node, iteration),
                );
            }
            AddKind::AllButLastInstance => {
                for iteration in 0..max {
                    insert_link(
                        sources,
                        target_order,
                        target.clone(),
                        instanced(source, &source_node, iteration),
                    );
                }
            }
        }
    };

    match spec.kind {
        LoopTerminalKind::Entry => {
            if plan.skipped_terminals.contains(&other_routed) {
                return Ok(());
            }
            let entry_node = view.node(&entry_host)?;
            let entry_spec = entry_node
                .loop_terminal
                .as_ref()
                .ok_or_else(|| anyhow!("loop pair of {} is not a terminal", other.pin.node))?;
            if consumer.is_data_interface() {
                // An interface inside the loop is written every pass; it
                // reads the entry feed once and each pass's return feed
                // otherwise, last write winning.
                add(&entry_host, entry_in, AddKind::LastInstance);
                if entry_spec.count > 1 {
                    add(&return_host, return_in, AddKind::AllButLastInstance);
                }
            } else if consumer.is_kernel() {
                if instance.iteration == 0 {
                    add(&entry_host, entry_in, AddKind::LastInstance);
                } else {
                    add(&return_host, return_in, AddKind::PreviousInstance);
                }
            }
        }
        LoopTerminalKind::Return => {
            // Consumers outside the loop read the last iteration; a skipped
            // loop routes them straight to whatever fed its entry.
            if plan.skipped_terminals.contains(&other_routed) {
                add(&entry_host, entry_in, AddKind::LastInstance);
            } else {
                add(&return_host, return_in, AddKind::LastInstance);
            }
        }
    }
    Ok(())
}

fn instanced(source: &RoutedPin, source_node: &RoutedNode, iteration: u32) -> InstancedPin {
    InstancedPin {
        node: InstancedNode {
            node: source_node.clone(),
            iteration,
        },
        pin: source.pin.pin.clone(),
    }
}

fn insert_link(
    sources: &mut HashMap<InstancedPin, InstancedPin>,
    target_order: &mut Vec<InstancedPin>,
    target: InstancedPin,
    source: InstancedPin,
) {
    if sources.insert(target.clone(), source).is_none() {
        target_order.push(target);
    }
}
