//! Backward propagation of value usage (host/device) and override chains.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::compiler::collect::CollectedGraph;
use crate::graph::{GraphView, PinDirection, RoutedNode};
use crate::types::ValueUsage;

pub(crate) struct ValueAnalysis {
    /// Node ids of value nodes that supply their own literal (no override
    /// feeding them), in discovery order.
    pub active: Vec<String>,
    /// Accumulated usage per value node id.
    pub usage: HashMap<String, ValueUsage>,
    /// Constant node to the value node overriding it.
    pub overrides: HashMap<RoutedNode, RoutedNode>,
}

/// Walk the execution order in reverse so every consumer is classified
/// before its producers; a value node's usage is then the union of what its
/// consumers demand, and override chains inherit the usage of the overridden
/// node.
pub(crate) fn propagate_value_usage(
    view: &GraphView,
    collected: &CollectedGraph,
) -> Result<ValueAnalysis> {
    let mut active: Vec<String> = Vec::new();
    let mut active_set: HashSet<String> = HashSet::new();
    let mut usage: HashMap<String, ValueUsage> = HashMap::new();
    let mut overrides: HashMap<RoutedNode, RoutedNode> = HashMap::new();

    for routed in collected.order.iter().rev() {
        let node = view.node(&routed.node)?;
        let Some(spec) = &node.value else {
            continue;
        };

        if spec.variable {
            if active_set.insert(node.id.clone()) {
                active.push(node.id.clone());
            }
        } else {
            // A constant with an incoming connection is overridden; active
            // status belongs to the root of the chain.
            let override_source = node
                .pins_by_direction(PinDirection::Input, true)
                .iter()
                .find(|p| !p.is_grouping())
                .map(|p| view.connected_sources(&routed.node, &p.id, &routed.context))
                .unwrap_or_default();
            match override_source.first() {
                None => {
                    if active_set.insert(node.id.clone()) {
                        active.push(node.id.clone());
                    }
                }
                Some(source) => {
                    overrides.insert(routed.clone(), source.routed_node());
                }
            }
        }

        let mut accumulated = usage.get(&node.id).copied().unwrap_or_default();
        for out_pin in node.pins_by_direction(PinDirection::Output, false) {
            for consumer in view.connected_consumers(&routed.node, &out_pin.id, &routed.context) {
                let consumer_node = view.node(&consumer.pin.node)?;
                if consumer_node.property_pins.contains(&consumer.pin.pin) {
                    accumulated.host = true;
                    continue;
                }
                if consumer_node.is_value() {
                    let inherited = usage
                        .get(&consumer_node.id)
                        .copied()
                        .unwrap_or_default();
                    accumulated = accumulated.union(inherited);
                    continue;
                }
                accumulated.device = true;
            }
        }
        usage.insert(node.id.clone(), accumulated);
    }

    Ok(ValueAnalysis {
        active,
        usage,
        overrides,
    })
}

/// Follow an override chain to the value node that actually supplies the
/// literal.
pub(crate) fn root_value(
    overrides: &HashMap<RoutedNode, RoutedNode>,
    start: &RoutedNode,
) -> RoutedNode {
    let mut current = start;
    while let Some(next) = overrides.get(current) {
        current = next;
    }
    current.clone()
}

pub(crate) fn root_value_identifier(
    view: &GraphView,
    overrides: &HashMap<RoutedNode, RoutedNode>,
    start: &RoutedNode,
) -> Result<String> {
    let root = root_value(overrides, start);
    let node = view.node(&root.node)?;
    Ok(node
        .value
        .as_ref()
        .map(|v| v.identifier.clone())
        .unwrap_or_else(|| node.id.clone()))
}
