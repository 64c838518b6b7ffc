//! Breadth-first node collection from terminal sinks.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Result, bail};

use crate::graph::{GraphView, Node, PinDirection, RoutedNode, TraversalContext};

/// The causally contributing subgraph, in execution order, with routed
/// adjacency in both directions.
pub(crate) struct CollectedGraph {
    /// Producer-before-consumer order.
    pub order: Vec<RoutedNode>,
    /// Node to the producers feeding its input pins.
    pub inputs: HashMap<RoutedNode, Vec<RoutedNode>>,
    /// Node to the consumers of its output pins.
    pub outputs: HashMap<RoutedNode, Vec<RoutedNode>>,
}

impl CollectedGraph {
    pub fn inputs_of(&self, node: &RoutedNode) -> &[RoutedNode] {
        self.inputs.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn outputs_of(&self, node: &RoutedNode) -> &[RoutedNode] {
        self.outputs.get(node).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Walk upward from the terminal sinks, breadth first. The emitted list is
/// naturally consumer-before-producer because sinks seed it; a node
/// rediscovered later is moved to the back so that, after the final
/// reversal, it still precedes every node that reads from it.
pub(crate) fn collect_nodes(view: &GraphView, terminals: &[&Node]) -> Result<CollectedGraph> {
    let mut visited: HashSet<RoutedNode> = HashSet::new();
    let mut queue: VecDeque<RoutedNode> = VecDeque::new();
    let mut collected: Vec<RoutedNode> = Vec::new();
    let mut inputs: HashMap<RoutedNode, Vec<RoutedNode>> = HashMap::new();
    let mut outputs: HashMap<RoutedNode, Vec<RoutedNode>> = HashMap::new();

    for terminal in terminals {
        let routed = RoutedNode::new(&terminal.id, TraversalContext::default());
        queue.push_back(routed.clone());
        visited.insert(routed.clone());
        collected.push(routed);
    }

    // Rediscovery re-enqueues, so a link cycle would spin forever. The
    // editor cannot author cycles; treat hitting the cap as corrupt input.
    let mut expansions: usize = 0;
    while let Some(item) = queue.pop_front() {
        expansions += 1;
        if expansions > 1_000_000 {
            bail!("node collection did not converge; graph may contain a cycle");
        }
        let node = view.node(&item.node)?;
        let mut unique_neighbors: HashSet<RoutedNode> = HashSet::new();

        for pin in node.pins_by_direction(PinDirection::Input, true) {
            if pin.is_grouping() {
                continue;
            }
            for connected in view.connected_sources(&item.node, &pin.id, &item.context) {
                let neighbor = connected.routed_node();
                if !unique_neighbors.insert(neighbor.clone()) {
                    continue;
                }

                let input_list = inputs.entry(item.clone()).or_default();
                if !input_list.contains(&neighbor) {
                    input_list.push(neighbor.clone());
                }
                let output_list = outputs.entry(neighbor.clone()).or_default();
                if !output_list.contains(&item) {
                    output_list.push(item.clone());
                }

                // Re-enqueue on rediscovery as well: the neighbor's whole
                // upstream chain must shift behind it to keep the order
                // topological.
                queue.push_back(neighbor.clone());

                if visited.insert(neighbor.clone()) {
                    collected.push(neighbor);
                } else {
                    collected.retain(|n| n != &neighbor);
                    collected.push(neighbor);
                }
            }
        }
    }

    collected.reverse();
    Ok(CollectedGraph {
        order: collected,
        inputs,
        outputs,
    })
}
