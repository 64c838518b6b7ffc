use std::collections::{HashMap, HashSet};

use anyhow::{Result, anyhow, bail};

use crate::graph::{Node, NodeGraph, Pin, PinRef, Program, SubgraphPort};
use crate::types::DataType;

/// Stack of subgraph-reference frames a traversal is currently inside.
///
/// Contexts are hashed and compared as part of node identity, so pushing
/// returns a new context instead of mutating in place; two traversals can
/// never alias one another's stack.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TraversalContext(Vec<String>);

impl TraversalContext {
    pub fn push(&self, frame: &str) -> TraversalContext {
        let mut frames = self.0.clone();
        frames.push(frame.to_string());
        TraversalContext(frames)
    }

    /// Split off the innermost frame. `None` when the traversal is already
    /// at the level collection started from; callers must not cross below
    /// that level.
    pub fn pop(&self) -> Option<(TraversalContext, String)> {
        let mut frames = self.0.clone();
        let frame = frames.pop()?;
        Some((TraversalContext(frames), frame))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn frames(&self) -> &[String] {
        &self.0
    }
}

/// A node paired with the traversal context it was reached under. The same
/// physical node visited under two contexts is two distinct routed nodes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoutedNode {
    pub node: String,
    pub context: TraversalContext,
}

impl RoutedNode {
    pub fn new(node: &str, context: TraversalContext) -> RoutedNode {
        RoutedNode {
            node: node.to_string(),
            context,
        }
    }

    /// Stable human-readable label, used to name derived providers.
    pub fn label(&self) -> String {
        if self.context.is_empty() {
            self.node.clone()
        } else {
            format!("{}/{}", self.context.frames().join("/"), self.node)
        }
    }
}

/// A pin paired with a traversal context.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoutedPin {
    pub pin: PinRef,
    pub context: TraversalContext,
}

impl RoutedPin {
    pub fn routed_node(&self) -> RoutedNode {
        RoutedNode {
            node: self.pin.node.clone(),
            context: self.context.clone(),
        }
    }
}

/// Read-only index over a [`Program`] snapshot: node lookup by id, raw link
/// adjacency, and the routed traversal queries that thread contexts through
/// subgraph boundaries.
pub struct GraphView<'a> {
    pub program: &'a Program,
    nodes: HashMap<&'a str, &'a Node>,
    graphs_by_name: HashMap<&'a str, &'a NodeGraph>,
    raw_sources: HashMap<PinRef, Vec<PinRef>>,
    raw_consumers: HashMap<PinRef, Vec<PinRef>>,
}

impl<'a> GraphView<'a> {
    pub fn new(program: &'a Program) -> Result<GraphView<'a>> {
        let mut view = GraphView {
            program,
            nodes: HashMap::new(),
            graphs_by_name: HashMap::new(),
            raw_sources: HashMap::new(),
            raw_consumers: HashMap::new(),
        };
        for graph in &program.graphs {
            view.index_graph(graph)?;
        }
        for graph in &program.functions {
            view.index_graph(graph)?;
        }
        // Validate links after all nodes are known: a link may only connect
        // pins within one graph, and both ends must exist.
        for (to, froms) in &view.raw_sources {
            view.pin(&to.node, &to.pin)
                .map_err(|_| anyhow!("link references missing input {}.{}", to.node, to.pin))?;
            for from in froms {
                view.pin(&from.node, &from.pin).map_err(|_| {
                    anyhow!("link references missing output {}.{}", from.node, from.pin)
                })?;
            }
        }
        Ok(view)
    }

    fn index_graph(&mut self, graph: &'a NodeGraph) -> Result<()> {
        if self
            .graphs_by_name
            .insert(graph.name.as_str(), graph)
            .is_some()
        {
            bail!("duplicate graph name: {}", graph.name);
        }
        for node in &graph.nodes {
            if self.nodes.insert(node.id.as_str(), node).is_some() {
                bail!("duplicate node id: {}", node.id);
            }
        }
        for link in &graph.links {
            self.raw_sources
                .entry(link.to.clone())
                .or_default()
                .push(link.from.clone());
            self.raw_consumers
                .entry(link.from.clone())
                .or_default()
                .push(link.to.clone());
        }
        for sub in &graph.subgraphs {
            self.index_graph(sub)?;
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Result<&'a Node> {
        self.nodes
            .get(id)
            .copied()
            .ok_or_else(|| anyhow!("node not found: {id}"))
    }

    pub fn pin(&self, node_id: &str, pin_id: &str) -> Result<&'a Pin> {
        self.node(node_id)?
            .find_pin(pin_id)
            .ok_or_else(|| anyhow!("pin not found: {node_id}.{pin_id}"))
    }

    pub fn pin_data_type(&self, node_id: &str, pin_id: &str) -> Result<Option<DataType>> {
        Ok(self.pin(node_id, pin_id)?.data_type)
    }

    pub fn has_raw_sources(&self, node_id: &str, pin_id: &str) -> bool {
        self.raw_sources
            .get(&PinRef::new(node_id, pin_id))
            .is_some_and(|v| !v.is_empty())
    }

    pub fn has_raw_consumers(&self, node_id: &str, pin_id: &str) -> bool {
        self.raw_consumers
            .get(&PinRef::new(node_id, pin_id))
            .is_some_and(|v| !v.is_empty())
    }

    /// Whether a referenced graph exists and carries both boundary proxies.
    pub fn subgraph_ports_present(&self, graph_name: &str) -> bool {
        self.proxy_node(graph_name, SubgraphPort::Entry).is_ok()
            && self.proxy_node(graph_name, SubgraphPort::Return).is_ok()
    }

    fn proxy_node(&self, graph_name: &str, port: SubgraphPort) -> Result<&'a Node> {
        let graph = self
            .graphs_by_name
            .get(graph_name)
            .ok_or_else(|| anyhow!("referenced graph not found: {graph_name}"))?;
        graph
            .nodes
            .iter()
            .find(|n| n.subgraph_port == Some(port))
            .ok_or_else(|| anyhow!("graph {graph_name} has no {port:?} proxy node"))
    }

    /// Producers feeding an input pin, with subgraph boundaries routed
    /// transparently: crossing into a referenced graph pushes a context
    /// frame, crossing back out pops it. An empty result means the pin is
    /// effectively unconnected under this context.
    pub fn connected_sources(
        &self,
        node_id: &str,
        pin_id: &str,
        context: &TraversalContext,
    ) -> Vec<RoutedPin> {
        let mut out = Vec::new();
        let mut visited: HashSet<(PinRef, TraversalContext)> = HashSet::new();
        let mut work = vec![(PinRef::new(node_id, pin_id), context.clone())];
        while let Some((pin, ctx)) = work.pop() {
            if !visited.insert((pin.clone(), ctx.clone())) {
                continue;
            }
            let Some(froms) = self.raw_sources.get(&pin) else {
                continue;
            };
            for from in froms {
                let Some(source_node) = self.nodes.get(from.node.as_str()) else {
                    continue;
                };
                if let Some(sub) = &source_node.subgraph {
                    // Reading the reference node's output: descend to the
                    // return proxy's matching input pin.
                    if let Ok(proxy) = self.proxy_node(&sub.graph, SubgraphPort::Return) {
                        work.push((
                            PinRef::new(&proxy.id, &from.pin),
                            ctx.push(&source_node.id),
                        ));
                    }
                } else if source_node.subgraph_port == Some(SubgraphPort::Entry) {
                    // Reading the entry proxy from inside: continue from the
                    // reference node's matching input pin one level up.
                    if let Some((outer, frame)) = ctx.pop() {
                        work.push((PinRef::new(&frame, &from.pin), outer));
                    }
                } else {
                    out.push(RoutedPin {
                        pin: from.clone(),
                        context: ctx.clone(),
                    });
                }
            }
        }
        out
    }

    /// Consumers fed by an output pin, the downstream mirror of
    /// [`Self::connected_sources`].
    pub fn connected_consumers(
        &self,
        node_id: &str,
        pin_id: &str,
        context: &TraversalContext,
    ) -> Vec<RoutedPin> {
        let mut out = Vec::new();
        let mut visited: HashSet<(PinRef, TraversalContext)> = HashSet::new();
        let mut work = vec![(PinRef::new(node_id, pin_id), context.clone())];
        while let Some((pin, ctx)) = work.pop() {
            if !visited.insert((pin.clone(), ctx.clone())) {
                continue;
            }
            let Some(tos) = self.raw_consumers.get(&pin) else {
                continue;
            };
            for to in tos {
                let Some(target_node) = self.nodes.get(to.node.as_str()) else {
                    continue;
                };
                if let Some(sub) = &target_node.subgraph {
                    if let Ok(proxy) = self.proxy_node(&sub.graph, SubgraphPort::Entry) {
                        work.push((PinRef::new(&proxy.id, &to.pin), ctx.push(&target_node.id)));
                    }
                } else if target_node.subgraph_port == Some(SubgraphPort::Return) {
                    if let Some((outer, frame)) = ctx.pop() {
                        work.push((PinRef::new(&frame, &to.pin), outer));
                    }
                } else {
                    out.push(RoutedPin {
                        pin: to.clone(),
                        context: ctx.clone(),
                    });
                }
            }
        }
        out
    }
}
