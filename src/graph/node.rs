use serde::{Deserialize, Serialize};

use crate::types::{DataType, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinDirection {
    Input,
    Output,
}

/// Whether a pin carries one value or one value per element of some
/// execution domain (e.g. per vertex).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDomain {
    #[default]
    Singleton,
    Elements {
        dims: Vec<String>,
    },
}

impl DataDomain {
    pub fn elements(dims: &[&str]) -> DataDomain {
        DataDomain::Elements {
            dims: dims.iter().map(|d| d.to_string()).collect(),
        }
    }

    pub fn is_singleton(&self) -> bool {
        matches!(self, DataDomain::Singleton)
    }

    /// Dotted execution-domain expression, empty for singletons.
    pub fn expression(&self) -> String {
        match self {
            DataDomain::Singleton => String::new(),
            DataDomain::Elements { dims } => dims.join("."),
        }
    }
}

/// A typed, directional connection point on a node. A pin with sub-pins is a
/// grouping pin: it bundles its children and carries no data of its own.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pin {
    pub id: String,
    pub direction: PinDirection,
    #[serde(default)]
    pub domain: DataDomain,
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub sub_pins: Vec<Pin>,
}

impl Pin {
    pub fn input(id: &str, data_type: DataType) -> Pin {
        Pin {
            id: id.to_string(),
            direction: PinDirection::Input,
            domain: DataDomain::Singleton,
            data_type: Some(data_type),
            sub_pins: Vec::new(),
        }
    }

    pub fn output(id: &str, data_type: DataType) -> Pin {
        Pin {
            id: id.to_string(),
            direction: PinDirection::Output,
            domain: DataDomain::Singleton,
            data_type: Some(data_type),
            sub_pins: Vec::new(),
        }
    }

    pub fn group(id: &str, direction: PinDirection, sub_pins: Vec<Pin>) -> Pin {
        Pin {
            id: id.to_string(),
            direction,
            domain: DataDomain::Singleton,
            data_type: None,
            sub_pins,
        }
    }

    pub fn per_element(mut self, dims: &[&str]) -> Pin {
        self.domain = DataDomain::elements(dims);
        self
    }

    pub fn is_grouping(&self) -> bool {
        !self.sub_pins.is_empty()
    }
}

/// Capability of a node that owns a unit of per-element GPU work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelSpec {
    pub entry_point: String,
    /// User-authored WGSL statements forming the kernel body. Reads and
    /// writes go through `Read_<pin>` / `Write_<pin>` calls the compiler
    /// binds to data-provider functions.
    pub source: String,
    #[serde(default = "default_group_size")]
    pub group_size: [u32; 3],
    /// Pin id of the grouping pin holding the kernel's primary execution
    /// domain inputs. Its connected sources decide the component binding.
    pub primary_group: String,
    /// Output pin ids written with accumulating/atomic operations. Their
    /// buffers must be zero-initialized before dispatch.
    #[serde(default)]
    pub atomic_outputs: Vec<String>,
    /// Output pin ids the kernel reads back after writing.
    #[serde(default)]
    pub readback_outputs: Vec<String>,
}

fn default_group_size() -> [u32; 3] {
    [64, 1, 1]
}

/// Capability of a node backed by an external typed buffer (source, sink, or
/// intermediate resource).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataInterfaceSpec {
    /// Index into the program's component binding list; decides which
    /// external entity instance supplies the per-element count.
    pub binding: usize,
    /// True when the interface's data changes between executions. Drives the
    /// setup/update phase split.
    #[serde(default)]
    pub mutable: bool,
}

/// Capability of a node that supplies a literal value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValueSpec {
    pub identifier: String,
    pub value: Value,
    /// Variables are externally mutable and always supply their own value;
    /// constants may be overridden through an input connection.
    #[serde(default)]
    pub variable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopTerminalKind {
    Entry,
    Return,
}

/// One named resource or value crossing a loop boundary. All four pin ids
/// refer to pins on the pair's terminals: `entry_*` on the entry node,
/// `return_*` on the return node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopPinPair {
    pub name: String,
    pub entry_in: String,
    pub entry_out: String,
    pub return_in: String,
    pub return_out: String,
}

/// Capability of one half of an entry/return loop terminal pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopTerminalSpec {
    pub kind: LoopTerminalKind,
    /// Node id of the paired terminal.
    pub pair_node: String,
    /// Number of iterations; authoritative on the entry terminal. A count of
    /// zero elides the loop interior entirely.
    pub count: u32,
    #[serde(default)]
    pub pairs: Vec<LoopPinPair>,
    /// Singleton output pin exposing the current iteration index (entry
    /// terminals only).
    #[serde(default)]
    pub index_pin: Option<String>,
    /// Singleton output pin exposing the loop count (entry terminals only).
    #[serde(default)]
    pub count_pin: Option<String>,
}

impl LoopTerminalSpec {
    /// Map a boundary pin of either terminal to the corresponding *input*
    /// pin on the requested side: `(node-role, pin id)` where the node role
    /// is the entry or return terminal of the pair.
    pub fn counterpart_input(&self, pin_id: &str, side: LoopTerminalKind) -> Option<&str> {
        let pair = self.pairs.iter().find(|p| {
            p.entry_in == pin_id || p.entry_out == pin_id || p.return_in == pin_id || p.return_out == pin_id
        })?;
        Some(match side {
            LoopTerminalKind::Entry => pair.entry_in.as_str(),
            LoopTerminalKind::Return => pair.return_in.as_str(),
        })
    }

    /// Node id hosting pins of the given side, given the node id this spec
    /// belongs to.
    pub fn side_node<'a>(&'a self, own_id: &'a str, side: LoopTerminalKind) -> &'a str {
        if self.kind == side { own_id } else { self.pair_node.as_str() }
    }
}

/// Reference to a nested or function graph expanded through routing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubgraphRef {
    pub graph: String,
}

/// Marks the boundary proxy nodes inside a referenced graph: the entry proxy
/// mirrors the reference node's input pins as outputs, the return proxy
/// mirrors its output pins as inputs. Proxy pin ids match the reference
/// node's pin ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubgraphPort {
    Entry,
    Return,
}

/// A node in the graph. Behavior is decided by which capability fields are
/// present, not by a type hierarchy; a node may expose several capabilities
/// at once (e.g. a resource is a data interface with property pins).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub pins: Vec<Pin>,
    #[serde(default)]
    pub kernel: Option<KernelSpec>,
    #[serde(default)]
    pub data_interface: Option<DataInterfaceSpec>,
    #[serde(default)]
    pub value: Option<ValueSpec>,
    #[serde(default)]
    pub loop_terminal: Option<LoopTerminalSpec>,
    #[serde(default)]
    pub subgraph: Option<SubgraphRef>,
    #[serde(default)]
    pub subgraph_port: Option<SubgraphPort>,
    /// Pin ids whose values are consumed on the host side only.
    #[serde(default)]
    pub property_pins: Vec<String>,
}

impl Node {
    pub fn new(id: &str) -> Node {
        Node {
            id: id.to_string(),
            pins: Vec::new(),
            kernel: None,
            data_interface: None,
            value: None,
            loop_terminal: None,
            subgraph: None,
            subgraph_port: None,
            property_pins: Vec::new(),
        }
    }

    pub fn with_pins(mut self, pins: Vec<Pin>) -> Node {
        self.pins = pins;
        self
    }

    pub fn with_kernel(mut self, kernel: KernelSpec) -> Node {
        self.kernel = Some(kernel);
        self
    }

    pub fn with_data_interface(mut self, spec: DataInterfaceSpec) -> Node {
        self.data_interface = Some(spec);
        self
    }

    pub fn with_value(mut self, spec: ValueSpec) -> Node {
        self.value = Some(spec);
        self
    }

    pub fn with_loop_terminal(mut self, spec: LoopTerminalSpec) -> Node {
        self.loop_terminal = Some(spec);
        self
    }

    pub fn with_subgraph(mut self, graph: &str) -> Node {
        self.subgraph = Some(SubgraphRef {
            graph: graph.to_string(),
        });
        self
    }

    pub fn with_subgraph_port(mut self, port: SubgraphPort) -> Node {
        self.subgraph_port = Some(port);
        self
    }

    pub fn with_property_pins(mut self, pins: &[&str]) -> Node {
        self.property_pins = pins.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Pins of one direction. With `expand_groups`, grouping pins are
    /// followed by their sub-pins (callers typically skip the grouping pins
    /// themselves).
    pub fn pins_by_direction(&self, direction: PinDirection, expand_groups: bool) -> Vec<&Pin> {
        let mut out = Vec::new();
        for pin in &self.pins {
            if pin.direction != direction {
                continue;
            }
            out.push(pin);
            if expand_groups && pin.is_grouping() {
                collect_sub_pins(pin, &mut out);
            }
        }
        out
    }

    pub fn find_pin(&self, id: &str) -> Option<&Pin> {
        fn find<'a>(pins: &'a [Pin], id: &str) -> Option<&'a Pin> {
            for pin in pins {
                if pin.id == id {
                    return Some(pin);
                }
                if let Some(found) = find(&pin.sub_pins, id) {
                    return Some(found);
                }
            }
            None
        }
        find(&self.pins, id)
    }

    pub fn is_kernel(&self) -> bool {
        self.kernel.is_some()
    }

    pub fn is_data_interface(&self) -> bool {
        self.data_interface.is_some()
    }

    pub fn is_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_loop_terminal(&self) -> bool {
        self.loop_terminal.is_some()
    }

    /// A resource interface both accepts GPU writes and serves GPU reads;
    /// scheduling must order readers after the kernel that writes it.
    pub fn is_resource_interface(&self) -> bool {
        if self.data_interface.is_none() {
            return false;
        }
        let has_data_input = self
            .pins_by_direction(PinDirection::Input, true)
            .iter()
            .any(|p| !p.is_grouping() && !self.property_pins.contains(&p.id));
        let has_output = self
            .pins_by_direction(PinDirection::Output, true)
            .iter()
            .any(|p| !p.is_grouping());
        has_data_input && has_output
    }
}

fn collect_sub_pins<'a>(pin: &'a Pin, out: &mut Vec<&'a Pin>) {
    for sub in &pin.sub_pins {
        out.push(sub);
        if sub.is_grouping() {
            collect_sub_pins(sub, out);
        }
    }
}
