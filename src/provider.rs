//! Concrete data providers bound into emitted compute graphs.
//!
//! A provider is the realized form of a data-interface node, the graph-wide
//! value carrier, an intermediate buffer, or one of the synthesized
//! execution-domain providers. Kernels never touch each other directly; every
//! kernel parameter slot is an edge to one provider function.

use crate::graph::{Node, Pin, PinDirection};
use crate::types::DataType;

/// Index into the compile-scoped [`ProviderTable`]. Identity is by id, which
/// is what provider deduplication in the emitter relies on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProviderId(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub enum ProviderKind {
    /// Realized from a data-interface node.
    Interface { node: String },
    /// Carries every device-visible constant/variable value of one graph.
    GraphValues,
    /// Scratch buffer valid for the current execution only.
    TransientBuffer { zero_init: bool },
    /// Buffer that must retain its contents into later, separately scheduled
    /// executions.
    PersistentBuffer { zero_init: bool },
    /// Per-iteration loop data (index, count).
    LoopIteration { index: u32, count: u32 },
    /// Execution-domain provider for one kernel invocation.
    KernelExecution { domain: String },
    /// Execution-domain provider for one synthesized copy kernel.
    CopyKernelExecution { domain: String },
}

/// One named function a provider exposes to kernels.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderFn {
    pub name: String,
    /// `None` for execution-provider functions (thread-count queries return
    /// `vec3<u32>` and have no registered data type).
    pub data_type: Option<DataType>,
    /// Indexed functions take the element index as their first parameter.
    pub indexed: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataProvider {
    pub name: String,
    pub kind: ProviderKind,
    /// Functions kernels read through.
    pub read_fns: Vec<ProviderFn>,
    /// Functions kernels write through.
    pub write_fns: Vec<ProviderFn>,
}

impl DataProvider {
    pub fn is_execution(&self) -> bool {
        matches!(
            self.kind,
            ProviderKind::KernelExecution { .. } | ProviderKind::CopyKernelExecution { .. }
        )
    }

    /// Realize a data-interface node: one read function per output pin, one
    /// write function per non-property input pin.
    pub fn from_interface_node(node: &Node) -> DataProvider {
        let read_fns = interface_read_pins(node)
            .into_iter()
            .map(|pin| ProviderFn {
                name: format!("Read_{}", pin.id),
                data_type: pin.data_type,
                indexed: !pin.domain.is_singleton(),
            })
            .collect();
        let write_fns = interface_write_pins(node)
            .into_iter()
            .map(|pin| ProviderFn {
                name: format!("Write_{}", pin.id),
                data_type: pin.data_type,
                indexed: !pin.domain.is_singleton(),
            })
            .collect();
        DataProvider {
            name: node.id.clone(),
            kind: ProviderKind::Interface {
                node: node.id.clone(),
            },
            read_fns,
            write_fns,
        }
    }

    /// The graph-wide value carrier: one read function per device-visible
    /// value, in first-use order.
    pub fn graph_values(graph_name: &str, values: &[(String, DataType)]) -> DataProvider {
        DataProvider {
            name: format!("{graph_name}.values"),
            kind: ProviderKind::GraphValues,
            read_fns: values
                .iter()
                .map(|(identifier, ty)| ProviderFn {
                    name: format!("Read_{identifier}"),
                    data_type: Some(*ty),
                    indexed: false,
                })
                .collect(),
            write_fns: Vec::new(),
        }
    }

    pub fn buffer(name: &str, data_type: DataType, persistent: bool, zero_init: bool) -> DataProvider {
        DataProvider {
            name: name.to_string(),
            kind: if persistent {
                ProviderKind::PersistentBuffer { zero_init }
            } else {
                ProviderKind::TransientBuffer { zero_init }
            },
            read_fns: vec![ProviderFn {
                name: "ReadValue".to_string(),
                data_type: Some(data_type),
                indexed: true,
            }],
            write_fns: vec![ProviderFn {
                name: "WriteValue".to_string(),
                data_type: Some(data_type),
                indexed: true,
            }],
        }
    }

    /// Function index buffers expose their single read/write through.
    pub const BUFFER_READ_FN: usize = 0;
    pub const BUFFER_WRITE_FN: usize = 0;

    pub fn loop_iteration(name: &str, index: u32, count: u32) -> DataProvider {
        DataProvider {
            name: name.to_string(),
            kind: ProviderKind::LoopIteration { index, count },
            read_fns: vec![
                ProviderFn {
                    name: "ReadIndex".to_string(),
                    data_type: Some(DataType::Uint),
                    indexed: false,
                },
                ProviderFn {
                    name: "ReadCount".to_string(),
                    data_type: Some(DataType::Uint),
                    indexed: false,
                },
            ],
            write_fns: Vec::new(),
        }
    }

    pub const LOOP_INDEX_FN: usize = 0;
    pub const LOOP_COUNT_FN: usize = 1;

    pub fn kernel_execution(name: &str, domain: &str) -> DataProvider {
        DataProvider {
            name: name.to_string(),
            kind: ProviderKind::KernelExecution {
                domain: domain.to_string(),
            },
            read_fns: vec![ProviderFn {
                name: "ReadNumThreads".to_string(),
                data_type: None,
                indexed: false,
            }],
            write_fns: Vec::new(),
        }
    }

    pub fn copy_kernel_execution(name: &str, domain: &str) -> DataProvider {
        DataProvider {
            name: name.to_string(),
            kind: ProviderKind::CopyKernelExecution {
                domain: domain.to_string(),
            },
            read_fns: vec![ProviderFn {
                name: "ReadNumThreads".to_string(),
                data_type: None,
                indexed: false,
            }],
            write_fns: Vec::new(),
        }
    }
}

fn interface_read_pins(node: &Node) -> Vec<&Pin> {
    node.pins_by_direction(PinDirection::Output, true)
        .into_iter()
        .filter(|p| !p.is_grouping())
        .collect()
}

fn interface_write_pins(node: &Node) -> Vec<&Pin> {
    node.pins_by_direction(PinDirection::Input, true)
        .into_iter()
        .filter(|p| !p.is_grouping() && !node.property_pins.contains(&p.id))
        .collect()
}

/// Function-index lookup from a pin, the interface-provider half of the
/// graph-model contract.
pub fn interface_read_index(node: &Node, pin_id: &str) -> Option<usize> {
    interface_read_pins(node).iter().position(|p| p.id == pin_id)
}

pub fn interface_write_index(node: &Node, pin_id: &str) -> Option<usize> {
    interface_write_pins(node).iter().position(|p| p.id == pin_id)
}

/// Compile-scoped table of every provider a compile pass creates, together
/// with its component binding index.
#[derive(Debug, Default)]
pub struct ProviderTable {
    providers: Vec<DataProvider>,
    bindings: Vec<usize>,
}

impl ProviderTable {
    pub fn add(&mut self, provider: DataProvider, binding: usize) -> ProviderId {
        self.providers.push(provider);
        self.bindings.push(binding);
        ProviderId(self.providers.len() - 1)
    }

    pub fn get(&self, id: ProviderId) -> &DataProvider {
        &self.providers[id.0]
    }

    pub fn binding(&self, id: ProviderId) -> usize {
        self.bindings[id.0]
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
