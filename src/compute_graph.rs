//! The compiled output consumed by the execution engine.

use crate::graph::ComponentBinding;
use crate::kernel::KernelInvocation;
use crate::provider::DataProvider;
use crate::types::GraphType;

/// A provider registered in one compute graph, with the component binding
/// index that supplies its per-element count.
#[derive(Clone, Debug)]
pub struct BoundProvider {
    pub provider: DataProvider,
    pub binding: usize,
}

/// One typed edge connecting a kernel parameter slot to a provider function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphEdge {
    pub is_input: bool,
    pub kernel_index: usize,
    pub kernel_binding: usize,
    pub provider_index: usize,
    pub provider_function: usize,
    /// Name the kernel source calls the function by, when it differs from
    /// the provider's own function name.
    pub function_name: Option<String>,
}

/// One ordered execution plan for a single phase. Kernels run in list order;
/// every parameter slot of every kernel has exactly one edge.
#[derive(Clone, Debug)]
pub struct ComputeGraph {
    pub name: String,
    pub graph_type: GraphType,
    pub bindings: Vec<ComponentBinding>,
    pub providers: Vec<BoundProvider>,
    pub kernels: Vec<KernelInvocation>,
    /// Originating node id per kernel; `None` for synthesized copy kernels.
    pub kernel_nodes: Vec<Option<String>>,
    pub edges: Vec<GraphEdge>,
}
