//! Synthesis of implicit copy kernels: one per source pin that must be
//! bridged into data-interface sinks without a user-authored kernel.

use anyhow::{Result, anyhow};

use crate::compiler::bind::BindPlan;
use crate::compiler::loops::InstancedPin;
use crate::compiler::values::{ValueAnalysis, root_value_identifier};
use crate::graph::GraphView;
use crate::kernel::{BindingMap, BoundKernel, InterfaceBinding, KernelSource};
use crate::provider::{
    DataProvider, ProviderId, interface_read_index, interface_write_index,
};
use crate::types::{DataType, DataTypeRegistry};
use crate::wgsl;

/// A planned copy kernel: exactly one logical read, fan-out writes into
/// interface sinks.
pub(crate) struct CopyKernelEntry {
    pub source: InstancedPin,
    pub exec: ProviderId,
    pub read: (ProviderId, usize),
    pub writes: Vec<(InstancedPin, ProviderId, usize)>,
    pub value_type: DataType,
}

pub(crate) fn plan_copy_kernels(
    view: &GraphView,
    bind: &mut BindPlan,
    analysis: &ValueAnalysis,
) -> Result<Vec<CopyKernelEntry>> {
    let mut entries: Vec<CopyKernelEntry> = Vec::new();

    let order = bind.copy_links.order.clone();
    for source in order {
        let targets = bind
            .copy_links
            .targets
            .get(&source)
            .cloned()
            .unwrap_or_default();
        let Some(first_target) = targets.first() else {
            continue;
        };
        let source_node = view.node(&source.node.node.node)?;

        // Where the one read comes from.
        let (read, value_type) = if source_node.is_data_interface() {
            let provider = *bind
                .node_providers
                .get(&source.node.node)
                .ok_or_else(|| anyhow!("copy source interface has no provider"))?;
            let function = interface_read_index(source_node, &source.pin).ok_or_else(|| {
                anyhow!("copy source pin {}.{} has no read function", source.node.node.node, source.pin)
            })?;
            let data_type = view
                .pin(&source.node.node.node, &source.pin)?
                .data_type
                .ok_or_else(|| anyhow!("copy source pin is untyped"))?;
            ((provider, function), data_type)
        } else if let Some(value) = &source_node.value {
            let identifier = root_value_identifier(view, &analysis.overrides, &source.node.node)?;
            let function = *bind.gpu_value_fn.get(&identifier).ok_or_else(|| {
                anyhow!("value '{identifier}' missing from the graph value carrier")
            })?;
            ((bind.graph_values, function), value.value.data_type())
        } else {
            // A kernel output routed here always has a buffer by now.
            let provider = *bind.output_buffers.get(&source).ok_or_else(|| {
                anyhow!(
                    "copy source {}.{} has no backing buffer",
                    source.node.node.node,
                    source.pin
                )
            })?;
            let data_type = view
                .pin(&source.node.node.node, &source.pin)?
                .data_type
                .ok_or_else(|| anyhow!("copy source pin is untyped"))?;
            ((provider, DataProvider::BUFFER_READ_FN), data_type)
        };

        // The copy kernel executes over the first target's domain and
        // component binding; a value source has neither of its own.
        let first_node = view.node(&first_target.node.node.node)?;
        let first_pin = view.pin(&first_target.node.node.node, &first_target.pin)?;
        let binding = first_node
            .data_interface
            .as_ref()
            .map(|i| i.binding)
            .ok_or_else(|| anyhow!("copy target is not a data interface"))?;
        let exec = bind.table.add(
            DataProvider::copy_kernel_execution(
                &format!("{}.{}.copy", source.node.label(), source.pin),
                &first_pin.domain.expression(),
            ),
            binding,
        );

        let mut writes = Vec::new();
        for target in &targets {
            let target_node = view.node(&target.node.node.node)?;
            let provider = *bind
                .node_providers
                .get(&target.node.node)
                .ok_or_else(|| anyhow!("copy target interface has no provider"))?;
            let function = interface_write_index(target_node, &target.pin).ok_or_else(|| {
                anyhow!(
                    "copy target pin {}.{} has no write function",
                    target.node.node.node,
                    target.pin
                )
            })?;
            writes.push((target.clone(), provider, function));
        }

        entries.push(CopyKernelEntry {
            source,
            exec,
            read,
            writes,
            value_type,
        });
    }
    Ok(entries)
}

/// Build the bound kernel for one planned copy: exec provider bound
/// wholesale, then the read, then one write binding per target.
pub(crate) fn build_copy_kernel(
    entry: &CopyKernelEntry,
    bind: &BindPlan,
    registry: &DataTypeRegistry,
) -> Result<BoundKernel> {
    let mut inputs = BindingMap::new();
    let mut slot = 0usize;
    let exec_provider = bind.table.get(entry.exec);
    for (index, function) in exec_provider.read_fns.iter().enumerate() {
        inputs.insert(
            slot,
            InterfaceBinding {
                provider: entry.exec,
                function: index,
                function_name: function.name.clone(),
            },
        );
        slot += 1;
    }

    let (read_provider, read_fn) = entry.read;
    let provider = bind.table.get(read_provider);
    let function = provider
        .read_fns
        .get(read_fn)
        .ok_or_else(|| anyhow!("copy read function index out of range"))?;
    let read_name = format!("Read_{}", entry.source.pin);
    inputs.insert(
        slot,
        InterfaceBinding {
            provider: read_provider,
            function: read_fn,
            function_name: read_name.clone(),
        },
    );

    let mut outputs = BindingMap::new();
    let mut write_names = Vec::new();
    for (index, (target, provider, function)) in entry.writes.iter().enumerate() {
        let name = format!("Write_{index}_{}", target.pin);
        outputs.insert(
            index,
            InterfaceBinding {
                provider: *provider,
                function: *function,
                function_name: name.clone(),
            },
        );
        write_names.push(name);
    }

    let source = wgsl::copy_kernel_module(
        registry,
        entry.value_type,
        &wgsl::FnStub {
            name: read_name,
            data_type: function.data_type,
            indexed: function.indexed,
        },
        &write_names,
    )?;

    Ok(BoundKernel {
        name: format!("CopyKernel({}.{})", entry.source.node.label(), entry.source.pin),
        source: KernelSource {
            entry_point: wgsl::COPY_KERNEL_ENTRY_POINT.to_string(),
            source,
            group_size: wgsl::COPY_KERNEL_GROUP_SIZE,
        },
        inputs,
        outputs,
        node: None,
    })
}
