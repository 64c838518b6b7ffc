//! Bound kernels: a kernel source handle plus the maps from its parameter
//! slots to data-provider functions.

use std::collections::BTreeMap;

use crate::graph::KernelSpec;
use crate::provider::{ProviderId, ProviderTable};
use crate::types::{DataType, DataTypeRegistry};
use crate::wgsl;

/// Handle to one compiled kernel source.
#[derive(Clone, Debug)]
pub struct KernelSource {
    pub entry_point: String,
    pub source: String,
    pub group_size: [u32; 3],
}

/// One kernel parameter slot bound to a provider function. `function_name`
/// is the name the kernel source calls; the edge it becomes tells the engine
/// which provider function to substitute for it.
#[derive(Clone, Debug)]
pub struct InterfaceBinding {
    pub provider: ProviderId,
    pub function: usize,
    pub function_name: String,
}

/// Slot index to binding. Ordered so edge emission is deterministic.
pub type BindingMap = BTreeMap<usize, InterfaceBinding>;

/// A kernel with fully resolved input/output bindings, ready for scheduling.
#[derive(Clone, Debug)]
pub struct BoundKernel {
    pub name: String,
    pub source: KernelSource,
    pub inputs: BindingMap,
    pub outputs: BindingMap,
    /// Originating node id; `None` for synthesized copy kernels.
    pub node: Option<String>,
}

/// The emitted form of one kernel dispatch.
#[derive(Clone, Debug)]
pub struct KernelInvocation {
    pub name: String,
    pub source: KernelSource,
}

/// Resolved input for one kernel data pin.
#[derive(Clone, Debug)]
pub struct KernelInput {
    pub pin: String,
    pub provider: ProviderId,
    pub function: usize,
}

/// Resolved outputs for one kernel data pin; several targets share the one
/// logical write (buffer plus directly written interfaces).
#[derive(Clone, Debug)]
pub struct KernelOutput {
    pub pin: String,
    pub data_type: DataType,
    pub targets: Vec<(ProviderId, usize)>,
}

/// The kernel-provider "create kernel source" operation: bind the authored
/// body against the resolved inputs/outputs and return the source handle
/// plus binding maps. Errors are user-facing messages reported against the
/// kernel's node.
pub fn create_kernel_source(
    spec: &KernelSpec,
    label: &str,
    exec: ProviderId,
    inputs: &[KernelInput],
    outputs: &[KernelOutput],
    table: &ProviderTable,
    registry: &DataTypeRegistry,
) -> Result<(KernelSource, BindingMap, BindingMap), String> {
    if spec.source.trim().is_empty() {
        return Err(format!("kernel '{label}' has no source"));
    }

    let mut input_bindings = BindingMap::new();
    let mut read_stubs: Vec<wgsl::FnStub> = Vec::new();
    let mut slot = 0usize;

    // The execution provider is bound first, wholesale.
    let exec_provider = table.get(exec);
    for (index, function) in exec_provider.read_fns.iter().enumerate() {
        input_bindings.insert(
            slot,
            InterfaceBinding {
                provider: exec,
                function: index,
                function_name: function.name.clone(),
            },
        );
        read_stubs.push(wgsl::FnStub {
            name: function.name.clone(),
            data_type: function.data_type,
            indexed: function.indexed,
        });
        slot += 1;
    }

    for input in inputs {
        let provider = table.get(input.provider);
        let Some(function) = provider.read_fns.get(input.function) else {
            return Err(format!(
                "kernel '{label}' input pin '{}' binds a missing provider function",
                input.pin
            ));
        };
        let alias = format!("Read_{}", input.pin);
        input_bindings.insert(
            slot,
            InterfaceBinding {
                provider: input.provider,
                function: input.function,
                function_name: alias.clone(),
            },
        );
        read_stubs.push(wgsl::FnStub {
            name: alias,
            data_type: function.data_type,
            indexed: function.indexed,
        });
        slot += 1;
    }

    let mut output_bindings = BindingMap::new();
    let mut write_fan_outs: Vec<wgsl::WriteFanOut> = Vec::new();
    let mut out_slot = 0usize;
    for output in outputs {
        let mut fan_out = wgsl::WriteFanOut {
            pin: output.pin.clone(),
            data_type: output.data_type,
            target_fns: Vec::new(),
        };
        for (target_index, (provider, function)) in output.targets.iter().enumerate() {
            let alias = format!("Write_{}_{target_index}", output.pin);
            output_bindings.insert(
                out_slot,
                InterfaceBinding {
                    provider: *provider,
                    function: *function,
                    function_name: alias.clone(),
                },
            );
            fan_out.target_fns.push(alias);
            out_slot += 1;
        }
        write_fan_outs.push(fan_out);
    }

    let source = wgsl::kernel_module(
        registry,
        &spec.entry_point,
        spec.group_size,
        &read_stubs,
        &write_fan_outs,
        &spec.source,
    )
    .map_err(|e| format!("kernel '{label}': {e}"))?;

    Ok((
        KernelSource {
            entry_point: spec.entry_point.clone(),
            source,
            group_size: spec.group_size,
        },
        input_bindings,
        output_bindings,
    ))
}
