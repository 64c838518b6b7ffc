//! Fixed-point insertion of copy kernels into the already-ordered real
//! kernel list.
//!
//! The real kernels are topologically ordered by collection and instancing;
//! they are never re-sorted here. Each copy kernel slots in immediately
//! after the kernel producing its input (or at the front when it has none),
//! which also puts it ahead of every kernel that reads its outputs.

use anyhow::{Result, anyhow, bail};

use crate::compiler::loops::InstancedNode;
use crate::kernel::BoundKernel;

/// Identity of one scheduled slot: a real kernel instance or a copy kernel
/// by plan index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SchedKey {
    Real(InstancedNode),
    Copy(usize),
}

/// Interleave `copies` into `kernels`. `depends[i]` names the slot that
/// produces copy `i`'s input; `None` schedules it at the front. A pass that
/// places nothing is a broken upstream invariant (the DAG guarantees make it
/// unreachable), not a user diagnostic.
pub(crate) fn insert_copy_kernels(
    mut kernels: Vec<(BoundKernel, SchedKey)>,
    copies: Vec<BoundKernel>,
    depends: Vec<Option<SchedKey>>,
) -> Result<Vec<(BoundKernel, SchedKey)>> {
    let total = copies.len();
    let mut pending: Vec<Option<BoundKernel>> = copies.into_iter().map(Some).collect();
    let mut placed = 0usize;

    while placed < total {
        let placed_before = placed;
        for index in 0..total {
            if pending[index].is_none() {
                continue;
            }
            let insert_at = match &depends[index] {
                None => 0,
                Some(key) => match kernels.iter().position(|(_, k)| k == key) {
                    Some(position) => position + 1,
                    // Producer not placed yet; retry on a later pass.
                    None => continue,
                },
            };
            let kernel = pending[index]
                .take()
                .ok_or_else(|| anyhow!("copy kernel {index} vanished mid-insertion"))?;
            kernels.insert(insert_at, (kernel, SchedKey::Copy(index)));
            placed += 1;
        }
        if placed == placed_before {
            bail!("copy kernel insertion made no progress; kernel order is not a DAG");
        }
    }
    Ok(kernels)
}
