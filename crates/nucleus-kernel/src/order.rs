use std::collections::{BTreeSet, HashMap};

use crate::error::KernelError;
use crate::service::ServiceKind;

/// Orders `services` so that each one comes after every dependency listed for
/// it in `edges`. Services that become ready at the same time keep their
/// relative install order.
pub(crate) fn startup_order(
    services: &[ServiceKind],
    edges: &HashMap<ServiceKind, Vec<ServiceKind>>,
) -> Result<Vec<ServiceKind>, KernelError> {
    let position: HashMap<ServiceKind, usize> = services
        .iter()
        .enumerate()
        .map(|(idx, kind)| (*kind, idx))
        .collect();

    let mut pending = vec![0usize; services.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); services.len()];
    for (idx, kind) in services.iter().enumerate() {
        for dependency in edges.get(kind).into_iter().flatten() {
            // Edges to services that are no longer installed do not block.
            if let Some(&dep_idx) = position.get(dependency) {
                pending[idx] += 1;
                dependents[dep_idx].push(idx);
            }
        }
    }

    let mut ready: BTreeSet<usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut order = Vec::with_capacity(services.len());
    while let Some(idx) = ready.pop_first() {
        order.push(services[idx]);
        for &dependent in &dependents[idx] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != services.len() {
        let stuck = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(idx, _)| services[idx].name().to_string())
            .collect();
        return Err(KernelError::DependencyCycle(stuck));
    }
    Ok(order)
}
