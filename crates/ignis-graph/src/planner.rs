//! Kahn layering of a future graph into concurrently executable batches.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ignis_types::FutureId;

use crate::graph::find_cycle;
use crate::{FutureGraph, FuturesError};

/// Ordered batch sequence; every dependency of a batch member sits in an earlier batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    batches: Vec<Vec<FutureId>>,
}

impl ExecutionPlan {
    pub fn batches(&self) -> &[Vec<FutureId>] {
        &self.batches
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Zero-based index of the batch containing `id`.
    pub fn batch_index_of(&self, id: &FutureId) -> Option<usize> {
        self.batches.iter().position(|batch| batch.contains(id))
    }

    /// Every planned id in execution order.
    pub fn ordered_ids(&self) -> impl Iterator<Item = &FutureId> {
        self.batches.iter().flatten()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, batch) in self.batches.iter().enumerate() {
            let members = batch
                .iter()
                .map(FutureId::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "batch {}: {members}", index + 1)?;
        }
        Ok(())
    }
}

/// Orders `graph` into batches, ties broken by ascending id.
pub fn plan(graph: &FutureGraph) -> Result<ExecutionPlan, FuturesError> {
    let mut remaining_dependencies: BTreeMap<&FutureId, usize> = BTreeMap::new();
    for id in graph.ids() {
        let dependencies = graph.dependencies_of(id).into_iter().flatten();
        let mut count = 0usize;
        for dependency in dependencies {
            if !graph.contains(dependency) {
                return Err(FuturesError::DanglingDependency {
                    future: id.clone(),
                    dependency: dependency.clone(),
                });
            }
            count += 1;
        }
        remaining_dependencies.insert(id, count);
    }

    let mut ready: BTreeSet<&FutureId> = remaining_dependencies
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut batches = Vec::new();
    let mut planned = 0usize;

    while !ready.is_empty() {
        let batch: Vec<&FutureId> = ready.iter().copied().collect();
        let mut next = BTreeSet::new();
        for id in &batch {
            for dependent in graph.dependents_of(id).into_iter().flatten() {
                if let Some(count) = remaining_dependencies.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        next.insert(dependent);
                    }
                }
            }
        }
        planned += batch.len();
        batches.push(batch.into_iter().cloned().collect());
        ready = next;
    }

    if planned < graph.len() {
        let residue: BTreeMap<FutureId, BTreeSet<FutureId>> = remaining_dependencies
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| {
                let dependencies = graph.dependencies_of(id).cloned().unwrap_or_default();
                ((*id).clone(), dependencies)
            })
            .collect();
        let cycle = find_cycle(&restrict(&residue)).unwrap_or_else(|| residue.keys().cloned().collect());
        return Err(FuturesError::CyclicDependency { cycle });
    }

    Ok(ExecutionPlan { batches })
}

fn restrict(
    residue: &BTreeMap<FutureId, BTreeSet<FutureId>>,
) -> BTreeMap<FutureId, BTreeSet<FutureId>> {
    residue
        .iter()
        .map(|(id, dependencies)| {
            let kept = dependencies
                .iter()
                .filter(|dependency| residue.contains_key(*dependency))
                .cloned()
                .collect();
            (id.clone(), kept)
        })
        .collect()
}
