//! Immutable, validated dependency graph of a module's futures.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use ignis_types::{Future, FutureAction, FutureId};

use crate::{FuturesError, ModuleDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitColor {
    White,
    Gray,
    Black,
}

/// Directed acyclic graph of futures built once from a module description.
#[derive(Debug, Clone, PartialEq)]
pub struct FutureGraph {
    module_name: String,
    futures: BTreeMap<FutureId, Future>,
    dependencies: BTreeMap<FutureId, BTreeSet<FutureId>>,
    dependents: BTreeMap<FutureId, BTreeSet<FutureId>>,
    outputs: BTreeMap<String, FutureId>,
}

impl FutureGraph {
    /// Validates `description` and builds its graph.
    ///
    /// Checks, in order: module name, id ownership, uniqueness, dangling
    /// dependencies, event emitters, output targets, and finally cycles.
    pub fn build(description: ModuleDescription) -> Result<Self, FuturesError> {
        let module_name = description.name.trim().to_string();
        if module_name.is_empty() {
            return Err(FuturesError::EmptyModuleName);
        }

        let mut futures = BTreeMap::new();
        for future in description.futures {
            if future.id.module_name() != module_name {
                return Err(FuturesError::ForeignFuture {
                    future: future.id,
                    module: module_name,
                });
            }
            if futures.contains_key(&future.id) {
                return Err(FuturesError::DuplicateFuture(future.id));
            }
            futures.insert(future.id.clone(), future);
        }

        let mut dependencies = BTreeMap::new();
        let mut dependents: BTreeMap<FutureId, BTreeSet<FutureId>> = futures
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for (id, future) in &futures {
            let future_dependencies = future.dependencies();
            for dependency in &future_dependencies {
                if !futures.contains_key(dependency) {
                    return Err(FuturesError::DanglingDependency {
                        future: id.clone(),
                        dependency: dependency.clone(),
                    });
                }
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(id.clone());
            }
            if let FutureAction::ReadEventArgument { emitter, .. } = &future.action {
                let emits = futures
                    .get(emitter)
                    .is_some_and(|candidate| candidate.kind().submits_transaction());
                if !emits {
                    return Err(FuturesError::InvalidEmitter {
                        future: id.clone(),
                        emitter: emitter.clone(),
                    });
                }
            }
            dependencies.insert(id.clone(), future_dependencies);
        }

        for (key, target) in &description.outputs {
            if !futures.contains_key(target) {
                return Err(FuturesError::UnknownOutput {
                    key: key.clone(),
                    future: target.clone(),
                });
            }
        }

        if let Some(cycle) = find_cycle(&dependencies) {
            return Err(FuturesError::CyclicDependency { cycle });
        }

        tracing::debug!(
            module = %module_name,
            futures = futures.len(),
            outputs = description.outputs.len(),
            "built future graph"
        );

        Ok(Self {
            module_name,
            futures,
            dependencies,
            dependents,
            outputs: description.outputs,
        })
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    pub fn contains(&self, id: &FutureId) -> bool {
        self.futures.contains_key(id)
    }

    pub fn future(&self, id: &FutureId) -> Option<&Future> {
        self.futures.get(id)
    }

    /// Future ids in ascending lexicographic order.
    pub fn ids(&self) -> impl Iterator<Item = &FutureId> {
        self.futures.keys()
    }

    pub fn futures(&self) -> impl Iterator<Item = &Future> {
        self.futures.values()
    }

    pub fn dependencies_of(&self, id: &FutureId) -> Option<&BTreeSet<FutureId>> {
        self.dependencies.get(id)
    }

    pub fn dependents_of(&self, id: &FutureId) -> Option<&BTreeSet<FutureId>> {
        self.dependents.get(id)
    }

    /// Every future reachable from `id` along dependent edges, excluding `id`.
    pub fn transitive_dependents(&self, id: &FutureId) -> BTreeSet<FutureId> {
        let mut reached = BTreeSet::new();
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents.get(&current).into_iter().flatten() {
                if reached.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }
        reached
    }

    pub fn outputs(&self) -> &BTreeMap<String, FutureId> {
        &self.outputs
    }
}

/// Depth-first white/gray/black search; a back-edge to a gray node is a cycle.
///
/// Returns the cycle path in traversal order, closed by repeating its first id.
pub(crate) fn find_cycle(
    dependencies: &BTreeMap<FutureId, BTreeSet<FutureId>>,
) -> Option<Vec<FutureId>> {
    let mut colors: HashMap<&FutureId, VisitColor> = dependencies
        .keys()
        .map(|id| (id, VisitColor::White))
        .collect();

    for id in dependencies.keys() {
        if colors.get(id).copied() == Some(VisitColor::White) {
            if let Some(cycle) = visit(id, dependencies, &mut colors) {
                return Some(cycle);
            }
        }
    }
    None
}

type Edges<'a> = std::iter::Flatten<std::option::IntoIter<&'a BTreeSet<FutureId>>>;

/// Iterative so module depth is bounded by memory, not the thread stack.
/// The frame stack is the current gray path.
fn visit<'a>(
    root: &'a FutureId,
    dependencies: &'a BTreeMap<FutureId, BTreeSet<FutureId>>,
    colors: &mut HashMap<&'a FutureId, VisitColor>,
) -> Option<Vec<FutureId>> {
    let edges = |id: &'a FutureId| -> Edges<'a> { dependencies.get(id).into_iter().flatten() };
    let mut frames: Vec<(&'a FutureId, Edges<'a>)> = vec![(root, edges(root))];
    colors.insert(root, VisitColor::Gray);

    while let Some((_, remaining)) = frames.last_mut() {
        let Some(dependency) = remaining.next() else {
            if let Some((finished, _)) = frames.pop() {
                colors.insert(finished, VisitColor::Black);
            }
            continue;
        };
        match colors.get(dependency).copied().unwrap_or(VisitColor::Black) {
            VisitColor::Gray => {
                let start = frames
                    .iter()
                    .position(|(candidate, _)| *candidate == dependency)
                    .unwrap_or_default();
                let mut cycle: Vec<FutureId> = frames[start..]
                    .iter()
                    .map(|(entry, _)| (*entry).clone())
                    .collect();
                cycle.push(dependency.clone());
                return Some(cycle);
            }
            VisitColor::White => {
                colors.insert(dependency, VisitColor::Gray);
                frames.push((dependency, edges(dependency)));
            }
            VisitColor::Black => {}
        }
    }
    None
}
