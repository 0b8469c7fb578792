#![no_main]

use ignis_graph::{plan, FutureGraph, ModuleDescription};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(description) = ModuleDescription::from_json_str(&raw) else {
        return;
    };
    let Ok(graph) = FutureGraph::build(description) else {
        return;
    };
    let plan = plan(&graph).expect("acyclic graph must plan");
    assert_eq!(plan.ordered_ids().count(), graph.len());
    for id in plan.ordered_ids() {
        let batch = plan.batch_index_of(id).expect("planned id has a batch");
        for dependency in graph.dependencies_of(id).into_iter().flatten() {
            let dependency_batch = plan.batch_index_of(dependency).expect("dependency planned");
            assert!(dependency_batch < batch, "{dependency} not before {id}");
        }
    }
});
