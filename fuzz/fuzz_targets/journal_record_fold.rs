#![no_main]

use ignis_journal::ExecutionState;
use ignis_types::JournalRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let records: Vec<JournalRecord> = raw
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    let Ok(first) = ExecutionState::fold(&records) else {
        return;
    };
    let second = ExecutionState::fold(&records).expect("fold is deterministic");
    assert_eq!(first.last_sequence(), second.last_sequence());
    assert_eq!(first.len(), second.len());
    for (id, execution) in first.iter() {
        assert_eq!(second.get(id), Some(execution));
    }
});
