#![no_main]

use graphsync_core::codec::{decode, Snapshot};
use graphsync_core::sync::{diff, Delta};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Whatever parses must decode or fail cleanly, never panic
    if let Ok(snapshot) = Snapshot::from_json(text) {
        if let Ok((graph, _)) = decode(&snapshot, None) {
            let _ = graph.len();
        }
        assert!(diff(&snapshot, &snapshot).is_empty());
    }

    let _ = serde_json::from_str::<Delta>(text);
});
