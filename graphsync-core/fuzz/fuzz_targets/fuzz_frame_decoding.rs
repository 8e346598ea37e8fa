#![no_main]

use graphsync_core::communicate::{Framing, Message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for compress in [false, true] {
        if let Ok(text) = Framing::new(compress).decode(data) {
            let _ = Message::parse(&text);
        }
    }
});
