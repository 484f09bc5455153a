//! Fuzz testing for tree initialization.
//!
//! Feeds arbitrary bytes to `BucketTree::new` as both storages. The tree
//! must refuse garbage with an error: never panic, never hand out a
//! visitor over an inconsistent index. When initialization does succeed,
//! a few lookups are driven to make sure the search paths handle
//! whatever geometry the input happened to encode.

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use bktr::{BucketTree, GlobalNodeAllocator};

#[derive(Debug, Arbitrary)]
struct InitInput {
    node_size_shift: u8,
    entry_size: u8,
    entry_count: i32,
    end_offset: i64,
    node_storage: Vec<u8>,
    entry_storage: Vec<u8>,
    probes: Vec<i64>,
}

fuzz_target!(|input: InitInput| {
    // Mostly-valid geometry finds deeper paths than rejecting at the
    // front door every time.
    let node_size = 1usize << (input.node_size_shift % 16);
    let entry_size = input.entry_size as usize;

    let tree = BucketTree::new(
        Arc::new(GlobalNodeAllocator),
        input.node_storage,
        input.entry_storage,
        node_size,
        entry_size,
        input.entry_count,
    );

    let Ok(mut tree) = tree else { return };
    let _ = tree.set_end_offset(node_size, input.end_offset);

    for &probe in input.probes.iter().take(16) {
        match tree.find(probe) {
            Ok(visitor) => {
                // Whatever the index claimed, the entry handed back must
                // actually cover the probe.
                let entry = visitor.get();
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&entry[..8]);
                assert!(i64::from_le_bytes(raw) <= probe);
            }
            Err(_) => {}
        }
    }
});
