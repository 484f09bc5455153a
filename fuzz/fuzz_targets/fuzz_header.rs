//! Fuzz testing for the on-disk descriptors.
//!
//! Header and node-header verification must classify arbitrary bytes
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

use bktr::{Header, NodeHeader};

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = Header::from_bytes(data) {
        let _ = header.verify();
        let _ = header.entry_count();
    }

    if let Ok(header) = NodeHeader::from_bytes(data) {
        for node_size in [1024usize, 16384] {
            let _ = header.verify(0, node_size, 8);
            let _ = header.verify(header.index(), node_size, 16);
        }
    }
});
