// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for WAL frame decoding

#![no_main]

use libfuzzer_sys::fuzz_target;
use trail_event::codec::{decode_frame, encode, FrameOutcome};

fuzz_target!(|data: &[u8]| {
    // Walk the input as a stream of frames, the way a segment reader does.
    let mut offset = 0;
    while offset < data.len() {
        match decode_frame(&data[offset..]) {
            Ok(FrameOutcome::Complete { event, consumed }) => {
                // Anything that decodes must encode back to the same bytes.
                assert_eq!(encode(&event), &data[offset..offset + consumed]);
                offset += consumed;
            }
            Ok(FrameOutcome::Corrupt { consumed, .. }) => offset += consumed,
            Ok(FrameOutcome::Incomplete { .. }) | Err(_) => break,
        }
    }
});
