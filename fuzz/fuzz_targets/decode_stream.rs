#![no_main]

use libfuzzer_sys::fuzz_target;

const MAX_INPUT_SIZE: usize = 256 * 1024;

fuzz_target!(|data: &[u8]| {
    // Never panic or spin on arbitrary debuggee output. Every decoded frame
    // consumes at least one newline-terminated line.
    let input = &data[..data.len().min(MAX_INPUT_SIZE)];
    let frames = strela_wire::decode_stream_bytes(input);
    assert!(frames <= input.len());
});
