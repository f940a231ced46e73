#![no_main]

use libfuzzer_sys::fuzz_target;
use ws_relay_client::protocol::{decode_frame, Frame};
use ws_relay_client::Dispatcher;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Anything that decodes must re-encode to a frame addressed to the same key.
    if let Some((key, payload)) = decode_frame(text) {
        let encoded = Frame::new(&key, payload).encode().unwrap_or_default();
        assert_eq!(decode_frame(&encoded).map(|(k, _)| k), Some(key));
    }

    // Dispatch of arbitrary input must never panic.
    let dispatcher = Dispatcher::new();
    let _ = dispatcher.subscribe("game", "update_state", |_| {});
    dispatcher.handle_frame(text);
});
