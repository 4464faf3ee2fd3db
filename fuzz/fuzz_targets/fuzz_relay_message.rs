#![no_main]

use coderoom_client::protocol::RelayMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw bytes exercise serde_json's own UTF-8 validation.
    let _ = serde_json::from_slice::<RelayMessage>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(msg) = serde_json::from_str::<RelayMessage>(s) {
            // Anything that parses must survive a re-encode.
            let json = serde_json::to_string(&msg).unwrap_or_default();
            let again: Result<RelayMessage, _> = serde_json::from_str(&json);
            assert_eq!(again.ok().as_ref(), Some(&msg));
        }
    }
});
