//! Runtime flip state shared between the control handler and the publisher loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Last-write-wins boolean. Clones share the same cell.
#[derive(Clone, Debug, Default)]
pub struct FlipController {
    flipped: Arc<AtomicBool>,
}

impl FlipController {
    pub fn new(initial: bool) -> Self {
        Self {
            flipped: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn set(&self, value: bool) {
        let previous = self.flipped.swap(value, Ordering::AcqRel);
        if previous != value {
            log::info!("Set flip mode to: {}", if value { "on" } else { "off" });
        }
    }

    pub fn get(&self) -> bool {
        self.flipped.load(Ordering::Acquire)
    }
}

/// Parse a control payload into a flip value.
///
/// Accepts `true`/`false`, `1`/`0`, `on`/`off` (any case, surrounding
/// whitespace ignored), a bare JSON boolean, or `{"data": <bool>}`.
pub fn parse_flip_payload(payload: &[u8]) -> Option<bool> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    match text.to_lowercase().as_str() {
        "true" | "1" | "on" => return Some(true),
        "false" | "0" | "off" => return Some(false),
        _ => {}
    }
    match serde_json::from_str::<serde_json::Value>(text).ok()? {
        serde_json::Value::Bool(value) => Some(value),
        serde_json::Value::Object(map) => map.get("data")?.as_bool(),
        _ => None,
    }
}
