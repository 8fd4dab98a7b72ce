//! Typed metadata recorded against nodes.
//!
//! Metadata is an append-only log of `(kind, payload)` pairs, optionally
//! annotated with the call stack that recorded them. Payloads are JSON
//! values; a null payload means "nothing to record" and is silently
//! dropped, while other falsy payloads (`false`, `0`, `""`) are kept.

use serde_json::Value;

/// One metadata record.
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataEntry {
    /// Classifies the entry for downstream consumers.
    pub kind: String,
    /// Arbitrary payload. Never [`Value::Null`]; null payloads are dropped
    /// before an entry is created.
    pub data: Value,
    /// Frames captured when the entry was recorded, caller first. Present
    /// only when requested through [`MetadataOptions::stack_trace`].
    pub trace: Option<Vec<String>>,
}

/// Options accepted by [`crate::Node::add_metadata`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MetadataOptions {
    /// Capture the current execution stack alongside the entry.
    pub stack_trace: bool,
}

/// Captures the current stack as opaque frame descriptors.
///
/// Leading frames belonging to the capture machinery and to this crate are
/// elided so the first retained frame is the caller's.
pub(crate) fn capture_stack() -> Vec<String> {
    let captured = backtrace::Backtrace::new();
    let mut frames = Vec::new();
    for frame in captured.frames() {
        for symbol in frame.symbols() {
            if let Some(name) = symbol.name() {
                frames.push(name.to_string());
            }
        }
    }

    let first_caller = frames
        .iter()
        .position(|name| !name.contains("backtrace::") && !name.contains("trellis::"));
    match first_caller {
        Some(start) => frames.split_off(start),
        None => frames,
    }
}

#[cfg(test)]
mod tests {
    use super::capture_stack;

    #[test]
    fn capture_elides_internal_frames() {
        let frames = capture_stack();
        assert!(!frames.is_empty());
        assert!(
            !frames[0].contains("backtrace::"),
            "first frame should belong to the caller, got {:?}",
            frames[0]
        );
    }
}
