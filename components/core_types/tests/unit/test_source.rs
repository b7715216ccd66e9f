//! Unit tests for chunk naming and stack frame records

use core_types::{chunk_id, FrameKind, StackFrame};

#[test]
fn test_literal_source_names() {
    assert_eq!(chunk_id(b"=[C]"), "[C]");
    assert_eq!(chunk_id(b"=?"), "?");
}

#[test]
fn test_file_source_names() {
    assert_eq!(chunk_id(b"@scripts/init.lua"), "scripts/init.lua");
}

#[test]
fn test_string_source_names() {
    assert_eq!(chunk_id(b"print(1)"), "[string \"print(1)\"]");
    let long = "x".repeat(80);
    let id = chunk_id(long.as_bytes());
    assert!(id.starts_with("[string \"xxx"));
    assert!(id.ends_with("...\"]"));
}

#[test]
fn test_native_frame_location() {
    let frame = StackFrame {
        short_src: "[C]".to_string(),
        current_line: None,
        name: None,
        name_what: "",
        kind: FrameKind::Native,
        line_defined: 0,
        is_tail_call: false,
    };
    assert_eq!(frame.location(), "[C]:");
    assert_eq!(frame.kind.as_str(), "C");
}
