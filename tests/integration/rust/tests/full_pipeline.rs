//! Integration tests: source text -> front end -> prototype -> execution
//!
//! The runtime ships without a parser. These tests plug in a tiny front end
//! for `return <integer>` chunks and drive the full load/dump/run cycle.

use bytecode_system::{Constant, OpCode, ProtoBuilder, Prototype};
use core_types::Status;
use interpreter::{Compiler, State};
use memory_manager::MULTRET;

struct ReturnInteger;

impl Compiler for ReturnInteger {
    fn compile(&mut self, source: &[u8], chunkname: &str) -> Result<Prototype, String> {
        let text = String::from_utf8_lossy(source);
        let name = chunkname.trim_start_matches(['=', '@']);
        let value = text
            .trim()
            .strip_prefix("return ")
            .and_then(|rest| rest.trim().parse::<i64>().ok())
            .ok_or_else(|| format!("{}:1: unexpected symbol near '{}'", name, text.trim()))?;
        let mut b = ProtoBuilder::main(chunkname);
        let k = b.constant(Constant::Integer(value));
        b.abx(OpCode::LoadK, 0, k);
        b.abc(OpCode::Return, 0, 2, 1, false);
        Ok(b.build())
    }
}

fn state_with_front_end() -> State {
    let mut state = State::new();
    state.set_compiler(Box::new(ReturnInteger));
    state
}

#[test]
fn test_text_chunk_runs() {
    let mut state = state_with_front_end();
    assert_eq!(state.load(b"return 42", "=answer", None), Status::Ok);
    state.call(0, 1).unwrap();
    assert_eq!(state.to_integer(-1), Some(42));
}

#[test]
fn test_front_end_errors_are_syntax_errors() {
    let mut state = state_with_front_end();
    assert_eq!(state.load(b"return x", "=bad", None), Status::Syntax);
    assert_eq!(
        state.to_str(-1).as_deref(),
        Some("bad:1: unexpected symbol near 'return x'")
    );
}

#[test]
fn test_binary_only_mode_rejects_text() {
    let mut state = state_with_front_end();
    assert_eq!(state.load(b"return 1", "=t", Some("b")), Status::Syntax);
    assert_eq!(
        state.to_str(-1).as_deref(),
        Some("attempt to load a text chunk (mode is 'b')")
    );
}

#[test]
fn test_dump_and_reload_compiled_chunk() {
    let mut state = state_with_front_end();
    assert_eq!(state.load(b"return 7", "=seven", None), Status::Ok);
    let stripped = state.dump(true).unwrap();
    let full = state.dump(false).unwrap();
    assert!(stripped.len() < full.len());
    state.pop(1).unwrap();

    // a fresh state without a front end can still run the binary form
    let mut other = State::new();
    assert_eq!(other.load(&stripped, "=seven", None), Status::Ok);
    assert_eq!(other.pcall(0, MULTRET, 0), Status::Ok);
    assert_eq!(other.to_integer(-1), Some(7));
}

#[test]
fn test_stripped_chunk_loses_line_information() {
    let mut state = state_with_front_end();
    assert_eq!(state.load(b"return 1", "=lines", None), Status::Ok);
    let stripped = state.dump(true).unwrap();
    let proto = bytecode_system::chunk::undump(&stripped).unwrap();
    assert!(proto.line_info.is_empty());
    assert!(proto.source.is_none());
}
