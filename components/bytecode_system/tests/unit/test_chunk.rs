//! Tests for binary chunk dump/undump

use bytecode_system::{chunk, ChunkError, Constant, OpCode, ProtoBuilder, Prototype, UpvalueDesc};

fn sample_proto() -> Prototype {
    let mut main = ProtoBuilder::main("@sample.lua");
    main.set_line(2);
    let k_name = main.string("greeting");
    let k_text = main.constant(Constant::string("hello"));
    main.abx(OpCode::LoadK, 0, k_text);
    main.abc(OpCode::SetTabUp, 0, k_name, 0, false);
    main.set_line(3);
    let mut inner = ProtoBuilder::function(3).params(1, false).max_stack(3);
    inner.upvalue(UpvalueDesc::outer("_ENV", 0));
    let k_float = inner.constant(Constant::Float(2.5));
    inner.set_line(4);
    inner.abx(OpCode::LoadK, 1, k_float);
    inner.abc(OpCode::Add, 0, 0, 1, false);
    inner.abc(OpCode::Return1, 0, 0, 0, false);
    inner.local("x", 0, 3);
    let child = main.child(inner.last_line(5).build());
    main.abx(OpCode::Closure, 1, child);
    main.set_line(6);
    main.abc(OpCode::Return, 0, 1, 1, false);
    main.local("f", 4, 5);
    main.constant(Constant::Integer(-7));
    main.constant(Constant::Boolean(true));
    main.constant(Constant::Nil);
    main.constant(Constant::String(vec![b'z'; 100]));
    main.max_stack(2).build()
}

#[test]
fn test_round_trip_preserves_code_and_constants() {
    let proto = sample_proto();
    let bytes = chunk::dump(&proto, false);
    let loaded = chunk::undump(&bytes).unwrap();
    assert_eq!(loaded.code, proto.code);
    assert_eq!(loaded.constants, proto.constants);
    assert_eq!(loaded.line_info, proto.line_info);
    assert_eq!(loaded.abs_line_info, proto.abs_line_info);
    assert_eq!(loaded.loc_vars, proto.loc_vars);
    assert_eq!(loaded.upvalues, proto.upvalues);
    assert_eq!(loaded.protos.len(), 1);
    assert_eq!(loaded.protos[0].code, proto.protos[0].code);
    assert_eq!(loaded.protos[0].constants, proto.protos[0].constants);
    assert_eq!(loaded.protos[0].line_info, proto.protos[0].line_info);
}

#[test]
fn test_round_trip_is_byte_stable() {
    let bytes = chunk::dump(&sample_proto(), false);
    let again = chunk::dump(&chunk::undump(&bytes).unwrap(), false);
    assert_eq!(bytes, again);
}

#[test]
fn test_child_inherits_source() {
    let loaded = chunk::undump(&chunk::dump(&sample_proto(), false)).unwrap();
    assert_eq!(loaded.protos[0].source.as_deref(), Some(&b"@sample.lua"[..]));
}

#[test]
fn test_strip_drops_debug_info() {
    let proto = sample_proto();
    let stripped = chunk::dump(&proto, true);
    assert!(stripped.len() < chunk::dump(&proto, false).len());
    let loaded = chunk::undump(&stripped).unwrap();
    assert!(loaded.source.is_none());
    assert!(loaded.line_info.is_empty());
    assert!(loaded.loc_vars.is_empty());
    assert!(loaded.upvalues.iter().all(|u| u.name.is_none()));
    assert_eq!(loaded.code, proto.code);
}

#[test]
fn test_wrong_size_byte_fails_fast() {
    let mut bytes = chunk::dump(&sample_proto(), false);
    bytes[14] = 4;
    assert_eq!(
        chunk::undump(&bytes),
        Err(ChunkError::SizeMismatch("lua_Number"))
    );
}

#[test]
fn test_truncation_anywhere_is_reported() {
    let bytes = chunk::dump(&sample_proto(), false);
    for cut in [0, 5, 20, 31, bytes.len() / 2, bytes.len() - 1] {
        assert!(chunk::undump(&bytes[..cut]).is_err(), "cut at {}", cut);
    }
}

#[test]
fn test_bad_opcode_rejected() {
    let mut proto = Prototype::new();
    proto.code.push(bytecode_system::Instruction(0x7f));
    let bytes = chunk::dump(&proto, true);
    assert_eq!(chunk::undump(&bytes), Err(ChunkError::BadOpcode(0x7f, 0)));
}

#[test]
fn test_is_binary() {
    assert!(chunk::is_binary(b"\x1bLua"));
    assert!(!chunk::is_binary(b"return 1"));
    assert!(!chunk::is_binary(b""));
}
