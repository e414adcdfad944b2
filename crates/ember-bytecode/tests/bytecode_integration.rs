//! Integration tests for prototype assembly, verification and streaming
//!
//! These tests build small but realistic prototype trees with the builder
//! and push them through the verifier and the closure stream format.

use ember_bytecode::{
    decode_proto, encode_proto, verify_proto, CmpOp, FunctionBuilder, FunctionProto, Literal,
    OuterSource, SerializeError, VerifyError,
};

/// function counter(limit) { for (i = 0; i < limit; i++) yield i; }
fn counter_generator() -> FunctionProto {
    let mut b = FunctionBuilder::new("counter");
    b.generator();
    let limit = b.param("limit");
    b.line(1);
    b.load_int(2, 0);
    let top = b.pos();
    b.cmp(CmpOp::Lt, 3, 2, limit);
    let exit = b.jz(3);
    b.line(2);
    b.yield_value(2);
    b.load_int(4, 1);
    b.add(2, 2, 4);
    b.jmp_to(top);
    b.patch_jump(exit);
    b.ret_null();
    b.build()
}

fn program() -> FunctionProto {
    let mut adder = FunctionBuilder::new("adder");
    let y = adder.param("y");
    let x = adder.outer_local("x", 1);
    adder.get_outer(2, x);
    adder.add(2, 2, y);
    adder.ret(2);

    let mut main = FunctionBuilder::new("main");
    main.source("main.nut");
    main.line(1);
    main.load_int(1, 40);
    let adder_idx = main.function(adder.build());
    let gen_idx = main.function(counter_generator());
    main.closure(2, adder_idx);
    main.closure(3, gen_idx);
    main.load_root(4);
    main.load_int(5, 2);
    main.call(6, 2, 4, 2);
    main.ret(6);
    main.build()
}

#[test]
fn test_program_verifies() {
    assert_eq!(verify_proto(&program()), Ok(()));
}

#[test]
fn test_stream_preserves_tree() {
    let proto = program();
    let bytes = encode_proto(&proto);
    let decoded = decode_proto(&bytes).expect("decode");

    assert_eq!(decoded, proto);
    assert_eq!(decoded.functions.len(), 2);
    assert!(decoded.functions[1].is_generator);
    assert_eq!(
        decoded.functions[0].outer_values[0].source,
        OuterSource::Local(1)
    );
    assert_eq!(decoded.line_for(0), Some(1));
    assert_eq!(verify_proto(&decoded), Ok(()));
}

#[test]
fn test_nested_sentinel_corruption() {
    let proto = program();
    let mut bytes = encode_proto(&proto);

    // Locate the PART sentinel that opens the first nested function: it is
    // the eighth PART in the stream (seven sections of main come first).
    let part = 0x5452_4150u32.to_le_bytes();
    let positions: Vec<usize> = bytes
        .windows(4)
        .enumerate()
        .filter(|(_, w)| *w == part)
        .map(|(i, _)| i)
        .collect();
    let nested = positions[7];
    bytes[nested + 3] = 0;

    match decode_proto(&bytes) {
        Err(SerializeError::SentinelMismatch { offset, .. }) => assert_eq!(offset, nested),
        other => panic!("expected sentinel mismatch, got {:?}", other),
    }
}

#[test]
fn test_string_literal_payload() {
    let mut b = FunctionBuilder::new("s");
    b.load(1, "héllo wörld");
    b.ret(1);
    let proto = b.build();
    let decoded = decode_proto(&encode_proto(&proto)).unwrap();
    assert_eq!(decoded.literals, vec![Literal::from("héllo wörld")]);
}

#[test]
fn test_verifier_rejects_call_past_frame() {
    let mut b = FunctionBuilder::new("bad");
    b.call(1, 0, 0, 1);
    b.ret(1);
    let mut proto = b.build();
    proto.instructions[0].arg3 = 40;
    assert!(matches!(
        verify_proto(&proto),
        Err(VerifyError::InvalidRegister { .. })
    ));
}

#[test]
fn test_disassembly_lists_every_function() {
    let text = program().disassemble();
    assert!(text.contains("function main(this)"));
    assert!(text.contains("function adder(this, y)"));
    assert!(text.contains("generator"));
    assert!(text.contains("YIELD"));
}
