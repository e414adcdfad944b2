use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ember_bytecode::{decode_proto, encode_proto, FunctionBuilder, FunctionProto};

fn wide_proto(functions: usize) -> FunctionProto {
    let mut main = FunctionBuilder::new("main");
    for i in 0..functions {
        let mut f = FunctionBuilder::new(format!("f{}", i));
        let a = f.param("a");
        f.load(2, format!("literal {}", i).as_str());
        f.add(2, 2, a);
        f.ret(2);
        let idx = main.function(f.build());
        main.closure(1, idx);
    }
    main.ret(1);
    main.build()
}

fn bench_encode(c: &mut Criterion) {
    let proto = wide_proto(64);
    c.bench_function("encode_proto_64", |b| {
        b.iter(|| encode_proto(black_box(&proto)));
    });
}

fn bench_decode(c: &mut Criterion) {
    let bytes = encode_proto(&wide_proto(64));
    c.bench_function("decode_proto_64", |b| {
        b.iter(|| decode_proto(black_box(&bytes)).unwrap());
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
