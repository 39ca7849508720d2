use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ember::bytecode::iseq::{BodyBuilder, IseqBody};
use ember::bytecode::op_code::OpCode;
use ember::jit::options::JitOptions;
use ember::jit::translator::compile;
use ember::runtime::value::Value;

/// A counting loop followed by `blocks` straight-line arithmetic blocks,
/// so the body mixes branch recursion with bulk linear emission.
fn build_body(blocks: usize) -> Arc<IseqBody> {
    let mut b = BodyBuilder::new("bench");
    b.params(0, 1);
    let zero = b.add_const(Value::fixnum(0));
    let one = b.add_const(Value::fixnum(1));
    let limit = b.add_const(Value::fixnum(1000));
    let ci_lt = b.add_call_info("<", 1, 0, None);
    let ci_plus = b.add_call_info("+", 1, 0, None);
    let top = b.new_label();
    let done = b.new_label();

    b.emit(OpCode::PutObject, &[zero]);
    b.emit(OpCode::SetLocal0, &[1]);
    b.place(top);
    b.emit(OpCode::GetLocal0, &[1]);
    b.emit(OpCode::PutObject, &[limit]);
    b.emit(OpCode::OptLt, &[ci_lt]);
    b.emit_branch(OpCode::BranchUnless, &[], done);
    b.emit(OpCode::GetLocal0, &[1]);
    b.emit(OpCode::PutObject, &[one]);
    b.emit(OpCode::OptPlus, &[ci_plus]);
    b.emit(OpCode::SetLocal0, &[1]);
    b.emit_branch(OpCode::Jump, &[], top);
    b.place(done);
    for _ in 0..blocks {
        b.emit(OpCode::GetLocal0, &[1]);
        b.emit(OpCode::PutObject, &[one]);
        b.emit(OpCode::OptPlus, &[ci_plus]);
        b.emit(OpCode::SetLocal0, &[1]);
    }
    b.emit(OpCode::GetLocal0, &[1]);
    b.emit(OpCode::Leave, &[]);
    b.build().unwrap()
}

fn bench_translator(c: &mut Criterion) {
    let opts = JitOptions::default();
    let mut group = c.benchmark_group("translator");

    for blocks in [8usize, 64, 256] {
        let body = build_body(blocks);
        group.throughput(Throughput::Bytes(body.iseq_size as u64));
        group.bench_with_input(BenchmarkId::new("compile", blocks), &body, |bench, body| {
            bench.iter(|| {
                let mut out = Vec::with_capacity(64 * 1024);
                let ok = compile(&mut out, black_box(body), "_emjit_bench", &opts).unwrap();
                assert!(ok);
                out
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_translator);
criterion_main!(benches);
