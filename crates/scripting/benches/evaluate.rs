//! Evaluator benchmarks
//!
//! Run with: cargo bench -p mush-scripting

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mush_core::{Dbref, Identities};
use mush_scripting::{EvalFlags, EvalLimits, MemoryWorld, ObjectRecord, Session};

const PLAYER: Dbref = Dbref(1);

fn setup() -> (Session, MemoryWorld) {
    let world = MemoryWorld::new();
    world.add_object(ObjectRecord::new(1, "Bencher"));
    world.set_attribute(PLAYER, "FIB", "[switch(%0,0,0,1,1,[add(u(me/FIB,sub(%0,1)),u(me/FIB,sub(%0,2)))])]");
    (Session::with_builtins(EvalLimits::default()), world)
}

fn bench_evaluate(c: &mut Criterion) {
    let (session, world) = setup();
    let ev = session.evaluator(&world);
    let who = Identities::solo(PLAYER);

    let mut group = c.benchmark_group("evaluate");

    let plain = "The quick brown fox jumps over the lazy dog. ".repeat(20);
    group.bench_function("plain_text", |b| {
        b.iter(|| {
            let mut ctx = session.new_context();
            black_box(ev.evaluate(&mut ctx, black_box(&plain), who, EvalFlags::DEFAULT))
        })
    });

    group.bench_function("nested_arithmetic", |b| {
        b.iter(|| {
            let mut ctx = session.new_context();
            black_box(ev.evaluate(
                &mut ctx,
                black_box("[add(mul(2,3),sub(10,[div(9,3)]),abs(-4))]"),
                who,
                EvalFlags::DEFAULT,
            ))
        })
    });

    group.bench_function("iter_registers", |b| {
        b.iter(|| {
            let mut ctx = session.new_context();
            black_box(ev.evaluate(
                &mut ctx,
                black_box("[iter(a b c d e f g h,[setq(x,%i0)][ucstr(%qx)]:[inum(0)])]"),
                who,
                EvalFlags::DEFAULT,
            ))
        })
    });

    group.bench_function("recursive_ufun", |b| {
        b.iter(|| {
            session.begin_command();
            let mut ctx = session.new_context();
            black_box(ev.evaluate(&mut ctx, black_box("[u(me/FIB,10)]"), who, EvalFlags::DEFAULT))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_evaluate);
criterion_main!(benches);
