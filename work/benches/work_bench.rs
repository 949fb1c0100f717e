use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use harbor_messages::MessageKind;
use harbor_work::{validate_work, KindThresholds, WorkGenerator};

fn bench_token_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_generation");
    let thresholds = KindThresholds::new();
    let input = [0x42u8; 33];

    for kind in [
        MessageKind::Ping,
        MessageKind::Application,
        MessageKind::HandshakeRequest,
    ] {
        let difficulty = thresholds.threshold_for(kind);
        group.bench_with_input(BenchmarkId::new("generate", kind), &difficulty, |b, &diff| {
            b.iter(|| black_box(WorkGenerator.generate(black_box(&input), diff).unwrap()));
        });
    }

    group.finish();
}

fn bench_token_validation(c: &mut Criterion) {
    let challenge = [0x42u8; 32];
    c.bench_function("validate_ping", |b| {
        b.iter(|| {
            black_box(validate_work(
                MessageKind::Ping,
                black_box(&challenge),
                black_box(12345),
                black_box(1_000),
            ))
        });
    });
}

criterion_group!(benches, bench_token_generation, bench_token_validation);
criterion_main!(benches);
