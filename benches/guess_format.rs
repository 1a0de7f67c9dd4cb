use std::fmt::Write;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tablecast::guess::{self, FormatOverrides};
use tablecast::io_utils;

fn generate_report(rows: usize) -> Vec<u8> {
    let mut text = String::from("ACME order export\n\n");
    text.push_str("id,ordered_on,amount,status\n");
    for i in 0..rows {
        let status = match i % 3 {
            0 => "shipped",
            1 => "pending",
            _ => "processing",
        };
        let day = (i % 28) + 1;
        writeln!(
            text,
            "{i},2024-01-{day:02},{}.{:02},{status}",
            i % 900,
            i % 100
        )
        .expect("row");
    }
    text.push('\n');
    text.into_bytes()
}

fn bench_guess_format(c: &mut Criterion) {
    let bytes = generate_report(5_000);
    let overrides = FormatOverrides::default();

    let mut group = c.benchmark_group("guess_format");

    group.bench_function("sampled_200", |b| {
        b.iter_batched(
            || {
                let mut candidates = io_utils::decode_candidates(&bytes);
                for (_, lines) in &mut candidates {
                    lines.truncate(200);
                }
                candidates
            },
            |candidates| {
                let tree = guess::guess_text_format(candidates, &overrides).expect("guess tree");
                tree.resolve_first().expect("resolve");
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("full_scan", |b| {
        b.iter_batched(
            || io_utils::decode_candidates(&bytes),
            |candidates| {
                let tree = guess::guess_text_format(candidates, &overrides).expect("guess tree");
                tree.resolve_first().expect("resolve");
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_guess_format);
criterion_main!(benches);
