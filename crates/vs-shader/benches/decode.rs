//! Benchmarks for instruction decoding and code generation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vs_core::ShaderBackend;
use vs_shader::decoder::decode_phase;
use vs_shader::recompiler::analyze;
use vs_shader::translator::generate;
use vs_shader::types::{Phase, ProgramType};
use vs_shader::{Program, ProgramBuilder, TranslateOptions};

/// `VMOV.f32 o<n>.xyzw, pa<n>.xyzw`
fn vmov(n: u64) -> u64 {
    (0b00111u64 << 59) | (5 << 40) | (4 << 35) | (1 << 32) | (2 << 30) | (0xF << 24) | (n << 18) | (n << 6)
}

/// `NOP`
const NOP: u64 = (0b11111u64 << 59) | (0b101 << 38);

fn stream(len: usize) -> Vec<u64> {
    (0..len)
        .map(|i| if i % 4 == 3 { NOP } else { vmov((i % 32) as u64) })
        .collect()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for len in [16usize, 256, 4096].iter() {
        let words = stream(*len);
        group.throughput(Throughput::Elements(*len as u64));

        group.bench_with_input(BenchmarkId::new("decode_phase", len), &words, |b, words| {
            b.iter(|| black_box(decode_phase(black_box(words), Phase::Primary, ProgramType::Vertex)));
        });

        let decoded = decode_phase(&words, Phase::Primary, ProgramType::Vertex).unwrap();
        group.bench_with_input(BenchmarkId::new("analyze", len), &decoded, |b, decoded| {
            b.iter(|| black_box(analyze(black_box(decoded))));
        });
    }

    group.finish();
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");
    let blob = ProgramBuilder::new(ProgramType::Vertex).primary(&stream(256)).build();
    let program = Program::load(&blob).unwrap();

    for backend in [ShaderBackend::Glsl, ShaderBackend::Spirv] {
        let options = TranslateOptions {
            backend,
            ..TranslateOptions::default()
        };
        group.bench_with_input(BenchmarkId::new("backend", format!("{:?}", backend)), &options, |b, options| {
            b.iter(|| black_box(generate(&program, options, None)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_generate);
criterion_main!(benches);
