use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vocalize_core::voice_bank::placeholder_vector;
use vocalize_core::voice_manager::{display_name, language_for};
use vocalize_core::{resolve_alias, validate_style_vector, STYLE_DIM};

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("style_vector_validation");

    let good: Vec<f32> = (0..STYLE_DIM)
        .map(|i| ((i as f32) * 0.13).sin() * 0.25 + 0.08)
        .collect();
    let zeros = vec![0.0f32; STYLE_DIM];

    group.bench_function("valid", |b| {
        b.iter(|| black_box(validate_style_vector(black_box(&good))));
    });

    group.bench_function("near_zero", |b| {
        b.iter(|| black_box(validate_style_vector(black_box(&zeros))));
    });

    group.bench_function("placeholder", |b| {
        b.iter(|| black_box(placeholder_vector()));
    });

    group.finish();
}

fn bench_voice_names(c: &mut Criterion) {
    let mut group = c.benchmark_group("voice_names");

    group.bench_function("resolve_alias", |b| {
        b.iter(|| {
            for name in ["bella", "Fenrir", "af_heart", "zzz_unknown", "default"] {
                black_box(resolve_alias(black_box(name)));
            }
        });
    });

    group.bench_function("describe", |b| {
        b.iter(|| {
            for id in ["af_bella", "bm_george", "jf_alpha", "custom_voice"] {
                black_box((display_name(black_box(id)), language_for(black_box(id))));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_validation, bench_voice_names);
criterion_main!(benches);
