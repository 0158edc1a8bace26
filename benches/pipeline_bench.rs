/// Pipeline benchmarks
///
/// Measures the two hot paths that run on every chunk arrival: cumulative
/// buffer maintenance and confirmed/tentative text diffing.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cumulative_stt::{CumulativeBuffer, TextDiffer};

const SAMPLE_RATE: u32 = 16_000;
const BYTES_PER_SAMPLE: usize = 2;

fn pcm_chunk(duration_secs: f64) -> Vec<u8> {
    let n_samples = (SAMPLE_RATE as f64 * duration_secs) as usize;
    (0..n_samples)
        .flat_map(|i| ((i % 1000) as i16).to_le_bytes())
        .collect()
}

fn bench_buffer_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_append");

    for &chunk_secs in &[0.1, 0.5, 1.0] {
        let chunk = pcm_chunk(chunk_secs);
        group.bench_with_input(
            BenchmarkId::new("append", format!("{chunk_secs}s_chunk")),
            &chunk,
            |b, chunk| {
                b.iter(|| {
                    let mut buffer = CumulativeBuffer::new(
                        30 * SAMPLE_RATE as usize * BYTES_PER_SAMPLE,
                        5 * SAMPLE_RATE as usize * BYTES_PER_SAMPLE,
                        224,
                    );
                    buffer.append(black_box(chunk.clone())).unwrap();
                    black_box(buffer.snapshot());
                });
            },
        );
    }

    group.finish();
}

fn bench_buffer_trim_under_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_trim");

    group.bench_function("append_past_max_audio_30s", |b| {
        let max_bytes = 30 * SAMPLE_RATE as usize * BYTES_PER_SAMPLE;
        let overlap_bytes = 5 * SAMPLE_RATE as usize * BYTES_PER_SAMPLE;
        let chunk = pcm_chunk(1.0);

        b.iter(|| {
            let mut buffer = CumulativeBuffer::new(max_bytes, overlap_bytes, 224);
            for _ in 0..40 {
                buffer.append(black_box(chunk.clone())).unwrap();
            }
            black_box(buffer.total_bytes());
        });
    });

    group.finish();
}

fn bench_text_diff_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_diff");

    let sentences: Vec<String> = (0..50)
        .map(|i| format!("これは{i}番目の文です。"))
        .collect();

    for &n in &[1usize, 10, 50] {
        let prefix: String = sentences[..n].concat();
        group.bench_with_input(BenchmarkId::new("update", n), &prefix, |b, prefix| {
            b.iter(|| {
                let mut differ = TextDiffer::new();
                differ.update(black_box(prefix));
                black_box(differ.confirmed().len());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_buffer_append,
    bench_buffer_trim_under_pressure,
    bench_text_diff_update,
);

criterion_main!(benches);
