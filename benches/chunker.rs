use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ragchat::models::Document;
use ragchat::services::TextChunker;

fn bench_chunker(c: &mut Criterion) {
    let chunker = TextChunker::new(800, 100).expect("valid chunker");

    let ascii = "Refunds are issued within 30 days of purchase. ".repeat(2_000);
    c.bench_function("chunk_windows_ascii_96k", |b| {
        b.iter(|| chunker.windows(black_box(&ascii)).count())
    });

    let multibyte = "환불은 구매 후 30일 이내에 처리됩니다. ".repeat(2_000);
    c.bench_function("chunk_windows_multibyte", |b| {
        b.iter(|| chunker.windows(black_box(&multibyte)).count())
    });

    let document = Document::new("policies/refunds.md", ascii.clone());
    c.bench_function("chunk_document", |b| {
        b.iter(|| chunker.chunks(black_box(&document)).count())
    });
}

criterion_group!(benches, bench_chunker);
criterion_main!(benches);
