//! Benchmarks for the splitting pipeline.
//!
//! Run with: cargo bench

#[path = "../tests/common/mod.rs"]
mod common;

use criterion::{Criterion, criterion_group, criterion_main};

use epub_splitter::{
    Archive, ContentStore, MaterializeOptions, PartitionDescriptor, SizeLimit, SplitConfig, emit,
    materialize, split,
};

/// A book large enough that parsing and resource discovery dominate.
fn sample_book() -> Vec<u8> {
    let filler = "<p>Lorem ipsum dolor sit amet, <em>consectetur</em> adipiscing elit.</p>\n"
        .repeat(200);
    let mut book = common::EpubBuilder::new("Benchmark")
        .cover("cover", "images/cover.jpg")
        .resource("css", "styles/book.css", "text/css", b"p { margin: 0 }");
    for n in 1..=60 {
        let body = format!(
            "<link rel=\"stylesheet\" href=\"../styles/book.css\"/>\n\
             <h1 id=\"top\">Chapter {n}</h1>\n\
             <p><a href=\"ch{}.xhtml#top\">next</a></p>\n{filler}",
            n % 60 + 1
        );
        book = book.chapter(&format!("ch{n}"), &format!("Chapter {n}"), &body);
    }
    book.build()
}

// ============================================================================
// Stage Benchmarks
// ============================================================================

fn bench_load(c: &mut Criterion) {
    let bytes = sample_book();
    c.bench_function("load", |b| {
        b.iter(|| Archive::load(&bytes).unwrap());
    });
}

fn bench_materialize(c: &mut Criterion) {
    let archive = Archive::load(&sample_book()).unwrap();
    let descriptor = PartitionDescriptor {
        start: 10,
        end: 29,
        title: None,
    };
    let options = MaterializeOptions::default();

    c.bench_function("materialize_20_chapters", |b| {
        b.iter(|| {
            let store = ContentStore::new(&archive);
            materialize(&archive, &store, &descriptor, 1, &options).unwrap()
        });
    });
}

fn bench_emit(c: &mut Criterion) {
    let archive = Archive::load(&sample_book()).unwrap();
    c.bench_function("emit", |b| {
        b.iter(|| emit(&archive).unwrap());
    });
}

// ============================================================================
// End-to-end Benchmarks
// ============================================================================

fn bench_split_sequential(c: &mut Criterion) {
    let bytes = sample_book();
    let config = SplitConfig::by_size(SizeLimit::Chapters(10));
    c.bench_function("split_sequential", |b| {
        b.iter(|| split(&bytes, &config).unwrap());
    });
}

fn bench_split_parallel(c: &mut Criterion) {
    let bytes = sample_book();
    let config = SplitConfig::by_size(SizeLimit::Chapters(10)).with_parallel(true);
    c.bench_function("split_parallel", |b| {
        b.iter(|| split(&bytes, &config).unwrap());
    });
}

criterion_group!(
    benches,
    // Stages
    bench_load,
    bench_materialize,
    bench_emit,
    // End to end
    bench_split_sequential,
    bench_split_parallel,
);
criterion_main!(benches);
