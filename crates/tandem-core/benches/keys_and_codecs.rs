use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, black_box};
use std::sync::Arc;
use tandem_core::backend::{binary, text};
use tandem_core::{AcceptAll, FloatKey, IrDocument, RandomKey, Replica, Schema};

fn schema() -> Arc<Schema> {
	let schema = Schema::builder("bench.1")
		.class("Item", |c| c.string("label").int("count").float("weight").blob("data").ordered("children", "Item"))
		.class("Doc", |c| c.ordered("items", "Item").unordered("pool", "Item").string("title"))
		.root("Doc")
		.build()
		.expect("bench schema");
	Arc::new(schema)
}

fn document(items: usize) -> IrDocument {
	let mut replica = Replica::new(schema(), Box::new(AcceptAll), 1, 1).expect("replica");
	let root = replica.root();
	let list = replica.member(root, "items").expect("items");
	let pool = replica.member(root, "pool").expect("pool");
	for i in 0..items {
		let container = if i % 2 == 0 { list } else { pool };
		let item = replica.insert(container, "Item").expect("insert");
		replica.set_member(item, "label", format!("item {}", i)).expect("label");
		replica.set_member(item, "count", i as i64).expect("count");
		replica.set_member(item, "weight", i as f64 * 0.5).expect("weight");
		replica.set_member(item, "data", vec![i as u8; 16]).expect("data");
	}
	replica.synchronize();
	replica.write().expect("write")
}

fn bench_float_keys(c: &mut Criterion) {
	let mut group = c.benchmark_group("float_key");
	group.bench_function("append_chain_1000", |b| {
		b.iter(|| {
			let mut last: Option<FloatKey> = None;
			for _ in 0..1000 {
				last = Some(FloatKey::generate(last.as_ref(), None).expect("key"));
			}
			black_box(last)
		});
	});
	group.bench_function("bisect_200", |b| {
		b.iter(|| {
			let left = FloatKey::generate(None, None).expect("key");
			let mut right = FloatKey::generate(Some(&left), None).expect("key");
			for _ in 0..200 {
				right = FloatKey::generate(Some(&left), Some(&right)).expect("key");
			}
			black_box(right)
		});
	});
	group.bench_function("random_key", |b| b.iter(|| black_box(RandomKey::generate())));
	group.finish();
}

fn bench_codecs(c: &mut Criterion) {
	let mut group = c.benchmark_group("codecs");
	for &items in &[10usize, 100, 1000] {
		let doc = document(items);
		let bytes = binary::encode(&doc);
		let source = text::encode(&doc);
		group.bench_with_input(BenchmarkId::new("binary_encode", items), &doc, |b, doc| {
			b.iter(|| black_box(binary::encode(doc)));
		});
		group.bench_with_input(BenchmarkId::new("binary_decode", items), &bytes, |b, bytes| {
			b.iter(|| black_box(binary::decode(bytes).expect("decode")));
		});
		group.bench_with_input(BenchmarkId::new("text_encode", items), &doc, |b, doc| {
			b.iter(|| black_box(text::encode(doc)));
		});
		group.bench_with_input(BenchmarkId::new("text_decode", items), &source, |b, source| {
			b.iter(|| black_box(text::decode(source).expect("decode")));
		});
		group.bench_with_input(BenchmarkId::new("read", items), &doc, |b, doc| {
			b.iter_batched(
				|| Replica::new(schema(), Box::new(AcceptAll), 2, 1).expect("replica"),
				|mut replica| replica.read(doc).expect("read"),
				BatchSize::SmallInput,
			);
		});
	}
	group.finish();
}

criterion_group!(benches, bench_float_keys, bench_codecs);
criterion_main!(benches);
