use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use serde_json::json;

use livemirror::document::{Document, DocumentId, ID_FIELD};
use livemirror::live::{DistinctDelta, InitialResult, LiveEvent, ResultIndex, SyncState};
use livemirror::{Client, MemoryTransport, QueryMode};

fn seeded(mode: QueryMode, n: i64) -> SyncState {
    let mut state = SyncState::new(mode);
    let docs = (0..n).map(|i| Document::new().with(ID_FIELD, i).with("hp", i)).collect();
    state.seed(InitialResult::Docs(docs)).unwrap();
    state
}

fn bench_normal_mode(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync/normal");
    group.throughput(Throughput::Elements(1));

    // 1024 cached documents, the size of a typical paged UI list.
    group.bench_function("add_at_front_limit_1024", |b| {
        b.iter_batched(
            || seeded(QueryMode::Normal { limit: Some(1024) }, 1024),
            |mut state| {
                state.apply(black_box(&LiveEvent::Add {
                    doc: Document::new().with(ID_FIELD, -1),
                    index: Some(0),
                }))
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("update_move_tail_to_head", |b| {
        b.iter_batched(
            || seeded(QueryMode::Normal { limit: None }, 1024),
            |mut state| {
                state.apply(black_box(&LiveEvent::Update {
                    doc: Document::new().with(ID_FIELD, 1023).with("hp", 0),
                    index: ResultIndex::At(0),
                }))
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("remove_missing", |b| {
        let mut state = seeded(QueryMode::Normal { limit: None }, 1024);
        let id = DocumentId::from("missing");
        b.iter(|| state.remove(black_box(&id)));
    });
    group.finish();
}

fn bench_distinct_and_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync/aggregate");

    group.bench_function("distinct_sync_64", |b| {
        let values: Vec<_> = (0..512).map(|i| json!(format!("v{i}"))).collect();
        let delta = DistinctDelta {
            add: (0..32).map(|i| json!(format!("n{i}"))).collect(),
            remove: (0..32).map(|i| json!(format!("v{i}"))).collect(),
        };
        b.iter_batched(
            || {
                let mut state = SyncState::new(QueryMode::Distinct);
                state.seed(InitialResult::Values(Vec::clone(&values))).unwrap();
                state
            },
            |mut state| state.distinct_sync(black_box(&delta)),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("count_update", |b| {
        let mut state = SyncState::new(QueryMode::Count);
        state.seed(InitialResult::Count(0)).unwrap();
        let doc = Document::new().with(ID_FIELD, 1);
        b.iter(|| state.update(black_box(&doc), ResultIndex::At(0)));
    });
    group.finish();
}

fn bench_push_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let transport = Arc::new(MemoryTransport::new());
    transport.respond_with("MR.fighter.liveQuery", |_| Ok(json!({"count": 0})));
    let client = Client::new(transport);
    let lq = rt
        .block_on(async {
            use livemirror::QueryChain;
            client.model("fighter")?.live_query().count().exec().await
        })
        .unwrap();

    c.bench_function("push/decode_route_apply", |b| {
        let args = [json!(1), json!({"_id": "x"}), json!(0)];
        b.iter(|| client.dispatch_push("MR.fighter.add", black_box(&args)).unwrap());
    });
    black_box(lq.count());
}

criterion_group!(benches, bench_normal_mode, bench_distinct_and_count, bench_push_dispatch);
criterion_main!(benches);
