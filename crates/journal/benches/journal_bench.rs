use criterion::{Criterion, criterion_group, criterion_main};
use journal::{InMemoryJournal, Journal, StepRecord, StepSeq, WorkflowId, WorkflowRecord};

fn bench_insert_workflow(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("journal/insert_workflow", |b| {
        b.iter(|| {
            rt.block_on(async {
                let journal = InMemoryJournal::new();
                let record = WorkflowRecord::new(
                    WorkflowId::generate(),
                    "checkout",
                    serde_json::json!({"key": "bench"}),
                );
                journal.insert_workflow(record).await.unwrap();
            });
        });
    });
}

fn bench_append_steps_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("journal/append_steps_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let journal = InMemoryJournal::new();
                let id = WorkflowId::generate();
                for seq in 1..=10 {
                    journal
                        .append_step(StepRecord::success(
                            id.clone(),
                            StepSeq::new(seq),
                            "tick",
                            serde_json::json!(seq),
                        ))
                        .await
                        .unwrap();
                }
            });
        });
    });
}

fn bench_replay_lookup(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let journal = InMemoryJournal::new();
    let id = WorkflowId::new("bench-replay");

    // Pre-populate with 100 steps
    rt.block_on(async {
        for seq in 1..=100 {
            journal
                .append_step(StepRecord::success(
                    id.clone(),
                    StepSeq::new(seq),
                    "tick",
                    serde_json::json!(seq),
                ))
                .await
                .unwrap();
        }
    });

    c.bench_function("journal/replay_100_steps", |b| {
        b.iter(|| {
            rt.block_on(async {
                for seq in 1..=100 {
                    journal.get_step(&id, StepSeq::new(seq)).await.unwrap();
                }
            });
        });
    });
}

fn bench_signal_roundtrip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let journal = InMemoryJournal::new();
    let id = WorkflowId::new("bench-signal");

    c.bench_function("journal/signal_push_pop", |b| {
        b.iter(|| {
            rt.block_on(async {
                journal
                    .push_signal(&id, "payment-status", serde_json::json!("paid"))
                    .await
                    .unwrap();
                journal.pop_signal(&id, "payment-status").await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_insert_workflow,
    bench_append_steps_10,
    bench_replay_lookup,
    bench_signal_roundtrip
);
criterion_main!(benches);
