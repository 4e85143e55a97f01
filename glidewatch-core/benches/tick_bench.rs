use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use glidewatch_core::testing::{FakeHost, RecordingSessions};
use glidewatch_core::*;
use std::sync::Arc;

fn build(actors: u64, chunks_per_actor: i32) -> (Arc<DetectionEngine>, ChunkAttributor) {
    let clock = Arc::new(ManualClock::starting_now());
    let host = Arc::new(FakeHost::new());
    let sessions = Arc::new(RecordingSessions::default());
    let config = Arc::new(ConfigHandle::new(DetectionConfig::default()));
    let bans = Arc::new(BanStore::new(config.clone(), sessions.clone(), clock.clone()));
    let engine = Arc::new(DetectionEngine::new(
        config.clone(),
        bans,
        host.clone(),
        sessions,
        Arc::new(NoopSink),
        clock.clone(),
    ));
    let attributor = ChunkAttributor::new(config, host.clone(), engine.clone(), clock);

    for id in 0..actors {
        let actor = ActorId(id);
        host.join(actor, 10);
        engine.on_gliding(actor, "bench", true);
        for chunk in 0..chunks_per_actor {
            engine.record_event(GenerationEvent {
                key: ChunkKey::new(WorldId(id), chunk, 0),
                generation_time: chrono::Utc::now(),
                actor_id: actor,
                actor_name: "bench".into(),
                position: Position::default(),
            });
        }
    }
    (engine, attributor)
}

fn bench_evaluate(c: &mut Criterion) {
    let (engine, _) = build(100, 50);
    c.bench_function("evaluate_100_actors", |b| {
        b.iter(|| black_box(engine.evaluate()))
    });

    let (engine, _) = build(1000, 20);
    c.bench_function("evaluate_1000_actors", |b| {
        b.iter(|| black_box(engine.evaluate()))
    });
}

fn bench_attribution(c: &mut Criterion) {
    let candidates: Vec<CandidateActor> = (0..50)
        .map(|i| CandidateActor {
            id: ActorId(i),
            name: format!("actor{i}"),
            position: Position::new(i as f64 * 32.0, 100.0, 0.0),
            view_distance: Some(10),
        })
        .collect();

    c.bench_function("attribute_50_candidates", |b| {
        b.iter_batched(
            || build(0, 0).1,
            |attributor| {
                for x in 0..64 {
                    black_box(attributor.on_generation_candidate(
                        WorldId(0),
                        x,
                        0,
                        &candidates,
                    ));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_evaluate, bench_attribution);
criterion_main!(benches);
