use common::{Actor, ActorId, SessionId};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hub::{Hub, HubConfig, WireEvent};
use ledger::StockSummary;
use tokio::sync::mpsc;

fn bench_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("hub/fan_out");

    for sessions in [1usize, 16, 128] {
        let (hub, receivers) = rt.block_on(async {
            let (hub, _task) = Hub::spawn(HubConfig::default());
            let mut receivers = Vec::with_capacity(sessions);
            for _ in 0..sessions {
                let (tx, rx) = mpsc::channel(1024);
                hub.register(SessionId::new(), Actor::staff(ActorId::new()), tx)
                    .await
                    .unwrap();
                receivers.push(rx);
            }
            (hub, receivers)
        });
        let mut receivers = receivers;
        let event = WireEvent::system_status(StockSummary::default(), sessions);

        group.bench_with_input(BenchmarkId::from_parameter(sessions), &sessions, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    hub.broadcast(&event).unwrap();
                    for rx in receivers.iter_mut() {
                        rx.recv().await.unwrap();
                    }
                });
            });
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let event = WireEvent::system_status(StockSummary::default(), 3);
    c.bench_function("hub/encode_system_status", |b| {
        b.iter(|| std::hint::black_box(event.to_json().unwrap()));
    });
}

criterion_group!(benches, bench_fan_out, bench_encode);
criterion_main!(benches);
