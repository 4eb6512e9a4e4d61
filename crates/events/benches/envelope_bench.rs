use chrono::Utc;
use common::{CorrelationId, OrderId, Sku};
use criterion::{Criterion, criterion_group, criterion_main};
use events::{EventEnvelope, OrderCreated, OrderEvent, parse, serialize};

fn make_envelope() -> EventEnvelope {
    EventEnvelope::order_created(
        OrderId::new(101),
        CorrelationId::new(),
        OrderCreated {
            product: Sku::from("SKU-001"),
            quantity: 5,
            customer_name: Some("Bench Customer".to_string()),
        },
        Utc::now(),
    )
}

fn bench_serialize(c: &mut Criterion) {
    let envelope = make_envelope();

    c.bench_function("envelope/serialize", |b| {
        b.iter(|| serialize(&envelope).unwrap());
    });
}

fn bench_parse(c: &mut Criterion) {
    let body = serialize(&make_envelope()).unwrap();

    c.bench_function("envelope/parse", |b| {
        b.iter(|| parse(&body).unwrap());
    });
}

fn bench_derive_and_route(c: &mut Criterion) {
    let envelope = make_envelope();

    c.bench_function("envelope/derive_and_route", |b| {
        b.iter(|| {
            let derived = envelope.derive(OrderEvent::inventory_validated(), Utc::now());
            derived.routing_key()
        });
    });
}

criterion_group!(benches, bench_serialize, bench_parse, bench_derive_and_route);
criterion_main!(benches);
