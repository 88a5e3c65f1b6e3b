//! Marshaler benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ripple_protocol::{ClientMessage, Marshaler, ServerMessage};

fn bench_marshal(c: &mut Criterion) {
    let mut group = c.benchmark_group("marshal");
    let message = ServerMessage::data_text(
        r#"{"channel":"Turbo::StreamsChannel","name":"chat_room:7"}"#,
        "<turbo-stream action=\"append\" target=\"messages\"></turbo-stream>",
    );

    for marshaler in [Marshaler::Json, Marshaler::MessagePack] {
        group.bench_function(format!("encode_{marshaler:?}"), |b| {
            b.iter(|| marshaler.marshal(black_box(&message)).unwrap());
        });

        let encoded = marshaler.marshal(&message).unwrap();
        group.bench_function(format!("decode_{marshaler:?}"), |b| {
            b.iter(|| {
                let decoded: ServerMessage = marshaler.unmarshal(black_box(&encoded)).unwrap();
                decoded
            });
        });
    }
    group.finish();
}

fn bench_client_decode(c: &mut Criterion) {
    let command = ClientMessage::subscribe(r#"{"channel":"Turbo::StreamsChannel"}"#);
    for marshaler in [Marshaler::Json, Marshaler::MessagePack] {
        let encoded = marshaler.marshal(&command).unwrap();
        c.bench_function(&format!("decode_command_{marshaler:?}"), |b| {
            b.iter(|| {
                let decoded: ClientMessage = marshaler.unmarshal(black_box(&encoded)).unwrap();
                decoded
            });
        });
    }
}

criterion_group!(benches, bench_marshal, bench_client_decode);
criterion_main!(benches);
