use bacnet_sc::bvlc::{
    decode_message, encode_connect_request, encode_encapsulated_npdu, encode_heartbeat_request,
};
use bacnet_sc::identity::{Uuid, Vmac};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn encode_benchmark(c: &mut Criterion) {
    let vmac = Vmac::new([1, 2, 3, 4, 5, 6]);
    let uuid = Uuid::new([0xAA; 16]);
    let npdu = vec![0u8; 200];

    c.bench_function("encode_heartbeat_request", |b| {
        b.iter(|| black_box(encode_heartbeat_request(black_box(1))))
    });

    c.bench_function("encode_connect_request", |b| {
        b.iter(|| {
            black_box(encode_connect_request(
                black_box(1),
                vmac,
                uuid,
                black_box(1500),
                black_box(1497),
            ))
        })
    });

    c.bench_function("encode_encapsulated_npdu_200b", |b| {
        b.iter(|| {
            black_box(encode_encapsulated_npdu(
                black_box(1),
                None,
                Some(vmac),
                npdu.clone(),
            ))
        })
    });
}

fn decode_benchmark(c: &mut Criterion) {
    let vmac = Vmac::new([1, 2, 3, 4, 5, 6]);
    let uuid = Uuid::new([0xAA; 16]);
    let npdu = vec![0u8; 200];

    let heartbeat_frame = encode_heartbeat_request(1);
    c.bench_function("decode_heartbeat_request", |b| {
        b.iter(|| black_box(decode_message(black_box(&heartbeat_frame)).unwrap()))
    });

    let connect_frame = encode_connect_request(1, vmac, uuid, 1500, 1497);
    c.bench_function("decode_connect_request", |b| {
        b.iter(|| black_box(decode_message(black_box(&connect_frame)).unwrap()))
    });

    let npdu_frame = encode_encapsulated_npdu(1, None, Some(vmac), npdu);
    c.bench_function("decode_encapsulated_npdu_200b", |b| {
        b.iter(|| black_box(decode_message(black_box(&npdu_frame)).unwrap()))
    });
}

criterion_group!(benches, encode_benchmark, decode_benchmark);
criterion_main!(benches);
