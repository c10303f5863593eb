//! ESP Performance Benchmarks
//!
//! Benchmarks for per-packet encode/decode throughput, anti-replay checks
//! and batch dispatch.
//!
//! Run with: `cargo bench --features ipsec --bench esp_bench`

#![cfg(feature = "ipsec")]

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use espflow_proto::ipsec::{
    config::SaParams,
    crypto::{CryptoAlg, IntegAlg},
    ip::{v4, IPV4_HEADER_LEN},
    metrics::EspMetrics,
    replay::ReplayWindow,
    Dispatcher, EspDecrypt, EspEncrypt, Packet, PacketPool, PacketTransform, SaStore,
    VecFrameSink, WorkerContext,
};
use std::net::Ipv4Addr;
use std::sync::Arc;

const SIZES: [usize; 3] = [64, 512, 1400];

/// Create an IPv4 packet of `len` bytes
fn create_test_packet(len: usize) -> Vec<u8> {
    let mut pkt = vec![0xabu8; len];
    pkt[0] = 0x45;
    pkt[8] = 64;
    pkt[9] = 17;
    v4::finalize(&mut pkt[..IPV4_HEADER_LEN], len as u16);
    pkt
}

/// Create tunnel SA params; anti-replay off so one packet can be decoded
/// over and over
fn create_test_sa(crypto: CryptoAlg) -> SaParams {
    let builder = SaParams::builder()
        .with_spi(0x1234)
        .with_tunnel_v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))
        .with_anti_replay(false);
    let builder = match crypto {
        CryptoAlg::AesGcm128 => builder
            .with_crypto(crypto, vec![0x42u8; 16])
            .with_salt([1, 2, 3, 4]),
        _ => builder
            .with_crypto(crypto, vec![0x42u8; 16])
            .with_integ(IntegAlg::HmacSha256_128, vec![0x24u8; 32]),
    };
    builder.build().expect("valid SA params")
}

fn create_test_worker(crypto: CryptoAlg) -> (WorkerContext, u32) {
    let store = Arc::new(SaStore::new(4, 1));
    let index = store.add(create_test_sa(crypto)).expect("SA installed");
    (WorkerContext::with_seed(0, store, 0), index)
}

/// Benchmark ESP encoding
fn bench_esp_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("esp_encrypt");

    for crypto in [CryptoAlg::AesCbc128, CryptoAlg::AesGcm128] {
        let (mut worker, index) = create_test_worker(crypto);
        let mut node = EspEncrypt::new();

        for size in SIZES {
            let inner = create_test_packet(size);
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(crypto.name(), size), &inner, |b, inner| {
                b.iter_batched(
                    || {
                        let mut packet = Packet::from_bytes(inner);
                        packet.meta.sa_index = index;
                        packet
                    },
                    |mut packet| black_box(node.process(&mut worker, &mut packet)),
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

/// Benchmark ESP decoding
fn bench_esp_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("esp_decrypt");

    for crypto in [CryptoAlg::AesCbc128, CryptoAlg::AesGcm128] {
        let (mut worker, index) = create_test_worker(crypto);
        let mut node = EspDecrypt::new();

        for size in SIZES {
            let mut encoded = Packet::from_bytes(&create_test_packet(size));
            encoded.meta.sa_index = index;
            EspEncrypt::new()
                .process(&mut worker, &mut encoded)
                .expect("encode");
            encoded.pop_front(IPV4_HEADER_LEN).expect("outer header");

            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(crypto.name(), size), &encoded, |b, encoded| {
                b.iter_batched(
                    || encoded.clone(),
                    |mut packet| black_box(node.process(&mut worker, &mut packet)),
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

/// Benchmark anti-replay window operations
fn bench_replay_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_window");

    group.bench_function("in_order", |b| {
        let mut window = ReplayWindow::new(64);
        let mut seq = 0u64;
        b.iter(|| {
            seq += 1;
            if window.check(black_box(seq)) {
                window.advance(seq);
            }
        });
    });

    group.bench_function("duplicate", |b| {
        let mut window = ReplayWindow::new(64);
        for seq in 1..=64 {
            window.advance(seq);
        }
        b.iter(|| black_box(window.check(black_box(32))));
    });

    group.bench_function("infer_esn", |b| {
        let mut window = ReplayWindow::new(64);
        window.advance(u32::MAX as u64 - 8);
        b.iter(|| black_box(window.infer_esn(black_box(3))));
    });

    group.finish();
}

/// Benchmark a full dispatcher batch
fn bench_dispatch_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let (mut worker, index) = create_test_worker(CryptoAlg::AesGcm128);
    let dispatcher = Dispatcher::new(256, Arc::new(EspMetrics::new()));
    let inner = create_test_packet(512);

    group.throughput(Throughput::Elements(256));
    group.bench_function("encrypt_256x512", |b| {
        b.iter_batched(
            || {
                let mut pool = PacketPool::new();
                let handles: Vec<_> = (0..256)
                    .map(|_| {
                        let mut packet = Packet::from_bytes(&inner);
                        packet.meta.sa_index = index;
                        pool.insert(packet)
                    })
                    .collect();
                (pool, handles)
            },
            |(mut pool, handles)| {
                let mut sink = VecFrameSink::new();
                black_box(dispatcher.run(
                    &mut EspEncrypt::new(),
                    &mut worker,
                    &mut pool,
                    &handles,
                    &mut sink,
                ))
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_esp_encrypt,
    bench_esp_decrypt,
    bench_replay_window,
    bench_dispatch_batch
);
criterion_main!(benches);
