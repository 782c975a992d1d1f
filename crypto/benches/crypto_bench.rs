use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cascade_crypto::{
    digest, keypair_from_seed, merkle_root, sign_digest, verify_digest, IncrementalMerkle,
};
use cascade_types::Digest;

fn ed25519_sign_bench(c: &mut Criterion) {
    let kp = keypair_from_seed(&[7u8; 32]);
    let d = digest(&[42u8; 128]);

    c.bench_function("ed25519_sign_digest", |b| {
        b.iter(|| sign_digest(black_box(&d), &kp.private))
    });
}

fn ed25519_verify_bench(c: &mut Criterion) {
    let kp = keypair_from_seed(&[7u8; 32]);
    let d = digest(&[42u8; 128]);
    let sig = sign_digest(&d, &kp.private);

    c.bench_function("ed25519_verify_digest", |b| {
        b.iter(|| verify_digest(black_box(&d), &sig, &kp.public))
    });
}

fn blake2b_bench(c: &mut Criterion) {
    let data = vec![0xABu8; 1024];

    c.bench_function("blake2b_256_1KiB", |b| {
        b.iter(|| cascade_crypto::blake2b_256(black_box(&data)))
    });
}

fn merkle_root_bench(c: &mut Criterion) {
    let leaves: Vec<Digest> = (0..256u16).map(|i| digest(&i.to_be_bytes())).collect();

    c.bench_function("merkle_root_256_leaves", |b| {
        b.iter(|| merkle_root(black_box(&leaves)))
    });
}

fn incremental_merkle_bench(c: &mut Criterion) {
    let leaf = digest(b"block id");

    c.bench_function("incremental_merkle_append_1024", |b| {
        b.iter(|| {
            let mut acc = IncrementalMerkle::new();
            for _ in 0..1024 {
                acc.append(black_box(leaf));
            }
            acc.root()
        })
    });
}

criterion_group!(
    benches,
    ed25519_sign_bench,
    ed25519_verify_bench,
    blake2b_bench,
    merkle_root_bench,
    incremental_merkle_bench
);
criterion_main!(benches);
