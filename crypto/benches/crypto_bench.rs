use criterion::{black_box, criterion_group, criterion_main, Criterion};
use peerlink_crypto::{EcdhSecret, MacKey};

fn hmac_seal_bench(c: &mut Criterion) {
    let key = MacKey([7u8; 32]);
    let payload = vec![0xABu8; 512];

    c.bench_function("hmac_sha256_512B", |b| {
        b.iter(|| peerlink_crypto::hmac_sha256(&key, black_box(&payload)))
    });
}

fn hmac_verify_bench(c: &mut Criterion) {
    let key = MacKey([7u8; 32]);
    let payload = vec![0xABu8; 512];
    let tag = peerlink_crypto::hmac_sha256(&key, &payload);

    c.bench_function("hmac_sha256_verify_512B", |b| {
        b.iter(|| peerlink_crypto::hmac_sha256_verify(&key, black_box(&payload), &tag))
    });
}

fn ed25519_verify_bench(c: &mut Criterion) {
    let kp = peerlink_crypto::generate_keypair();
    let msg = [42u8; 32];
    let sig = peerlink_crypto::sign_message(&msg, &kp.private);

    c.bench_function("ed25519_verify_cert_digest", |b| {
        b.iter(|| peerlink_crypto::verify_signature(black_box(&msg), &sig, &kp.public))
    });
}

fn ecdh_bench(c: &mut Criterion) {
    let local = EcdhSecret::generate();
    let remote = EcdhSecret::generate();

    c.bench_function("x25519_diffie_hellman", |b| {
        b.iter(|| local.diffie_hellman(black_box(remote.public_key())))
    });
}

fn tx_hash_bench(c: &mut Criterion) {
    let envelope = vec![0xCDu8; 1024];

    c.bench_function("hash_transaction_1KB", |b| {
        b.iter(|| peerlink_crypto::hash_transaction(black_box(&envelope)))
    });
}

criterion_group!(
    benches,
    hmac_seal_bench,
    hmac_verify_bench,
    ed25519_verify_bench,
    ecdh_bench,
    tx_hash_bench
);
criterion_main!(benches);
