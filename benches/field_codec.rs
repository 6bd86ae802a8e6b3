use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use disco::{CipherKey, DiscoveryContext, FieldCodec, Framing, TokenGenerator};

fn bench_field_codec(c: &mut Criterion) {
    let key = CipherKey::derive(b"bench secret").unwrap();
    let mut group = c.benchmark_group("field_codec");

    for framing in [Framing::LengthPrefix, Framing::InlineMarker] {
        let codec = FieldCodec::new(key.clone()).with_framing(framing);
        let sealed = codec.seal("192.168.100.200").unwrap();

        group.bench_with_input(
            BenchmarkId::new("seal", format!("{:?}", framing)),
            &codec,
            |b, codec| b.iter(|| codec.seal(black_box("192.168.100.200"))),
        );
        // Inline markers can collide with ciphertext, so opening may fail; the
        // timing still covers the scan.
        group.bench_with_input(
            BenchmarkId::new("open", format!("{:?}", framing)),
            &(codec, sealed),
            |b, (codec, sealed)| b.iter(|| codec.open(black_box(sealed))),
        );
    }

    group.finish();
}

fn bench_request(c: &mut Criterion) {
    let ctx = DiscoveryContext::new(
        FieldCodec::new(CipherKey::derive(b"bench secret").unwrap()),
        TokenGenerator::default(),
    );
    c.bench_function("sealed_token", |b| b.iter(|| ctx.sealed_token()));
}

criterion_group!(benches, bench_field_codec, bench_request);
criterion_main!(benches);
