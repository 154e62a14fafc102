use criterion::{black_box, criterion_group, criterion_main, Criterion};
use telemetry_protocol::{decode_frame, FrameLayout};

const BASE_FRAME: &[u8] = b"55.5,3000,40,0,12.3,80.1,90,-122.4,37.7,100,101,99,98";
const EXTENDED_FRAME: &[u8] = b"55.5,3000,40,0,12.3,80.1,90,-122.4,37.7,100,101,99,98,0.25,-0.5";
const BAD_FRAME: &[u8] = b"bad,3000,40,0,12.3,80.1,90,-122.4,37.7,100,101,99,98";

fn bench_decode(c: &mut Criterion) {
    c.bench_function("decode_base_frame", |b| {
        b.iter(|| decode_frame(black_box(BASE_FRAME), FrameLayout::Standard))
    });
    c.bench_function("decode_extended_frame", |b| {
        b.iter(|| decode_frame(black_box(EXTENDED_FRAME), FrameLayout::Extended))
    });
    c.bench_function("reject_bad_frame", |b| {
        b.iter(|| decode_frame(black_box(BAD_FRAME), FrameLayout::Standard))
    });
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
