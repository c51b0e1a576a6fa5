//! Validator benchmarks.
//!
//! Every inbound field crosses these functions, and image validation runs
//! once per attendance photo.
//!
//! Run with:
//! ```sh
//! cargo bench --bench validation_bench
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use facegate_core::SerialNumber;
use facegate_protocol::{clamp_field, image_file_name, validate_image, validate_serial};
use std::hint::black_box;

fn encoded_jpeg(payload_bytes: usize) -> String {
    let mut bytes = vec![0xFF, 0xD8, 0xFF];
    bytes.extend(std::iter::repeat_n(0xABu8, payload_bytes));
    BASE64.encode(bytes)
}

fn bench_serial(c: &mut Criterion) {
    c.bench_function("validate_serial/ok", |b| {
        b.iter(|| black_box(validate_serial("FACE-TERMINAL-0042")));
    });
    c.bench_function("validate_serial/reject", |b| {
        b.iter(|| black_box(validate_serial("../../../etc/passwd")));
    });
}

fn bench_clamp(c: &mut Criterion) {
    let long = "firmware-string-".repeat(32);
    c.bench_function("clamp_field/long", |b| {
        b.iter(|| black_box(clamp_field(&long)));
    });
}

fn bench_image(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_image");
    for kb in [4usize, 64, 256] {
        let encoded = encoded_jpeg(kb * 1024);
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(kb), &encoded, |b, encoded| {
            b.iter(|| black_box(validate_image(encoded).unwrap()));
        });
    }
    group.finish();
}

fn bench_file_name(c: &mut Criterion) {
    let serial = SerialNumber::new("FACE-0042").unwrap();
    c.bench_function("image_file_name", |b| {
        b.iter(|| black_box(image_file_name(&serial, "1234", "2026-08-30 09:00:00")));
    });
}

criterion_group!(benches, bench_serial, bench_clamp, bench_image, bench_file_name);
criterion_main!(benches);
