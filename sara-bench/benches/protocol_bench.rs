//! Protocol encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sara_protocol::camera::ImageInfo;
use sara_protocol::lasgo::{Job, Zone};
use sara_protocol::pixels::unpack_12bit;
use sara_protocol::{
    decode_f64_array, decode_records, encode_records, Decoder, Envelope, Frame, Record,
};

fn test_zone(i: usize) -> Zone {
    Zone {
        id: format!("stripe-{}", i),
        power: 60.0,
        velocity: 10.0,
        dwell: 250.0,
        xmin: i as f64,
        xmax: i as f64,
        ymin: -45.0,
        ymax: 45.0,
        ..Zone::default()
    }
}

fn bench_envelope_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encode");

    for size in [0, 1000, 100000] {
        let payload = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                black_box(
                    Envelope::request(18, 101, 1, true)
                        .with_payload(payload)
                        .encode(),
                )
            });
        });
    }

    group.finish();
}

fn bench_envelope_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_decode");

    for crc in [true, false] {
        let encoded = Envelope::request(9, 101, -1, crc).encode();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(if crc { "crc" } else { "plain" }),
            &encoded,
            |b, encoded| {
                b.iter(|| black_box(Envelope::decode(encoded, crc).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_stream_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decode");

    for size in [100, 10000, 1000000] {
        let frame = Frame::new(10, 101, 0, Bytes::from(vec![0x42u8; size]), true);
        let encoded = frame.encode();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = Decoder::new(true);
                decoder.extend(encoded);
                black_box(decoder.decode_frame().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_record_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_encode");

    let job = Job {
        id: "bench job".to_string(),
        max_accel: 5.0,
        ..Job::default()
    };
    group.throughput(Throughput::Elements(1));
    group.bench_function("job", |b| {
        b.iter(|| black_box(job.encode().unwrap()));
    });

    for count in [1, 10, 100] {
        let zones: Vec<Zone> = (0..count).map(test_zone).collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("zones", count), &zones, |b, zones| {
            b.iter(|| black_box(encode_records(zones).unwrap()));
        });
    }

    group.finish();
}

fn bench_record_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_decode");

    let info = ImageInfo {
        frame: 3,
        width: 1920,
        height: 1080,
        memory_pitch: 3840,
        exposure: 10.0,
        ..ImageInfo::default()
    }
    .encode()
    .unwrap();
    group.throughput(Throughput::Elements(1));
    group.bench_function("image_info", |b| {
        b.iter(|| black_box(ImageInfo::decode(&info).unwrap()));
    });

    for count in [1, 10, 100] {
        let zones: Vec<Zone> = (0..count).map(test_zone).collect();
        let encoded = encode_records(&zones).unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("zones", count), &encoded, |b, encoded| {
            b.iter(|| black_box(decode_records::<Zone>(encoded, count).unwrap()));
        });
    }

    group.finish();
}

fn bench_spectrum_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("spectrum_decode");

    for npoints in [1024, 2048, 3648] {
        let bytes: Vec<u8> = (0..npoints).flat_map(|i| (i as f64).to_le_bytes()).collect();

        group.throughput(Throughput::Elements(npoints as u64));
        group.bench_with_input(BenchmarkId::from_parameter(npoints), &bytes, |b, bytes| {
            b.iter(|| black_box(decode_f64_array(bytes, npoints).unwrap()));
        });
    }

    group.finish();
}

fn bench_crc32(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc32");

    for size in [100, 10000, 1000000] {
        let data = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(crc32fast::hash(data)));
        });
    }

    group.finish();
}

fn bench_unpack_pixels(c: &mut Criterion) {
    let mut group = c.benchmark_group("unpack_12bit");

    for (width, height) in [(640, 480), (1920, 1080)] {
        let data: Vec<u8> = (0..width * height)
            .flat_map(|i: usize| ((i % 4096) as u16).to_le_bytes())
            .collect();

        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &data,
            |b, data| {
                b.iter(|| black_box(unpack_12bit(data, width, height, width * 2).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_envelope_encode,
    bench_envelope_decode,
    bench_stream_decode,
    bench_record_encode,
    bench_record_decode,
    bench_spectrum_decode,
    bench_crc32,
    bench_unpack_pixels,
);

criterion_main!(benches);
