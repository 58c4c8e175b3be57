//! Framing and CRC throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use voltage_modbus_blocking::{
    crc16, FrameCodec, ModbusRequest, PduBuilder, RtuCodec, TcpCodec, MAX_READ_REGISTERS,
};

/// RTU reply to a read of `count` holding registers from slave 1
fn rtu_register_reply(count: usize) -> Vec<u8> {
    let mut frame = vec![0x01, 0x03, (count * 2) as u8];
    for i in 0..count {
        frame.extend_from_slice(&(i as u16).to_be_bytes());
    }
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

fn bench_crc16(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc16");
    for size in [8usize, 64, 256] {
        let data: Vec<u8> = (0..size).map(|i| i as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| crc16(black_box(data)))
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let request = ModbusRequest::WriteMultipleRegisters {
        address: 100,
        values: (0..100).collect(),
    };
    let pdu = request.to_pdu().unwrap();

    c.bench_function("tcp_encode_write_100", |b| {
        let mut codec = TcpCodec::new();
        b.iter(|| codec.encode(black_box(1), black_box(&pdu)))
    });

    c.bench_function("rtu_encode_write_100", |b| {
        let mut codec = RtuCodec::new();
        b.iter(|| codec.encode(black_box(1), black_box(&pdu)))
    });

    c.bench_function("build_read_request", |b| {
        b.iter(|| PduBuilder::build_read_request(0x03, black_box(0), black_box(125)))
    });
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("rtu_decode_registers");
    for count in [1usize, 10, MAX_READ_REGISTERS] {
        let frame = rtu_register_reply(count);
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &frame, |b, frame| {
            let codec = RtuCodec::new();
            b.iter(|| {
                let response = codec.decode(black_box(frame), 1, 0x03).unwrap();
                response.parse_registers(count as u16).unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_crc16, bench_encode, bench_decode);
criterion_main!(benches);
