use criterion::{Criterion, criterion_group, criterion_main};
use dap_protocol::{
    CommandId, TransferRequest,
    codec::{RequestReader, ResponseWriter},
};
use std::hint::black_box;

fn decode_transfer_configure(c: &mut Criterion) {
    let request = [0x04u8, 0x02, 0x64, 0x00, 0x10, 0x00];
    c.bench_function("decode TransferConfigure", |b| {
        b.iter(|| {
            let request = black_box(&request);
            let command = CommandId::from_byte(request[0]);
            let mut reader = RequestReader::new(&request[1..]);
            (command, reader.next_u8(), reader.next_u16(), reader.next_u16())
        })
    });
}

fn decode_transfer_requests(c: &mut Criterion) {
    let requests: Vec<u8> = (0..=255u8).collect();
    c.bench_function("decode transfer request bytes", |b| {
        b.iter(|| {
            requests
                .iter()
                .map(|r| TransferRequest::from_bits_retain(*r))
                .filter(|r| r.is_ap() && r.is_read())
                .count()
        })
    });
}

fn encode_info_string(c: &mut Criterion) {
    let product = b"CMSIS-DAP Probe";
    c.bench_function("encode Info(Product)", |b| {
        b.iter(|| {
            let mut buffer = [0u8; 64];
            let mut writer = ResponseWriter::new(&mut buffer);
            writer.write_u8(CommandId::Info.into());
            writer.write_u8(product.len() as u8);
            writer.write_slice(black_box(product));
            writer.position()
        })
    });
}

criterion_group!(
    benches,
    decode_transfer_configure,
    decode_transfer_requests,
    encode_info_string
);
criterion_main!(benches);
