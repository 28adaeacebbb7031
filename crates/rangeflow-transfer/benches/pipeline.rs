use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use futures_util::stream;
use rangeflow_transfer::{
    Error, FileTransfer, MemoryTransport, Result, StreamUploadOptions, TransferOptions,
    schedule_stream,
};
use tokio::runtime::Runtime;

const TOTAL: usize = 32 * 1024 * 1024;

fn source(chunk_size: usize) -> impl futures_util::Stream<Item = Result<Bytes>> {
    let chunk = Bytes::from(vec![0xA5u8; chunk_size]);
    stream::iter((0..TOTAL / chunk_size).map(move |_| Ok::<_, Error>(chunk.clone())))
}

fn bench_schedule_stream(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("schedule_stream");
    group.throughput(Throughput::Bytes(TOTAL as u64));
    group.sample_size(20);

    for (buffer_size, max_buffers) in [(256 * 1024, 4), (1024 * 1024, 8), (4 * 1024 * 1024, 8)] {
        group.bench_with_input(
            BenchmarkId::new("buffers", format!("{buffer_size}x{max_buffers}")),
            &(buffer_size, max_buffers),
            |b, &(buffer_size, max_buffers)| {
                b.iter(|| {
                    rt.block_on(async {
                        let report = schedule_stream(
                            source(64 * 1024),
                            buffer_size,
                            max_buffers,
                            |data: Bytes, _offset: u64| async move {
                                black_box(data);
                                Ok::<(), Error>(())
                            },
                            max_buffers - 1,
                        )
                        .await
                        .unwrap();
                        black_box(report)
                    })
                });
            },
        );
    }

    group.finish();
}

fn bench_memory_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let data = Bytes::from(vec![0x5Au8; TOTAL]);
    let mut group = c.benchmark_group("memory_transport");
    group.throughput(Throughput::Bytes(TOTAL as u64));
    group.sample_size(10);

    for parallelism in [1, 5, 16] {
        let options = TransferOptions::default().parallelism(parallelism);
        group.bench_with_input(BenchmarkId::new("upload_seekable", parallelism), &options, |b, options| {
            b.iter(|| {
                rt.block_on(async {
                    let transfer = FileTransfer::new(MemoryTransport::new());
                    transfer.upload_seekable(&data, TOTAL as u64, options).await.unwrap();
                })
            });
        });
    }

    let transfer = FileTransfer::new(MemoryTransport::with_object(data.to_vec()));
    group.bench_function("download_to_buffer", |b| {
        let mut buffer = vec![0u8; TOTAL];
        b.iter(|| {
            rt.block_on(async {
                let read = transfer
                    .download_to_buffer(&mut buffer, 0, None, &TransferOptions::default())
                    .await
                    .unwrap();
                black_box(read)
            })
        });
    });

    group.bench_function("upload_stream", |b| {
        b.iter(|| {
            rt.block_on(async {
                let transfer = FileTransfer::new(MemoryTransport::new());
                let report = transfer
                    .upload_stream(source(64 * 1024), TOTAL as u64, &StreamUploadOptions::default())
                    .await
                    .unwrap();
                black_box(report)
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_schedule_stream, bench_memory_roundtrip);
criterion_main!(benches);
