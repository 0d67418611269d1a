// Benchmarks for the chained wire-frame protocol: building a transmit
// frame from result rows, chaining the next header in, and parsing the
// resulting byte stream back out with FrameReader.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use meshquery::wire::{FrameReader, ResultMsg, RowBundle, TransmitData};

fn sample_result(num_rows: usize) -> ResultMsg {
    let row = RowBundle { column: vec![b"123456789".to_vec(), b"some text value".to_vec()], isnull: vec![false, false] };
    ResultMsg {
        query_id: 1,
        job_id: 1,
        row: std::iter::repeat(row).take(num_rows).collect(),
        rowcount: num_rows as u32,
        transmitsize: (num_rows * 24) as u64,
        attemptcount: 0,
        errorcode: 0,
        errormsg: String::new(),
        fileresource_xroot: String::new(),
        fileresource_http: String::new(),
    }
}

fn bench_build_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_frame");
    for num_rows in [10usize, 100, 1000] {
        let result = sample_result(num_rows);
        group.bench_function(format!("rows_{num_rows}"), |b| {
            b.iter(|| {
                let mut frame = TransmitData::new("worker1");
                frame.build_data_msg(black_box(&result)).unwrap();
                frame.attach_next_header(None, true).unwrap();
                black_box(frame.into_wire_frame().unwrap());
            });
        });
    }
    group.finish();
}

fn bench_parse_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_frames");
    for num_rows in [10usize, 100, 1000] {
        let result = sample_result(num_rows);
        let mut frame = TransmitData::new("worker1");
        frame.build_data_msg(&result).unwrap();
        frame.attach_next_header(None, true).unwrap();
        let mut bytes = frame.into_wire_frame().unwrap();
        bytes.extend_from_slice(&meshquery::wire::terminator_frame("worker1").unwrap());

        group.bench_function(format!("rows_{num_rows}"), |b| {
            b.iter(|| {
                let mut reader = FrameReader::new(black_box(&bytes));
                while let Some((_, body)) = reader.next_frame().unwrap() {
                    black_box(body);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_frame, bench_parse_frames);
criterion_main!(benches);
