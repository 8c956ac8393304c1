//! Throughput of spec execution on representative instruction mixes.

use criterion::{criterion_group, criterion_main, Criterion};
use dsexec::Executor;

const LEN2: u32 = 1 << 28;
const LEN4: u32 = 3 << 28;

fn words(stream: &[u32]) -> Vec<u8> {
    stream.iter().flat_map(|word| word.to_le_bytes()).collect()
}

/// A spec that reserves one region and fills it word by word.
fn linear_write_spec(count: u32) -> Vec<u8> {
    let mut stream = vec![
        LEN2 | (0x02 << 20), // RESERVE region 0
        count * 4,
        0x50 << 20, // SWITCH_FOCUS region 0
    ];
    for value in 0..count {
        stream.push(LEN2 | (0x42 << 20) | (2 << 12) | 1);
        stream.push(value);
    }
    stream.push(LEN2 | (0xFF << 20));
    stream.push(0xFFFF_FFFF);
    words(&stream)
}

/// The same fill expressed as a loop over a register.
fn loop_write_spec(count: u32) -> Vec<u8> {
    let stream = [
        LEN2 | (0x02 << 20),
        count * 4,
        0x50 << 20,
        LEN4 | (0x51 << 20) | 1, // LOOP r1 = 0..count step 1
        0,
        count,
        1,
        (0x42 << 20) | (2 << 12) | (1 << 17) | (1 << 8) | 1, // WRITE r1
        0x53 << 20,                                          // END_LOOP
        LEN2 | (0xFF << 20),
        0xFFFF_FFFF,
    ];
    words(&stream)
}

fn bench_execute(c: &mut Criterion) {
    let linear = linear_write_spec(4096);
    c.bench_function("execute_linear_4k_words", |b| {
        b.iter(|| {
            let mut executor = Executor::new(linear.clone(), 1 << 20);
            executor.execute().unwrap();
            executor
        });
    });

    let looped = loop_write_spec(4096);
    c.bench_function("execute_loop_4k_words", |b| {
        b.iter(|| {
            let mut executor = Executor::new(looped.clone(), 1 << 20);
            executor.execute().unwrap();
            executor
        });
    });
}

criterion_group!(benches, bench_execute);
criterion_main!(benches);
