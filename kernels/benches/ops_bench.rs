use criterion::{criterion_group, criterion_main, Criterion};
use distarray_kernels::{cpu_fill, cpu_gather, cpu_scatter, Window};
use std::hint::black_box;

fn benchmark_gather(c: &mut Criterion) {
    let mut group = c.benchmark_group("gather");
    let sizes = [128, 512, 1024, 2048];

    for &size in &sizes {
        let shape = [size, size];
        let data = vec![1.0f32; size * size];
        let half = [Window::new(0, size / 2, 1), Window::full(size)];
        // every other row, walking backwards; every third column
        let strided = [
            Window::new(size - 1, size / 2, -2),
            Window::new(1, (size - 1).div_ceil(3), 3),
        ];

        group.bench_function(format!("contiguous_{size}x{size}"), |b| {
            b.iter(|| cpu_gather(black_box(&data), black_box(&shape), black_box(&half)).unwrap())
        });
        group.bench_function(format!("strided_{size}x{size}"), |b| {
            b.iter(|| {
                cpu_gather(black_box(&data), black_box(&shape), black_box(&strided)).unwrap()
            })
        });
    }
    group.finish();
}

fn benchmark_scatter(c: &mut Criterion) {
    let mut group = c.benchmark_group("scatter");
    let sizes = [128, 512, 1024];

    for &size in &sizes {
        let shape = [size, size];
        let mut data = vec![0.0f32; size * size];
        let windows = [Window::new(size - 1, size / 2, -2), Window::full(size)];
        let src = vec![1.0f32; (size / 2) * size];

        group.bench_function(format!("{size}x{size}"), |b| {
            b.iter(|| {
                cpu_scatter(&mut data, black_box(&shape), black_box(&windows), black_box(&src))
                    .unwrap()
            })
        });
        group.bench_function(format!("fill_{size}x{size}"), |b| {
            b.iter(|| cpu_fill(&mut data, black_box(&shape), black_box(&windows), 2.0).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_gather, benchmark_scatter);
criterion_main!(benches);
