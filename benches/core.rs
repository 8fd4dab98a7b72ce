#[macro_use]
extern crate criterion;

use criterion::{BenchmarkId, Criterion};
use trellis::{Construct, TraversalOrder};

criterion::criterion_group!(tree, build_wide, build_deep, traverse);
criterion::criterion_main!(tree);

fn build_wide(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_wide");
    for width in &[10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, &width| {
            b.iter(|| {
                let root = Construct::root();
                for i in 0..width {
                    Construct::new(&root, format!("child{}", i)).unwrap();
                }
                root
            })
        });
    }
    group.finish();
}

fn build_deep(c: &mut Criterion) {
    c.bench_function("build_deep 100", |b| {
        b.iter(|| {
            let root = Construct::root();
            let mut scope = root;
            for i in 0..100 {
                scope = Construct::new(&scope, format!("level{}", i)).unwrap();
            }
            scope
        })
    });
}

fn traverse(c: &mut Criterion) {
    let root = Construct::root();
    for i in 0..100 {
        let mid = Construct::new(&root, format!("c{}", i)).unwrap();
        for j in 0..10 {
            Construct::new(&mid, format!("gc{}", j)).unwrap();
        }
    }

    c.bench_function("find_all 1101", |b| {
        b.iter(|| root.node().find_all(TraversalOrder::PreOrder))
    });
    c.bench_function("addr leaf", |b| {
        let leaf = root.node().find_child("c99").unwrap().find_child("gc9").unwrap();
        b.iter(|| leaf.addr())
    });
}
