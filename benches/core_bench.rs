//! Benchmarks for stagehand core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stagehand::core::{parser, resolver};
use stagehand::provenance::hasher;
use std::collections::HashMap;

fn bench_hash_directory(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_directory");
    for files in [10, 100, 500] {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..files {
            let sub = dir.path().join(format!("resources/d{}", i % 8));
            std::fs::create_dir_all(&sub).unwrap();
            std::fs::write(sub.join(format!("f{i:04}.sh")), vec![b'x'; 4096]).unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(files), dir.path(), |b, root| {
            b.iter(|| black_box(hasher::hash_directory(black_box(root)).unwrap()));
        });
    }
    group.finish();
}

/// A chain template where every stage fans in all earlier stages.
fn chain_template(n: u32) -> String {
    let mut yaml = String::from("name: chain\nstages:\n");
    for i in 0..n {
        yaml.push_str(&format!("  - index: {i}\n    applet: step\n"));
        if i > 0 {
            yaml.push_str("    linked_input:\n      reads:\n");
            for j in 0..i {
                yaml.push_str(&format!("        - {{ stage: {j}, field: out }}\n"));
            }
        }
    }
    yaml
}

fn bench_template_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("template_parse");
    for n in [5, 20, 50] {
        let yaml = chain_template(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &yaml, |b, yaml| {
            b.iter(|| black_box(parser::parse_template(black_box(yaml)).unwrap()));
        });
    }
    group.finish();
}

fn bench_link_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_resolution");
    for n in [5, 20, 50] {
        let template = parser::parse_template(&chain_template(n)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &template, |b, template| {
            b.iter(|| {
                resolver::check_link_order(template).unwrap();
                let mut bound: HashMap<u32, String> = HashMap::new();
                for stage in resolver::binding_order(template) {
                    for (field, target) in &stage.linked_input {
                        let input =
                            resolver::resolve_link_target(stage.index, field, target, &bound)
                                .unwrap();
                        black_box(input);
                    }
                    bound.insert(stage.index, format!("stage-{:08}", stage.index));
                }
                black_box(bound);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_hash_directory,
    bench_template_parse,
    bench_link_resolution
);
criterion_main!(benches);
