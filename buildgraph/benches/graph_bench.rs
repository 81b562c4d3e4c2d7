//! Benchmarks for graph construction, validation, and plan signatures.

use buildgraph::prelude::*;
use buildgraph::fingerprint::plan_signature;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// A chain of targets, each compiling `files` sources into one archive that
/// the next target links against.
fn request(targets: usize, files: usize) -> BuildRequest {
    let mut project = Project::new("Bench");
    for t in 0..targets {
        let name = format!("T{t}");
        let mut compile = Phase::new("Compile");
        for f in 0..files {
            compile = compile.item(
                WorkItem::new(
                    format!("Compile {f}"),
                    CommandSpec::new("cc").arg("-c").arg(format!("{name}/{f}.c")),
                )
                .input(Artifact::file(format!("/src/{name}/{f}.c")))
                .output(Artifact::file(format!("/obj/{name}/{f}.o"))),
            );
        }
        let mut archive = WorkItem::new(format!("Archive {name}"), CommandSpec::new("ar"))
            .output(Artifact::file(format!("/lib/{name}.a")));
        for f in 0..files {
            archive = archive.input(Artifact::file(format!("/obj/{name}/{f}.o")));
        }
        let mut target = Target::new(&name)
            .phase(compile)
            .phase(Phase::new("Archive").item(archive));
        if t > 0 {
            target = target.depends_on(format!("T{}", t - 1));
        }
        project = project.target(target);
    }
    BuildRequest::new(Workspace::new("bench").project(project))
}

fn graph_benchmark(c: &mut Criterion) {
    let builder = GraphBuilder::default();
    let mut group = c.benchmark_group("graph");
    for &(targets, files) in &[(10, 10), (50, 20)] {
        let req = request(targets, files);
        let id = format!("{targets}x{files}");

        group.bench_with_input(BenchmarkId::new("build", &id), &req, |b, req| {
            b.iter(|| black_box(builder.build(req)))
        });

        group.bench_with_input(BenchmarkId::new("validate", &id), &req, |b, req| {
            b.iter_batched(
                || builder.build(req).unwrap(),
                |graph| black_box(validate(graph)),
                criterion::BatchSize::SmallInput,
            )
        });

        let graph = builder.build(&req).unwrap();
        group.bench_with_input(BenchmarkId::new("plan_signature", &id), &graph, |b, graph| {
            b.iter(|| black_box(plan_signature(graph)))
        });
    }
    group.finish();
}

criterion_group!(benches, graph_benchmark);
criterion_main!(benches);
