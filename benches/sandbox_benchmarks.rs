//! Benchmarks for the code sandbox.
//!
//! Run with: cargo bench
//!
//! The execution groups need python3 and node on `PATH` and are skipped
//! without them.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use code_sandbox_rs::prelude::*;
use code_sandbox_rs::sandbox::analysis::analyze;
use code_sandbox_rs::sandbox::wrapper::WrapperGenerator;

const PYTHON_SOURCE: &str = r#"
import json
import math
from collections import Counter
import numpy as np

def helper(values):
    return [math.sqrt(v) for v in values]

async def main(values, scale=2):
    counts = Counter(values)
    return {"roots": helper(values), "counts": json.dumps(counts), "scale": scale}
"#;

const JAVASCRIPT_SOURCE: &str = r#"
const _ = require('lodash');
import dayjs from 'dayjs';

async function main({ values }) {
  const doubled = values.map((v) => v * 2);
  return { sum: _.sum(doubled), when: dayjs(0).year() };
}
"#;

fn interpreter_available(program: &str) -> bool {
    let found = which::which(program).is_ok();
    if !found {
        eprintln!("Skipping execution benchmarks: {} not found", program);
    }
    found
}

fn bench_config() -> SandboxConfig {
    SandboxConfig::builder()
        .default_time_limit(Duration::from_secs(30))
        .auto_install(false)
        .build()
}

/// Static analysis of user source.
fn bench_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("analysis");

    for (language, source) in [
        (Language::Python, PYTHON_SOURCE),
        (Language::JavaScript, JAVASCRIPT_SOURCE),
    ] {
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("analyze", language),
            source,
            |b, source| b.iter(|| black_box(analyze(language, black_box(source)))),
        );
    }

    let policy = SecurityPolicy::default();
    let analysis = analyze(Language::Python, PYTHON_SOURCE);
    group.bench_function("policy_check_python", |b| {
        b.iter(|| black_box(policy.check(&analysis, PYTHON_SOURCE)))
    });

    group.finish();
}

/// Wrapper generation with a growing variable set.
fn bench_wrapper_generation(c: &mut Criterion) {
    let config = bench_config();
    let generator = WrapperGenerator::new(&config);
    let mut group = c.benchmark_group("wrapper");

    for count in [1usize, 16, 256] {
        let mut request = ExecutionRequest::python(PYTHON_SOURCE);
        for i in 0..count {
            request = request.with_variable(format!("v{}", i), json!({"index": i, "tags": ["a", "b"]}));
        }
        let analysis = analyze(request.language, &request.code);
        group.bench_with_input(BenchmarkId::new("python_variables", count), &request, |b, request| {
            b.iter(|| black_box(generator.generate(request, &analysis).map(|w| w.render())))
        });
    }

    let request = ExecutionRequest::javascript(JAVASCRIPT_SOURCE).with_variable("values", json!([1, 2, 3]));
    let analysis = analyze(request.language, &request.code);
    group.bench_function("javascript", |b| {
        b.iter(|| black_box(generator.generate(&request, &analysis).map(|w| w.render())))
    });

    group.finish();
}

/// End-to-end execution, including interpreter startup.
fn bench_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let sandbox = CodeSandbox::new(bench_config()).unwrap();

    let mut group = c.benchmark_group("execution");
    group.sample_size(10);

    if interpreter_available("python3") {
        group.bench_function("python_trivial", |b| {
            b.iter(|| {
                let outcome = rt.block_on(sandbox.execute(ExecutionRequest::python("def main(): return 1")));
                assert!(outcome.is_success());
                black_box(outcome)
            });
        });

        group.bench_function("python_loop", |b| {
            let request = ExecutionRequest::python("def main(n):\n    return sum(range(n))")
                .with_variable("n", 100_000);
            b.iter(|| black_box(rt.block_on(sandbox.execute(request.clone()))));
        });
    }

    if interpreter_available("node") {
        group.bench_function("javascript_trivial", |b| {
            b.iter(|| {
                let outcome = rt.block_on(sandbox.execute(ExecutionRequest::javascript("function main() { return 1; }")));
                assert!(outcome.is_success());
                black_box(outcome)
            });
        });
    }

    group.finish();
}

/// Concurrent executions sharing one sandbox.
fn bench_concurrent_execution(c: &mut Criterion) {
    if !interpreter_available("python3") {
        return;
    }

    let rt = Runtime::new().unwrap();
    let sandbox = Arc::new(CodeSandbox::new(bench_config()).unwrap());

    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    for concurrency in [1, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("executions", concurrency),
            concurrency,
            |b, &concurrency| {
                b.iter(|| {
                    rt.block_on(async {
                        let mut handles = Vec::new();

                        for i in 0..concurrency {
                            let sandbox = sandbox.clone();
                            let request = ExecutionRequest::python("def main(i): return i * 2")
                                .with_variable("i", i);
                            handles.push(tokio::spawn(async move { sandbox.execute(request).await }));
                        }

                        for handle in handles {
                            let outcome = handle.await.unwrap();
                            black_box(outcome);
                        }
                    });
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_analysis,
    bench_wrapper_generation,
    bench_execution,
    bench_concurrent_execution,
);

criterion_main!(benches);
