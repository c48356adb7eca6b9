//! Criterion benchmarks for policy evaluation
//!
//! Measures decision latency as the number of policies in the snapshot grows,
//! and the cost of compiling and publishing a new snapshot.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use istio_authz::{PolicyEngine, RequestAttributes, Workload};
use istio_common::crd::security::{
    AuthorizationPolicy, AuthorizationPolicySpec, Condition, Operation, Rule, Source,
};
use istio_common::types::WorkloadSelector;

// =============================================================================
// Test Fixtures
// =============================================================================

fn policy(index: usize) -> AuthorizationPolicy {
    let rule = Rule::from_sources([Source {
        principals: vec![format!("cluster.local/ns/ns-{}/sa/*", index)],
        ip_blocks: vec!["10.0.0.0/8".to_string()],
        ..Default::default()
    }])
    .to_operations([Operation {
        methods: vec!["GET".to_string(), "HEAD".to_string()],
        paths: vec!["/api/*".to_string()],
        not_paths: vec!["/api/admin*".to_string()],
        ..Default::default()
    }])
    .when(Condition::values(
        "request.auth.claims[groups]",
        vec!["readers".to_string()],
    ));

    let spec = if index % 10 == 0 {
        AuthorizationPolicySpec::deny(vec![rule])
    } else {
        AuthorizationPolicySpec::allow(vec![rule])
    };
    let spec = spec.with_selector(WorkloadSelector::new([("app", format!("svc-{}", index % 5))]));

    let mut p = AuthorizationPolicy::new(&format!("policy-{}", index), spec);
    p.metadata.namespace = Some("bench".to_string());
    p
}

fn policies(count: usize) -> Vec<AuthorizationPolicy> {
    (0..count).map(policy).collect()
}

fn request() -> RequestAttributes {
    RequestAttributes::new()
        .with_principal("cluster.local/ns/ns-7/sa/frontend")
        .with_source_ip("10.1.2.3".parse().unwrap())
        .with_method("GET")
        .with_path("/api/v1/items")
        .with_attribute("request.auth.claims[groups]", ["readers", "writers"])
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide");

    for size in [10, 100, 1000] {
        let engine = PolicyEngine::default();
        engine.replace(&policies(size));
        let workload = Workload::new("bench").with_label("app", "svc-2");
        let attrs = request();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("policies", size), &size, |b, _| {
            b.iter(|| engine.decide(black_box(&workload), black_box(&attrs)))
        });
    }
    group.finish();
}

fn bench_replace(c: &mut Criterion) {
    let mut group = c.benchmark_group("replace");

    for size in [10, 100, 1000] {
        let docs = policies(size);
        let engine = PolicyEngine::default();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("compile_and_publish", size), &size, |b, _| {
            b.iter(|| engine.replace(black_box(&docs)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decide, bench_replace);
criterion_main!(benches);
