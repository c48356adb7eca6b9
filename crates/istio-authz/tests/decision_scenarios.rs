//! End-to-end decision scenarios
//!
//! Policies are written as YAML manifests, loaded through
//! `PolicyEngine::load_documents` and evaluated against request attributes.

use std::collections::BTreeSet;
use std::thread;

use istio_authz::{
    Decision, DecisionReason, EngineConfig, PolicyEngine, PolicyKey, RequestAttributes, Workload,
};
use istio_common::yaml::parse_yaml_multi;

// =============================================================================
// Fixtures
// =============================================================================

fn engine_with(manifests: &str) -> PolicyEngine {
    let engine = PolicyEngine::default();
    let report = engine.load_documents(parse_yaml_multi(manifests).expect("valid YAML"));
    assert!(report.is_clean(), "unexpected rejections: {:?}", report.rejected);
    engine
}

const DENY_ALL: &str = r#"
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: deny-all
  namespace: foo
spec:
  action: DENY
  rules:
  - {}
"#;

const DENY_DEV_POST: &str = r#"
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: deny-dev-post
  namespace: foo
spec:
  action: DENY
  rules:
  - from:
    - source:
        namespaces: ["dev"]
    to:
    - operation:
        methods: ["POST"]
"#;

const REQUIRE_GOOGLE_ISSUER: &str = r#"
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: require-google
  namespace: foo
spec:
  rules:
  - when:
    - key: request.auth.claims[iss]
      values: ["https://accounts.google.com"]
"#;

const BOOKINFO: &str = r#"
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: productpage-viewer
  namespace: bookinfo
spec:
  selector:
    matchLabels:
      app: productpage
  action: ALLOW
  rules:
  - from:
    - source:
        principals: ["cluster.local/ns/istio-ingress/sa/*"]
    to:
    - operation:
        methods: ["GET", "HEAD"]
        paths: ["/productpage", "/static/*", "/api/v1/products*"]
        notPaths: ["/api/v1/products/internal*"]
---
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: block-external
  namespace: istio-system
spec:
  action: DENY
  rules:
  - from:
    - source:
        notIpBlocks: ["10.0.0.0/8", "192.168.0.0/16"]
"#;

fn ingress_get(path: &str) -> RequestAttributes {
    RequestAttributes::new()
        .with_principal("cluster.local/ns/istio-ingress/sa/gateway")
        .with_namespace("istio-ingress")
        .with_source_ip("10.4.0.12".parse().unwrap())
        .with_method("GET")
        .with_path(path)
}

// =============================================================================
// Precedence
// =============================================================================

#[test]
fn test_deny_with_empty_rule_denies_every_selected_request() {
    let engine = engine_with(DENY_ALL);
    let workload = Workload::new("foo").with_label("app", "anything");

    for attrs in [
        RequestAttributes::new(),
        RequestAttributes::new().with_method("GET").with_path("/"),
        RequestAttributes::new()
            .with_principal("cluster.local/ns/foo/sa/admin")
            .with_port(8443),
    ] {
        assert_eq!(engine.decide(&workload, &attrs), Decision::Deny);
    }
}

#[test]
fn test_unconfigured_workload_is_allowed() {
    let engine = engine_with(DENY_ALL);
    let evaluation = engine.evaluate(&Workload::new("bar"), &RequestAttributes::new());
    assert_eq!(evaluation.decision, Decision::Allow);
    assert_eq!(evaluation.reason, DecisionReason::NoAllowPolicies);
}

#[test]
fn test_repeated_decisions_are_identical() {
    let engine = engine_with(BOOKINFO);
    let workload = Workload::new("bookinfo").with_label("app", "productpage");
    let attrs = ingress_get("/productpage");

    let first = engine.evaluate(&workload, &attrs);
    let second = engine.evaluate(&workload, &attrs);
    assert_eq!(first, second);
}

#[test]
fn test_deny_post_from_dev_only() {
    let engine = engine_with(DENY_DEV_POST);
    let workload = Workload::new("foo");

    let dev_post = RequestAttributes::new().with_namespace("dev").with_method("POST");
    let dev_get = RequestAttributes::new().with_namespace("dev").with_method("GET");
    let prod_post = RequestAttributes::new().with_namespace("prod").with_method("POST");

    assert_eq!(engine.decide(&workload, &dev_post), Decision::Deny);
    assert_eq!(engine.decide(&workload, &dev_get), Decision::Allow);
    assert_eq!(engine.decide(&workload, &prod_post), Decision::Allow);
}

#[test]
fn test_absent_condition_key_fails_allow_rule() {
    let engine = engine_with(REQUIRE_GOOGLE_ISSUER);
    let workload = Workload::new("foo");

    let without_claim = RequestAttributes::new();
    let with_claim = RequestAttributes::new()
        .with_attribute("request.auth.claims[iss]", ["https://accounts.google.com"]);

    let evaluation = engine.evaluate(&workload, &without_claim);
    assert_eq!(evaluation.decision, Decision::Deny);
    assert_eq!(evaluation.reason, DecisionReason::NoMatchingAllow);
    assert_eq!(engine.decide(&workload, &with_claim), Decision::Allow);
}

// =============================================================================
// Selectors and scoping
// =============================================================================

#[test]
fn test_bookinfo_productpage() {
    let engine = engine_with(BOOKINFO);
    let productpage = Workload::new("bookinfo").with_label("app", "productpage");
    let reviews = Workload::new("bookinfo").with_label("app", "reviews");

    let evaluation = engine.evaluate(&productpage, &ingress_get("/static/app.js"));
    assert_eq!(
        evaluation.reason,
        DecisionReason::AllowedBy(PolicyKey::new("bookinfo", "productpage-viewer"))
    );

    assert_eq!(
        engine.decide(&productpage, &ingress_get("/api/v1/products/internal/cost")),
        Decision::Deny
    );
    assert_eq!(
        engine.decide(&productpage, &ingress_get("/api/v1/products/0")),
        Decision::Allow
    );
    assert_eq!(
        engine.decide(&productpage, &ingress_get("/admin")),
        Decision::Deny
    );

    let post = ingress_get("/productpage").with_method("POST");
    assert_eq!(engine.decide(&productpage, &post), Decision::Deny);

    // The selector does not pick reviews, so nothing but the root DENY applies
    assert_eq!(engine.decide(&reviews, &ingress_get("/admin")), Decision::Allow);
}

#[test]
fn test_root_namespace_policy_applies_to_every_namespace() {
    let engine = engine_with(BOOKINFO);
    let external = RequestAttributes::new().with_source_ip("203.0.113.9".parse().unwrap());

    for namespace in ["bookinfo", "foo", "istio-system"] {
        let evaluation = engine.evaluate(&Workload::new(namespace), &external);
        assert_eq!(
            evaluation.reason,
            DecisionReason::DeniedBy(PolicyKey::new("istio-system", "block-external")),
            "namespace {}",
            namespace
        );
    }
}

#[test]
fn test_root_namespaces_are_configurable() {
    let engine = PolicyEngine::new(EngineConfig::with_root_namespaces(["mesh-root"]));
    engine.load_documents(parse_yaml_multi(BOOKINFO).unwrap());

    let external = RequestAttributes::new().with_source_ip("203.0.113.9".parse().unwrap());
    assert_eq!(
        engine.decide(&Workload::new("foo"), &external),
        Decision::Allow
    );
    assert_eq!(
        engine.decide(&Workload::new("istio-system"), &external),
        Decision::Deny
    );
}

#[test]
fn test_port_globs_deny_matching_ports() {
    let engine = engine_with(
        r#"
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: deny-any-port
  namespace: foo
spec:
  action: DENY
  rules:
  - to:
    - operation:
        ports: ["*"]
---
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: deny-80xx
  namespace: bar
spec:
  action: DENY
  rules:
  - to:
    - operation:
        ports: ["80*"]
"#,
    );

    let on = |port: u16| RequestAttributes::new().with_method("GET").with_port(port);
    assert_eq!(engine.decide(&Workload::new("foo"), &on(8080)), Decision::Deny);
    assert_eq!(
        engine.decide(&Workload::new("foo"), &RequestAttributes::new()),
        Decision::Allow
    );
    assert_eq!(engine.decide(&Workload::new("bar"), &on(8080)), Decision::Deny);
    assert_eq!(engine.decide(&Workload::new("bar"), &on(9080)), Decision::Allow);
}

// =============================================================================
// Load-time rejection
// =============================================================================

#[test]
fn test_malformed_policies_are_excluded_and_reported() {
    let manifests = format!(
        "{}\n---\n{}",
        DENY_DEV_POST,
        r#"
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: bad-cidr
  namespace: foo
spec:
  action: DENY
  rules:
  - from:
    - source:
        ipBlocks: ["10.0.0.0/40"]
---
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: empty-condition
  namespace: foo
spec:
  rules:
  - when:
    - key: request.headers[x-user]
---
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: missing-operation
  namespace: foo
spec:
  rules:
  - to:
    - {}
---
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: unknown-action
  namespace: foo
spec:
  action: MAYBE
"#
    );

    let engine = PolicyEngine::default();
    let report = engine.load_documents(parse_yaml_multi(&manifests).unwrap());

    assert_eq!(report.loaded, vec![PolicyKey::new("foo", "deny-dev-post")]);
    let rejected: BTreeSet<&str> = report.rejected.iter().map(|r| r.policy.as_str()).collect();
    assert_eq!(
        rejected,
        BTreeSet::from([
            "foo/bad-cidr",
            "foo/empty-condition",
            "foo/missing-operation",
            "foo/unknown-action"
        ])
    );

    // Rejected ALLOW policies must not flip the workload to default-deny
    let workload = Workload::new("foo");
    let dev_get = RequestAttributes::new().with_namespace("dev").with_method("GET");
    assert_eq!(engine.decide(&workload, &dev_get), Decision::Allow);
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn test_readers_keep_their_snapshot_across_replace() {
    let engine = engine_with(DENY_ALL);
    let workload = Workload::new("foo");
    let attrs = RequestAttributes::new();
    let held = engine.snapshot();

    engine.load_documents(Vec::new());

    let roots = engine.config().root_namespaces.clone();
    assert_eq!(held.evaluate(&workload, &attrs, &roots).decision, Decision::Deny);
    assert_eq!(engine.decide(&workload, &attrs), Decision::Allow);
}

#[test]
fn test_concurrent_readers_see_whole_snapshots() {
    let allow_dev = r#"
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: allow-dev
  namespace: foo
spec:
  rules:
  - from:
    - source:
        namespaces: ["dev"]
"#;
    let both = format!("{}\n---\n{}", DENY_ALL, allow_dev);
    let first = parse_yaml_multi(&both).unwrap();
    let second = parse_yaml_multi(allow_dev).unwrap();

    let engine = engine_with(&both);
    let workload = Workload::new("foo");
    let attrs = RequestAttributes::new().with_namespace("dev");

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..200 {
                let docs = if i % 2 == 0 { second.clone() } else { first.clone() };
                engine.load_documents(docs);
            }
        });

        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..500 {
                    let snapshot = engine.snapshot();
                    let decision = snapshot
                        .evaluate(&workload, &attrs, &engine.config().root_namespaces)
                        .decision;
                    // Two policies always means DENY, one always ALLOW
                    match snapshot.len() {
                        2 => assert_eq!(decision, Decision::Deny),
                        1 => assert_eq!(decision, Decision::Allow),
                        n => panic!("partial snapshot with {} policies", n),
                    }
                }
            });
        }
    });
}
