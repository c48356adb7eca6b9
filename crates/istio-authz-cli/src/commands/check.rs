//! Check command
//!
//! Loads AuthorizationPolicies into an engine and decides one request.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Args;
use istio_authz::{Decision, EngineConfig, Evaluation, PolicyEngine, RequestAttributes, Workload};
use istio_common::yaml::parse_yaml;
use istio_common::{DEFAULT_NAMESPACE, ISTIO_SYSTEM_NAMESPACE};
use tracing::info;

use super::read_documents;
use crate::{Error, Result};

/// Exit code for a DENY decision
pub const DENY_EXIT_CODE: u8 = 3;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Policy manifests; documents other than AuthorizationPolicy are ignored
    #[arg(long, required = true, num_args = 1..)]
    pub policies: Vec<PathBuf>,

    /// Request attributes document (YAML or JSON)
    #[arg(long)]
    pub request: PathBuf,

    /// Namespace of the target workload
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Workload label as key=value (repeatable)
    #[arg(long = "label", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,

    /// Namespaces whose policies apply mesh-wide
    #[arg(
        long = "root-namespace",
        env = "ISTIO_AUTHZ_ROOT_NAMESPACES",
        value_delimiter = ',',
        default_value = ISTIO_SYSTEM_NAMESPACE
    )]
    pub root_namespaces: Vec<String>,
}

pub fn run(args: CheckArgs) -> Result<ExitCode> {
    let evaluation = evaluate(&args)?;

    println!("{}", evaluation.decision);
    println!("reason: {}", evaluation.reason);

    Ok(match evaluation.decision {
        Decision::Allow => ExitCode::SUCCESS,
        Decision::Deny => ExitCode::from(DENY_EXIT_CODE),
    })
}

fn evaluate(args: &CheckArgs) -> Result<Evaluation> {
    let mut documents = Vec::new();
    for path in &args.policies {
        documents.extend(read_documents(path)?);
    }

    let engine = PolicyEngine::new(EngineConfig::with_root_namespaces(
        args.root_namespaces.iter().cloned(),
    ));
    let report = engine.load_documents(documents);
    for rejection in &report.rejected {
        eprintln!("rejected {}: {}", rejection.policy, rejection.error);
    }
    info!(
        loaded = report.loaded.len(),
        rejected = report.rejected.len(),
        "Loaded policies"
    );

    let attrs = read_request(&args.request)?;
    let workload = Workload {
        namespace: args.namespace.clone(),
        labels: args.labels.iter().cloned().collect(),
    };

    Ok(engine.evaluate(&workload, &attrs))
}

fn read_request(path: &Path) -> Result<RequestAttributes> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let value = parse_yaml(&contents)?;
    if value.is_null() {
        return Ok(RequestAttributes::default());
    }
    Ok(serde_json::from_value(value)?)
}

/// Parse `key=value`
fn parse_label(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(Error::invalid_argument(format!(
            "label '{}' is not of the form key=value",
            s
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istio_authz::{DecisionReason, PolicyKey};
    use rstest::rstest;
    use std::io::Write;

    const POLICIES: &str = r#"
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: httpbin-get
  namespace: foo
spec:
  selector:
    matchLabels:
      app: httpbin
  rules:
  - to:
    - operation:
        methods: ["GET"]
---
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: bad
  namespace: foo
spec:
  rules:
  - from:
    - source:
        ipBlocks: ["10.0.0.0/99"]
"#;

    fn file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{}", contents).unwrap();
        f
    }

    fn args(policies: &tempfile::NamedTempFile, request: &tempfile::NamedTempFile) -> CheckArgs {
        CheckArgs {
            policies: vec![policies.path().to_path_buf()],
            request: request.path().to_path_buf(),
            namespace: "foo".to_string(),
            labels: vec![("app".to_string(), "httpbin".to_string())],
            root_namespaces: vec![ISTIO_SYSTEM_NAMESPACE.to_string()],
        }
    }

    #[rstest]
    #[case("app=httpbin", ("app", "httpbin"))]
    #[case("version=", ("version", ""))]
    #[case("a=b=c", ("a", "b=c"))]
    fn test_labels_parse(#[case] input: &str, #[case] expected: (&str, &str)) {
        assert_eq!(
            parse_label(input).unwrap(),
            (expected.0.to_string(), expected.1.to_string())
        );
    }

    #[rstest]
    #[case("app")]
    #[case("=httpbin")]
    fn test_bad_labels_are_rejected(#[case] input: &str) {
        assert!(matches!(
            parse_label(input),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_get_is_allowed_and_post_denied() {
        let policies = file(POLICIES);

        let get = file("method: GET\npath: /headers\n");
        let evaluation = evaluate(&args(&policies, &get)).unwrap();
        assert_eq!(evaluation.decision, Decision::Allow);
        assert_eq!(
            evaluation.reason,
            DecisionReason::AllowedBy(PolicyKey::new("foo", "httpbin-get"))
        );

        let post = file(r#"{"method": "POST", "path": "/post"}"#);
        let evaluation = evaluate(&args(&policies, &post)).unwrap();
        assert_eq!(evaluation.decision, Decision::Deny);
    }

    #[test]
    fn test_empty_request_document_is_empty_attributes() {
        let policies = file(POLICIES);
        let empty = file("");
        let evaluation = evaluate(&args(&policies, &empty)).unwrap();
        assert_eq!(evaluation.reason, DecisionReason::NoMatchingAllow);
    }

    #[test]
    fn test_malformed_request_is_an_error() {
        let policies = file(POLICIES);
        let request = file("sourceIp: not-an-ip\n");
        assert!(matches!(
            evaluate(&args(&policies, &request)),
            Err(Error::Json(_))
        ));
    }
}
