//! Custom Resource Definitions for Istio
//!
//! Typed mirrors of the networking.istio.io and security.istio.io resources,
//! plus [`IstioResource`] for loading manifests whose kind is only known at
//! runtime.

pub mod networking;
pub mod security;

pub use networking::{
    DestinationRule, DestinationRuleSpec, Sidecar, SidecarSpec, VirtualService,
    VirtualServiceSpec, WorkloadEntry, WorkloadEntrySpec, WorkloadGroup, WorkloadGroupSpec,
};
pub use security::{
    AuthorizationPolicy, AuthorizationPolicyAction, AuthorizationPolicySpec, PeerAuthentication,
    PeerAuthenticationSpec, RequestAuthentication, RequestAuthenticationSpec,
};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResourceExt, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::Error;

/// API versions served for each Istio group. Istio promotes the same schema
/// through versions, so a manifest written against any of them decodes into
/// the same type.
const SERVED_VERSIONS: &[&str] = &["v1alpha3", "v1beta1", "v1"];

/// Any Istio resource modelled by this crate
#[derive(Clone, Debug, PartialEq)]
pub enum IstioResource {
    /// networking.istio.io DestinationRule
    DestinationRule(Box<DestinationRule>),
    /// networking.istio.io VirtualService
    VirtualService(Box<VirtualService>),
    /// networking.istio.io Sidecar
    Sidecar(Box<Sidecar>),
    /// networking.istio.io WorkloadEntry
    WorkloadEntry(Box<WorkloadEntry>),
    /// networking.istio.io WorkloadGroup
    WorkloadGroup(Box<WorkloadGroup>),
    /// security.istio.io AuthorizationPolicy
    AuthorizationPolicy(Box<AuthorizationPolicy>),
    /// security.istio.io PeerAuthentication
    PeerAuthentication(Box<PeerAuthentication>),
    /// security.istio.io RequestAuthentication
    RequestAuthentication(Box<RequestAuthentication>),
}

impl IstioResource {
    /// Decode a JSON document, dispatching on its `apiVersion` and `kind`
    pub fn from_value(value: Value) -> Result<Self, Error> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let unknown = || Error::UnknownResource {
            api_version: api_version.clone(),
            kind: kind.clone(),
        };

        let (group, version) = api_version.split_once('/').ok_or_else(unknown)?;
        if !SERVED_VERSIONS.contains(&version) {
            return Err(unknown());
        }

        let resource = match kind.as_str() {
            "DestinationRule" => Self::DestinationRule(decode(group, value)?),
            "VirtualService" => Self::VirtualService(decode(group, value)?),
            "Sidecar" => Self::Sidecar(decode(group, value)?),
            "WorkloadEntry" => Self::WorkloadEntry(decode(group, value)?),
            "WorkloadGroup" => Self::WorkloadGroup(decode(group, value)?),
            "AuthorizationPolicy" => Self::AuthorizationPolicy(decode(group, value)?),
            "PeerAuthentication" => Self::PeerAuthentication(decode(group, value)?),
            "RequestAuthentication" => Self::RequestAuthentication(decode(group, value)?),
            _ => return Err(unknown()),
        };

        debug!(kind = %kind, name = %resource.name(), "decoded resource");
        Ok(resource)
    }

    /// The resource kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DestinationRule(_) => "DestinationRule",
            Self::VirtualService(_) => "VirtualService",
            Self::Sidecar(_) => "Sidecar",
            Self::WorkloadEntry(_) => "WorkloadEntry",
            Self::WorkloadGroup(_) => "WorkloadGroup",
            Self::AuthorizationPolicy(_) => "AuthorizationPolicy",
            Self::PeerAuthentication(_) => "PeerAuthentication",
            Self::RequestAuthentication(_) => "RequestAuthentication",
        }
    }

    /// `namespace/name`, or just the name for resources without a namespace
    pub fn name(&self) -> String {
        let (name, namespace) = match self {
            Self::DestinationRule(r) => (r.name_any(), r.namespace()),
            Self::VirtualService(r) => (r.name_any(), r.namespace()),
            Self::Sidecar(r) => (r.name_any(), r.namespace()),
            Self::WorkloadEntry(r) => (r.name_any(), r.namespace()),
            Self::WorkloadGroup(r) => (r.name_any(), r.namespace()),
            Self::AuthorizationPolicy(r) => (r.name_any(), r.namespace()),
            Self::PeerAuthentication(r) => (r.name_any(), r.namespace()),
            Self::RequestAuthentication(r) => (r.name_any(), r.namespace()),
        };
        match namespace {
            Some(ns) => format!("{}/{}", ns, name),
            None => name,
        }
    }

    /// Run the spec-level validation of the wrapped resource, tagging any
    /// error with this resource's kind and name
    pub fn validate(&self) -> Result<(), Error> {
        let result = match self {
            Self::DestinationRule(r) => r.spec.validate(),
            Self::VirtualService(r) => r.spec.validate(),
            Self::Sidecar(r) => r.spec.validate(),
            Self::WorkloadEntry(r) => r.spec.validate(),
            Self::WorkloadGroup(r) => r.spec.validate(),
            Self::AuthorizationPolicy(r) => r.spec.validate(),
            Self::PeerAuthentication(r) => r.spec.validate(),
            Self::RequestAuthentication(r) => r.spec.validate(),
        };
        result.map_err(|e| e.for_resource(self.kind(), self.name()))
    }

    /// The wrapped AuthorizationPolicy, if that is what this is
    pub fn as_authorization_policy(&self) -> Option<&AuthorizationPolicy> {
        match self {
            Self::AuthorizationPolicy(p) => Some(p.as_ref()),
            _ => None,
        }
    }
}

fn decode<T>(group: &str, value: Value) -> Result<Box<T>, Error>
where
    T: Resource<DynamicType = ()> + DeserializeOwned,
{
    let kind = T::kind(&());
    if group != T::group(&()) {
        return Err(Error::UnknownResource {
            api_version: format!("{}/{}", group, T::version(&())),
            kind: kind.to_string(),
        });
    }
    serde_json::from_value(value)
        .map(Box::new)
        .map_err(|e| Error::serialization_for(kind.as_ref(), e.to_string()))
}

/// Parse a multi-document YAML manifest into resources.
///
/// Empty documents are skipped. The first document that fails to decode
/// aborts the whole parse; callers that need per-document outcomes should
/// iterate [`crate::yaml::parse_yaml_multi`] and call
/// [`IstioResource::from_value`] themselves.
pub fn parse_documents(input: &str) -> Result<Vec<IstioResource>, Error> {
    crate::yaml::parse_yaml_multi(input)?
        .into_iter()
        .map(IstioResource::from_value)
        .collect()
}

/// CustomResourceDefinitions for every resource in this crate
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        DestinationRule::crd(),
        VirtualService::crd(),
        Sidecar::crd(),
        WorkloadEntry::crd(),
        WorkloadGroup::crd(),
        AuthorizationPolicy::crd(),
        PeerAuthentication::crd(),
        RequestAuthentication::crd(),
    ]
}

/// Serde skip helper for zero-valued integers
pub(crate) fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

/// Serde skip helper for zero-valued integers
pub(crate) fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
apiVersion: security.istio.io/v1beta1
kind: AuthorizationPolicy
metadata:
  name: deny-all
  namespace: foo
spec:
  action: DENY
  rules:
  - {}
---
---
apiVersion: networking.istio.io/v1alpha3
kind: DestinationRule
metadata:
  name: reviews
spec:
  host: reviews
"#;

    #[test]
    fn test_parses_mixed_manifest_skipping_empty_documents() {
        let resources = parse_documents(MANIFEST).expect("parse");
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].kind(), "AuthorizationPolicy");
        assert_eq!(resources[0].name(), "foo/deny-all");
        assert_eq!(resources[1].kind(), "DestinationRule");
        assert_eq!(resources[1].name(), "reviews");
        assert!(resources[0].as_authorization_policy().is_some());
        assert!(resources[1].as_authorization_policy().is_none());
    }

    #[test]
    fn test_promoted_versions_decode_to_same_type() {
        let value = serde_json::json!({
            "apiVersion": "networking.istio.io/v1",
            "kind": "VirtualService",
            "metadata": {"name": "r"},
            "spec": {"hosts": ["reviews"]}
        });
        let resource = IstioResource::from_value(value).expect("decode");
        assert_eq!(resource.kind(), "VirtualService");
    }

    #[test]
    fn test_resources_compare_by_value() {
        let first = parse_documents(MANIFEST).expect("parse");
        let second = parse_documents(MANIFEST).expect("parse");
        assert_eq!(first, second);
        assert_ne!(first[0], first[1]);

        let mut changed = second[1].clone();
        if let IstioResource::DestinationRule(rule) = &mut changed {
            rule.spec.host = "ratings".to_string();
        }
        assert_ne!(first[1], changed);
    }

    #[test]
    fn test_unknown_kind_is_reported() {
        let value = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "d"}
        });
        assert!(matches!(
            IstioResource::from_value(value),
            Err(Error::UnknownResource { .. })
        ));
    }

    #[test]
    fn test_kind_in_wrong_group_is_unknown() {
        let value = serde_json::json!({
            "apiVersion": "security.istio.io/v1beta1",
            "kind": "Sidecar",
            "metadata": {"name": "s"},
            "spec": {}
        });
        assert!(matches!(
            IstioResource::from_value(value),
            Err(Error::UnknownResource { .. })
        ));
    }

    #[test]
    fn test_decode_error_names_the_kind() {
        let value = serde_json::json!({
            "apiVersion": "security.istio.io/v1beta1",
            "kind": "AuthorizationPolicy",
            "metadata": {"name": "p"},
            "spec": {"action": "AUDIT"}
        });
        match IstioResource::from_value(value) {
            Err(Error::Serialization { kind, .. }) => {
                assert_eq!(kind.as_deref(), Some("AuthorizationPolicy"))
            }
            other => panic!("expected serialization error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_tags_resource_context() {
        let value = serde_json::json!({
            "apiVersion": "networking.istio.io/v1alpha3",
            "kind": "DestinationRule",
            "metadata": {"name": "bad", "namespace": "prod"},
            "spec": {"host": ""}
        });
        let err = IstioResource::from_value(value)
            .expect("decode")
            .validate()
            .unwrap_err();
        match err {
            Error::Validation { kind, name, .. } => {
                assert_eq!(kind, "DestinationRule");
                assert_eq!(name, "prod/bad");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_crds_cover_every_kind() {
        let crds = all_crds();
        assert_eq!(crds.len(), 8);
        let ap = crds
            .iter()
            .find(|c| c.spec.names.kind == "AuthorizationPolicy")
            .expect("AuthorizationPolicy crd");
        assert_eq!(ap.spec.group, "security.istio.io");
        assert_eq!(ap.spec.names.plural, "authorizationpolicies");
    }
}
