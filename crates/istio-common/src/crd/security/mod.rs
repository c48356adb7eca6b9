//! security.istio.io/v1beta1 resources

mod authorization_policy;
mod peer_authentication;
mod request_authentication;

pub use authorization_policy::{
    AuthorizationPolicy, AuthorizationPolicyAction, AuthorizationPolicySpec, Condition,
    Operation, Rule, RuleFrom, RuleTo, Source,
};
pub use peer_authentication::{
    MtlsMode, PeerAuthentication, PeerAuthenticationMtls, PeerAuthenticationSpec,
};
pub use request_authentication::{
    JwtHeader, JwtRule, RequestAuthentication, RequestAuthenticationSpec,
};
