//! networking.istio.io resources

mod destination_rule;
mod sidecar;
mod virtual_service;
mod workload_entry;
mod workload_group;

pub use destination_rule::{
    ConnectionPoolSettings, ConsistentHashLb, DestinationRule, DestinationRuleSpec,
    H2UpgradePolicy, HttpCookie, HttpSettings, LoadBalancerSettings, OutlierDetection,
    PortTrafficPolicy, SimpleLb, Subset, TcpKeepalive, TcpSettings, TlsMode, TlsSettings,
    TrafficPolicy, TrafficPolicyCommon,
};
pub use sidecar::{
    CaptureMode, IstioEgressListener, IstioIngressListener, OutboundTrafficPolicy,
    OutboundTrafficPolicyMode, Port, Sidecar, SidecarSpec, SidecarWorkloadSelector,
};
pub use virtual_service::{
    Abort, CorsPolicy, Delay, Destination, HeaderOperations, Headers, HttpFaultInjection,
    HttpMatchRequest, HttpRedirect, HttpRetry, HttpRewrite, HttpRoute, HttpRouteDestination,
    L4MatchAttributes, Percentage, PortSelector, RouteDestination, TcpRoute,
    TlsMatchAttributes, TlsRoute, VirtualService, VirtualServiceSpec,
};
pub use workload_entry::{WorkloadEntry, WorkloadEntrySpec};
pub use workload_group::{
    ExecHealthCheckConfig, HttpHeader, HttpHealthCheckConfig, ReadinessProbe,
    TcpHealthCheckConfig, WorkloadGroup, WorkloadGroupMeta, WorkloadGroupSpec,
};
