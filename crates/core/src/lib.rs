//! Reaper core types: discovery data, resource instances and the capability
//! traits the engine drives (cluster client, notification sink, clock).

#![forbid(unsafe_code)]

pub mod discovery;
pub mod duration;
pub mod expiry;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub use discovery::{enumerate, split_group_version};
pub use duration::ParseError;
pub use expiry::{Expiry, ExpiryPolicy};

/// Group/Version/Resource triple addressing one collection on the API server.
/// `group` is empty for the core API group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl Gvr {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }

    /// `apiVersion` form: `v1` for the core group, `group/version` otherwise.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

/// One resource kind as advertised by discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Plural name, used as the API path segment.
    pub plural: String,
    pub kind: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
}

impl ResourceDescriptor {
    pub fn supports(&self, verb: &str) -> bool {
        self.verbs.iter().any(|v| v == verb)
    }
}

/// Resource kinds served under one `group/version` string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiGroupResources {
    pub group_version: String,
    pub resources: Vec<ResourceDescriptor>,
}

/// Fresh view of the API surface, fetched once per pass.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DiscoverySnapshot {
    pub groups: Vec<ApiGroupResources>,
}

/// A resource kind selected for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub gvr: Gvr,
    pub descriptor: ResourceDescriptor,
}

/// Schema-less view of one object in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInstance {
    pub namespace: Option<String>,
    pub name: String,
    pub kind: String,
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Kubernetes annotations as key/value pairs.
    pub annotations: SmallVec<[(String, String); 4]>,
}

impl ResourceInstance {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

// ---- Capabilities ----

/// Errors surfaced by a cluster client implementation.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("api error ({code}): {message}")]
    Api { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
}

/// Parameters for one bounded list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// `None` lists across all namespaces.
    pub namespace: Option<String>,
    pub continue_token: Option<String>,
    pub limit: u32,
    pub timeout: Duration,
}

/// One page of a list response.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<ResourceInstance>,
    /// Empty or absent means this was the last page.
    pub continue_token: Option<String>,
}

/// Cluster API surface used by the engine.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    async fn discover(&self) -> Result<DiscoverySnapshot, ClusterError>;

    async fn list(&self, gvr: &Gvr, request: &ListRequest) -> Result<Page, ClusterError>;

    /// Delete one object. `grace_period_seconds = Some(0)` requests immediate deletion.
    async fn delete(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<(), ClusterError>;
}

/// Cluster-native notification attached to an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub api_version: String,
    pub namespace: Option<String>,
    pub kind: String,
    pub name: String,
    pub reason: String,
    pub message: String,
    pub warning: bool,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), ClusterError>;
}

/// Current-time provider.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// Clock pinned to a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> { self.0 }
}

pub mod prelude {
    pub use super::{
        ApiGroupResources, Clock, ClusterClient, ClusterError, DiscoverySnapshot, Expiry, ExpiryPolicy, Gvr,
        ListRequest, Notification, Notifier, Page, ResourceDescriptor, ResourceInstance, SystemClock, Target,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvr_display_core_and_group() {
        assert_eq!(Gvr::new("", "v1", "pods").to_string(), "v1/pods");
        assert_eq!(Gvr::new("apps", "v1", "deployments").to_string(), "apps/v1/deployments");
        assert_eq!(Gvr::new("apps", "v1", "deployments").api_version(), "apps/v1");
    }

    #[test]
    fn annotation_lookup() {
        let mut annotations = SmallVec::new();
        annotations.push(("a".to_string(), "1".to_string()));
        annotations.push(("b".to_string(), "2".to_string()));
        let inst = ResourceInstance {
            namespace: None,
            name: "x".into(),
            kind: "Thing".into(),
            creation_timestamp: None,
            annotations,
        };
        assert_eq!(inst.annotation("b"), Some("2"));
        assert_eq!(inst.annotation("c"), None);
    }
}
