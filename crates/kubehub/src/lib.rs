//! Reaper kubehub – kube-rs backed cluster client: discovery, dynamic list/delete.

#![forbid(unsafe_code)]

pub mod events;

use std::time::Instant;

use anyhow::{Context, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::{
    api::{Api, DeleteParams, ListParams},
    core::{ApiResource, DynamicObject},
    Client,
};
use metrics::histogram;
use reaper_core::prelude::*;
use tracing::{debug, warn};

pub use events::KubeEvents;

/// Build a client from the in-cluster service account or the local kubeconfig.
pub async fn connect() -> Result<Client> {
    Client::try_default().await.context("inferring kube client configuration")
}

fn cluster_error(e: kube::Error) -> ClusterError {
    match e {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(resp.message),
        kube::Error::Api(resp) => ClusterError::Api { code: resp.code, message: resp.message },
        other => ClusterError::Transport(other.to_string()),
    }
}

/// Dynamic API resource for a GVR. Kind is not needed to address the collection.
fn api_resource(gvr: &Gvr) -> ApiResource {
    ApiResource {
        group: gvr.group.clone(),
        version: gvr.version.clone(),
        api_version: gvr.api_version(),
        kind: String::new(),
        plural: gvr.resource.clone(),
    }
}

/// Assemble a snapshot from raw discovery lists, keeping server order.
pub fn snapshot_from(lists: Vec<APIResourceList>) -> DiscoverySnapshot {
    let groups = lists
        .into_iter()
        .filter(|l| !l.resources.is_empty())
        .map(|l| ApiGroupResources {
            group_version: l.group_version,
            resources: l
                .resources
                .into_iter()
                .map(|r| ResourceDescriptor { plural: r.name, kind: r.kind, namespaced: r.namespaced, verbs: r.verbs })
                .collect(),
        })
        .collect();
    DiscoverySnapshot { groups }
}

/// Project a dynamic object onto the fields expiry evaluation needs.
pub fn instance_from(obj: &DynamicObject) -> ResourceInstance {
    let meta = &obj.metadata;
    ResourceInstance {
        namespace: meta.namespace.clone().filter(|ns| !ns.is_empty()),
        name: meta.name.clone().unwrap_or_default(),
        kind: obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
        creation_timestamp: meta.creation_timestamp.as_ref().map(|t| t.0),
        annotations: meta
            .annotations
            .as_ref()
            .map(|a| a.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
    }
}

/// Cluster client over a live kube `Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, gvr: &Gvr, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(gvr);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeCluster {
    async fn discover(&self) -> Result<DiscoverySnapshot, ClusterError> {
        let started = Instant::now();
        let mut lists = Vec::new();

        let core = self.client.list_core_api_versions().await.map_err(cluster_error)?;
        for version in &core.versions {
            lists.push(self.client.list_core_api_resources(version).await.map_err(cluster_error)?);
        }

        let groups = self.client.list_api_groups().await.map_err(cluster_error)?;
        for group in &groups.groups {
            for gv in &group.versions {
                match self.client.list_api_group_resources(&gv.group_version).await {
                    Ok(list) => lists.push(list),
                    // Aggregated APIs can be temporarily unavailable; the rest of the surface is still usable.
                    Err(e) => warn!(group_version = %gv.group_version, error = %e, "group discovery failed; skipping"),
                }
            }
        }

        let snapshot = snapshot_from(lists);
        histogram!("discovery_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(groups = snapshot.groups.len(), "discovery complete");
        Ok(snapshot)
    }

    async fn list(&self, gvr: &Gvr, request: &ListRequest) -> Result<Page, ClusterError> {
        let api = self.api(gvr, request.namespace.as_deref());
        let lp = ListParams {
            limit: Some(request.limit),
            timeout: Some(request.timeout.as_secs().min(u64::from(u32::MAX)) as u32),
            continue_token: request.continue_token.clone(),
            ..Default::default()
        };
        let list = api.list(&lp).await.map_err(cluster_error)?;
        Ok(Page {
            items: list.items.iter().map(instance_from).collect(),
            continue_token: list.metadata.continue_.filter(|t| !t.is_empty()),
        })
    }

    async fn delete(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<(), ClusterError> {
        let api = self.api(gvr, namespace);
        let dp = DeleteParams { grace_period_seconds, ..Default::default() };
        api.delete(name, &dp).await.map(|_| ()).map_err(cluster_error)
    }
}
