#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reaper_core::{
    ApiGroupResources, ClusterClient, ClusterError, DiscoverySnapshot, FixedClock, Gvr, ListRequest, Notification,
    Notifier, Page, ResourceDescriptor, ResourceInstance,
};
use reaper_engine::{Reconciler, SweepConfig};

pub const TTL: &str = "reaper.dev/ttl";
pub const REFRESHED_AT: &str = "reaper.dev/refreshed-at";

pub fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() }

pub fn pods() -> Gvr { Gvr::new("", "v1", "pods") }

pub fn jobs() -> Gvr { Gvr::new("batch", "v1", "jobs") }

pub const ALL_VERBS: [&str; 7] = ["create", "delete", "get", "list", "patch", "update", "watch"];

pub fn object(name: &str, age: chrono::Duration, annotations: &[(&str, &str)]) -> ResourceInstance {
    ResourceInstance {
        namespace: Some("default".to_string()),
        name: name.to_string(),
        kind: String::new(),
        creation_timestamp: Some(now() - age),
        annotations: annotations.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    }
}

struct Stored {
    instance: ResourceInstance,
    deleted: bool,
}

/// In-memory API server. Continue tokens are offsets into a stable per-kind list,
/// so deletions during paging never shift later pages.
#[derive(Default)]
pub struct FakeCluster {
    groups: Mutex<Vec<ApiGroupResources>>,
    discovery_error: Mutex<Option<ClusterError>>,
    objects: Mutex<BTreeMap<Gvr, Vec<Stored>>>,
    list_failures: Mutex<HashMap<Gvr, usize>>,
    delete_failures: Mutex<HashMap<String, usize>>,
    list_delays: Mutex<HashMap<Gvr, Duration>>,
    vanished: Mutex<HashSet<String>>,
    pub list_calls: AtomicUsize,
    pub deletes: Mutex<Vec<(Gvr, Option<String>, String, Option<u32>)>>,
}

impl FakeCluster {
    pub fn new() -> Self { Self::default() }

    pub fn with_kind(self, group_version: &str, plural: &str, kind: &str, verbs: &[&str]) -> Self {
        let descriptor = ResourceDescriptor {
            plural: plural.to_string(),
            kind: kind.to_string(),
            namespaced: true,
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
        };
        {
            let mut groups = self.groups.lock().unwrap();
            match groups.iter_mut().find(|g| g.group_version == group_version) {
                Some(g) => g.resources.push(descriptor),
                None => groups.push(ApiGroupResources { group_version: group_version.to_string(), resources: vec![descriptor] }),
            }
        }
        self
    }

    pub fn with_pods(self) -> Self { self.with_kind("v1", "pods", "Pod", &ALL_VERBS) }

    pub fn with_object(self, gvr: &Gvr, instance: ResourceInstance) -> Self {
        self.objects.lock().unwrap().entry(gvr.clone()).or_default().push(Stored { instance, deleted: false });
        self
    }

    pub fn failing_discovery(self, error: ClusterError) -> Self {
        *self.discovery_error.lock().unwrap() = Some(error);
        self
    }

    /// The next `times` list calls for `gvr` fail.
    pub fn failing_lists(self, gvr: &Gvr, times: usize) -> Self {
        self.list_failures.lock().unwrap().insert(gvr.clone(), times);
        self
    }

    /// The next `times` delete calls for `name` fail.
    pub fn failing_deletes(self, name: &str, times: usize) -> Self {
        self.delete_failures.lock().unwrap().insert(name.to_string(), times);
        self
    }

    /// `name` is removed behind our back between listing and deletion.
    pub fn vanishing(self, name: &str) -> Self {
        self.vanished.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn slow_lists(self, gvr: &Gvr, delay: Duration) -> Self {
        self.list_delays.lock().unwrap().insert(gvr.clone(), delay);
        self
    }

    /// Names still present for `gvr`.
    pub fn remaining(&self, gvr: &Gvr) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .get(gvr)
            .map(|v| v.iter().filter(|s| !s.deleted).map(|s| s.instance.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn list_calls(&self) -> usize { self.list_calls.load(Ordering::SeqCst) }

    pub fn delete_calls(&self) -> Vec<(Gvr, Option<String>, String, Option<u32>)> { self.deletes.lock().unwrap().clone() }
}

#[async_trait::async_trait]
impl ClusterClient for FakeCluster {
    async fn discover(&self) -> Result<DiscoverySnapshot, ClusterError> {
        if let Some(e) = self.discovery_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(DiscoverySnapshot { groups: self.groups.lock().unwrap().clone() })
    }

    async fn list(&self, gvr: &Gvr, request: &ListRequest) -> Result<Page, ClusterError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.list_delays.lock().unwrap().get(gvr).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut failures = self.list_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(gvr) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ClusterError::Api { code: 500, message: "etcdserver: request timed out".into() });
                }
            }
        }
        let start: usize = match &request.continue_token {
            Some(t) => t.parse().map_err(|_| ClusterError::Api { code: 410, message: "bad continue token".into() })?,
            None => 0,
        };
        let objects = self.objects.lock().unwrap();
        let all = objects.get(gvr).map(Vec::as_slice).unwrap_or(&[]);
        let end = (start + request.limit as usize).min(all.len());
        let items = all[start.min(end)..end].iter().filter(|s| !s.deleted).map(|s| s.instance.clone()).collect();
        let continue_token = if end < all.len() { Some(end.to_string()) } else { None };
        Ok(Page { items, continue_token })
    }

    async fn delete(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<(), ClusterError> {
        self.deletes.lock().unwrap().push((gvr.clone(), namespace.map(str::to_string), name.to_string(), grace_period_seconds));
        {
            let mut failures = self.delete_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(name) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ClusterError::Api { code: 409, message: "object is being finalized".into() });
                }
            }
        }
        let gone = self.vanished.lock().unwrap().contains(name);
        let mut objects = self.objects.lock().unwrap();
        let found = objects.get_mut(gvr).and_then(|v| {
            v.iter_mut().find(|s| !s.deleted && s.instance.name == name && s.instance.namespace.as_deref() == namespace)
        });
        match found {
            Some(stored) => {
                stored.deleted = true;
                if gone {
                    return Err(ClusterError::NotFound(format!("{} \"{}\" not found", gvr.resource, name)));
                }
                Ok(())
            }
            None => Err(ClusterError::NotFound(format!("{} \"{}\" not found", gvr.resource, name))),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<Notification>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self { Self { events: Mutex::new(Vec::new()), fail: true } }

    pub fn events(&self) -> Vec<Notification> { self.events.lock().unwrap().clone() }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), ClusterError> {
        self.events.lock().unwrap().push(notification);
        if self.fail {
            return Err(ClusterError::Transport("connection reset".into()));
        }
        Ok(())
    }
}

pub fn fast_config() -> SweepConfig {
    SweepConfig {
        throttle: Duration::from_millis(1),
        retry_backoff: Duration::from_millis(1),
        retry_backoff_max: Duration::from_millis(4),
        execution_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

pub fn reconciler(cluster: &Arc<FakeCluster>, notifier: &Arc<RecordingNotifier>, config: SweepConfig) -> Reconciler {
    Reconciler::new(cluster.clone(), notifier.clone(), config).with_clock(Arc::new(FixedClock(now())))
}
