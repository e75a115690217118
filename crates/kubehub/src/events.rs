//! Notification sink writing core/v1 Events.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::{
    api::{Api, PostParams},
    Client,
};
use reaper_core::{ClusterError, Notification, Notifier};
use uuid::Uuid;

use crate::cluster_error;

// Events must live in a namespace; cluster-scoped objects report here.
const CLUSTER_SCOPED_EVENT_NAMESPACE: &str = "default";

pub struct KubeEvents {
    client: Client,
    component: String,
}

impl KubeEvents {
    pub fn new(client: Client, component: impl Into<String>) -> Self {
        Self { client, component: component.into() }
    }
}

/// Render a notification as a core/v1 Event.
pub fn build_event(notification: &Notification, component: &str, now: DateTime<Utc>) -> Event {
    let namespace = notification
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| CLUSTER_SCOPED_EVENT_NAMESPACE.to_string());
    Event {
        metadata: ObjectMeta {
            name: Some(format!("{}.{}", notification.name, Uuid::new_v4().simple())),
            namespace: Some(namespace),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some(notification.api_version.clone()),
            kind: Some(notification.kind.clone()),
            name: Some(notification.name.clone()),
            namespace: notification.namespace.clone(),
            ..Default::default()
        },
        reason: Some(notification.reason.clone()),
        message: Some(notification.message.clone()),
        type_: Some(if notification.warning { "Warning" } else { "Normal" }.to_string()),
        source: Some(EventSource { component: Some(component.to_string()), host: None }),
        reporting_component: Some(component.to_string()),
        first_timestamp: Some(Time(now)),
        last_timestamp: Some(Time(now)),
        count: Some(1),
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl Notifier for KubeEvents {
    async fn notify(&self, notification: Notification) -> Result<(), ClusterError> {
        let event = build_event(&notification, &self.component, Utc::now());
        let namespace = event.metadata.namespace.clone().unwrap_or_default();
        let api: Api<Event> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), &event).await.map(|_| ()).map_err(cluster_error)
    }
}
