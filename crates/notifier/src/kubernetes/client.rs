use async_trait::async_trait;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, LogParams},
    Client, ResourceExt,
};
use tracing::debug;

use super::{ClusterApi, CronJobVersion};
use crate::Result;

/// [`ClusterApi`] backed by a live `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default().labels(label_selector);
        let pods = self.pods(namespace).list(&params).await?;
        debug!(namespace, label_selector, count = pods.items.len(), "Listed pods");
        Ok(pods.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        Ok(self.pods(namespace).get(name).await?)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, container: Option<String>) -> Result<String> {
        let params = LogParams {
            container,
            ..Default::default()
        };
        Ok(self.pods(namespace).logs(pod, &params).await?)
    }

    async fn get_cron_job(&self, namespace: &str, name: &str, version: CronJobVersion) -> Result<String> {
        match version {
            CronJobVersion::V1 => {
                let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
                Ok(api.get(name).await?.name_any())
            }
            CronJobVersion::V1Beta1 => {
                // k8s-openapi no longer ships batch/v1beta1 types, so go through the dynamic API.
                let gvk = GroupVersionKind::gvk("batch", "v1beta1", "CronJob");
                let resource = ApiResource::from_gvk_with_plural(&gvk, "cronjobs");
                let api: Api<DynamicObject> =
                    Api::namespaced_with(self.client.clone(), namespace, &resource);
                Ok(api.get(name).await?.name_any())
            }
        }
    }
}
