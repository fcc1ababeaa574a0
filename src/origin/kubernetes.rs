//! # Kubernetes Runtime Configuration
//!
//! [`RuntimeConfig`] backed by the Kubernetes API:
//! - users database in a ConfigMap data key
//! - plaintext credentials in a Secret, one data entry per identity
//! - restart via a timestamp annotation on the workload's pod template,
//!   the same mechanism as `kubectl rollout restart`

use super::{document, RuntimeConfig, SecretBatch};
use crate::config::{SyncConfig, WorkloadKind};
use crate::constants::FIELD_MANAGER;
use crate::error::SyncResult;
use crate::model::ConfigRecord;
use anyhow::Context;
use chrono::Utc;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{ByteString, NamespaceResourceScope};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct KubernetesOrigin {
    client: Client,
    namespace: String,
    configmap_name: String,
    configmap_key: String,
    secret_name: String,
    workload_kind: WorkloadKind,
    workload_name: String,
    restart_annotation: String,
}

impl std::fmt::Debug for KubernetesOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesOrigin")
            .field("namespace", &self.namespace)
            .field("configmap", &self.configmap_name)
            .field("secret", &self.secret_name)
            .field("workload", &format!("{}/{}", self.workload_kind.as_str(), self.workload_name))
            .finish_non_exhaustive()
    }
}

impl KubernetesOrigin {
    pub fn new(client: Client, config: &SyncConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            configmap_name: config.configmap_name.clone(),
            configmap_key: config.configmap_key.clone(),
            secret_name: config.secret_name.clone(),
            workload_kind: config.workload_kind,
            workload_name: config.workload_name.clone(),
            restart_annotation: config.restart_annotation.clone(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn patch_workload<K>(&self, patch: &serde_json::Value) -> anyhow::Result<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        self.api::<K>()
            .patch(
                &self.workload_name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(patch),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to patch {} {}/{}",
                    self.workload_kind.as_str(),
                    self.namespace,
                    self.workload_name
                )
            })?;
        Ok(())
    }
}

#[async_trait]
impl RuntimeConfig for KubernetesOrigin {
    async fn load_users_origin(&self) -> SyncResult<BTreeMap<String, ConfigRecord>> {
        let configmaps: Api<ConfigMap> = self.api();
        let configmap = configmaps
            .get_opt(&self.configmap_name)
            .await
            .with_context(|| {
                format!("Failed to get ConfigMap {}/{}", self.namespace, self.configmap_name)
            })?;

        let Some(text) = users_database_text(configmap.as_ref(), &self.configmap_key) else {
            info!(
                "No users database at ConfigMap {}/{} key '{}', treating Authelia as unconfigured",
                self.namespace, self.configmap_name, self.configmap_key
            );
            return Ok(BTreeMap::new());
        };

        let records = document::parse_users_document(text)?;
        debug!("Loaded {} users from Authelia users database", records.len());
        Ok(records)
    }

    async fn update_origin(&self, document: Vec<u8>) -> SyncResult<()> {
        let text = String::from_utf8(document).context("Users database is not valid UTF-8")?;
        let configmaps: Api<ConfigMap> = self.api();

        let existing = configmaps
            .get_opt(&self.configmap_name)
            .await
            .with_context(|| {
                format!("Failed to get ConfigMap {}/{}", self.namespace, self.configmap_name)
            })?;

        match existing {
            Some(mut configmap) => {
                configmap
                    .data
                    .get_or_insert_with(BTreeMap::new)
                    .insert(self.configmap_key.clone(), text);
                // Dropping the resource version makes the replace unconditional.
                configmap.metadata.resource_version = None;
                configmaps
                    .replace(&self.configmap_name, &PostParams::default(), &configmap)
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to replace ConfigMap {}/{}",
                            self.namespace, self.configmap_name
                        )
                    })?;
            }
            None => {
                let configmap = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(self.configmap_name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::from([(self.configmap_key.clone(), text)])),
                    ..Default::default()
                };
                configmaps
                    .create(&PostParams::default(), &configmap)
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to create ConfigMap {}/{}",
                            self.namespace, self.configmap_name
                        )
                    })?;
            }
        }

        info!(
            "Published users database to ConfigMap {}/{}",
            self.namespace, self.configmap_name
        );
        Ok(())
    }

    async fn update_secrets(&self, changed: &SecretBatch) -> SyncResult<()> {
        if changed.is_empty() {
            debug!("No credentials changed, skipping Secret update");
            return Ok(());
        }

        let data = secret_data(changed);
        let secrets: Api<Secret> = self.api();

        let patch = secret_merge_patch(&data);
        match secrets
            .patch(
                &self.secret_name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(self.secret_name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    data: Some(data),
                    ..Default::default()
                };
                secrets
                    .create(&PostParams::default(), &secret)
                    .await
                    .with_context(|| {
                        format!("Failed to create Secret {}/{}", self.namespace, self.secret_name)
                    })?;
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!(
                        "Failed to patch Secret {}/{}",
                        self.namespace, self.secret_name
                    ))
                    .into());
            }
        }

        info!(
            "Merged {} credentials into Secret {}/{}",
            changed.len(),
            self.namespace,
            self.secret_name
        );
        Ok(())
    }

    async fn restart_origin(&self) -> SyncResult<()> {
        let restarted_at = Utc::now().to_rfc3339();
        let patch = restart_patch(&self.restart_annotation, &restarted_at);

        match self.workload_kind {
            WorkloadKind::Deployment => self.patch_workload::<Deployment>(&patch).await?,
            WorkloadKind::StatefulSet => self.patch_workload::<StatefulSet>(&patch).await?,
            WorkloadKind::DaemonSet => self.patch_workload::<DaemonSet>(&patch).await?,
        }

        info!(
            "Requested restart of {} {}/{} ({}={})",
            self.workload_kind.as_str(),
            self.namespace,
            self.workload_name,
            self.restart_annotation,
            restarted_at
        );
        Ok(())
    }
}

/// Users database text, if both the ConfigMap and its key exist
fn users_database_text<'a>(configmap: Option<&'a ConfigMap>, key: &str) -> Option<&'a str> {
    configmap?.data.as_ref()?.get(key).map(String::as_str)
}

fn secret_data(changed: &SecretBatch) -> BTreeMap<String, ByteString> {
    changed
        .iter()
        .map(|(identity, plaintext)| (identity.clone(), ByteString(plaintext.to_vec())))
        .collect()
}

/// JSON merge patch touching only the listed Secret keys
fn secret_merge_patch(data: &BTreeMap<String, ByteString>) -> serde_json::Value {
    serde_json::json!({ "data": data })
}

/// Pod-template annotation patch that makes the workload controller roll its pods
fn restart_patch(annotation: &str, restarted_at: &str) -> serde_json::Value {
    let mut annotations = serde_json::Map::new();
    annotations.insert(
        annotation.to_string(),
        serde_json::Value::String(restarted_at.to_string()),
    );
    serde_json::json!({
        "spec": { "template": { "metadata": { "annotations": annotations } } }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    fn batch(entries: &[(&str, &str)]) -> SecretBatch {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), Zeroizing::new(v.as_bytes().to_vec())))
            .collect()
    }

    #[test]
    fn test_secret_patch_lists_only_changed_keys_base64_encoded() {
        let patch = secret_merge_patch(&secret_data(&batch(&[("alice", "secret")])));

        let data = patch["data"].as_object().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data["alice"], "c2VjcmV0");
        assert_eq!(patch.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_restart_patch_targets_pod_template_annotation() {
        let now = Utc::now().to_rfc3339();
        let patch = restart_patch("authelia-sync/restartedAt", &now);

        let value = &patch["spec"]["template"]["metadata"]["annotations"]
            ["authelia-sync/restartedAt"];
        assert_eq!(value, &serde_json::Value::String(now));
        assert!(chrono::DateTime::parse_from_rfc3339(value.as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_missing_configmap_or_key_yields_no_text() {
        assert_eq!(users_database_text(None, "users_database.yml"), None);

        let empty = ConfigMap::default();
        assert_eq!(users_database_text(Some(&empty), "users_database.yml"), None);

        let other_key = ConfigMap {
            data: Some(BTreeMap::from([("other".to_string(), "x".to_string())])),
            ..Default::default()
        };
        assert_eq!(users_database_text(Some(&other_key), "users_database.yml"), None);

        let present = ConfigMap {
            data: Some(BTreeMap::from([(
                "users_database.yml".to_string(),
                "users: {}\n".to_string(),
            )])),
            ..Default::default()
        };
        assert_eq!(
            users_database_text(Some(&present), "users_database.yml"),
            Some("users: {}\n")
        );
    }
}
