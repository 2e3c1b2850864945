//! Cluster-backed state: one Secret per applied resource, labelled with the
//! storage id so a later run can load the previous state back as OLD.
//!
//! Payload keys are `id`, `group`, `path` and `raw` (gzip of the manifest YAML).

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kahoy_core::config::AppConfig;
use kahoy_core::{codec, factory, Error, MemoryRepository, RepositoryLoader, Resource, State};
use kahoy_kubehub::SecretClient;
use metrics::counter;
use tracing::{debug, info};

use crate::StateRepository;

pub const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_APP_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_APP_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_STORAGE_ID: &str = "kahoy.slok.dev/storage-id";

pub const ANNOTATION_RESOURCE_ID: &str = "kahoy.slok.dev/resource-id";
pub const ANNOTATION_RESOURCE_GROUP: &str = "kahoy.slok.dev/resource-group";
pub const ANNOTATION_RESOURCE_NAME: &str = "kahoy.slok.dev/resource-name";
pub const ANNOTATION_RESOURCE_NS: &str = "kahoy.slok.dev/resource-ns";

const KEY_ID: &str = "id";
const KEY_GROUP: &str = "group";
const KEY_PATH: &str = "path";
const KEY_RAW: &str = "raw";

/// Stable, DNS-safe Secret name for a resource within a storage id.
pub fn secret_name(storage_id: &str, resource_id: &str) -> String {
    format!("{:x}", md5::compute(format!("kahoy.slok.dev-{}-{}", storage_id, resource_id)))
}

pub struct ClusterStateRepository {
    client: Arc<dyn SecretClient>,
    namespace: String,
    storage_id: String,
    app_config: AppConfig,
}

impl ClusterStateRepository {
    pub fn new(client: Arc<dyn SecretClient>, namespace: &str, storage_id: &str, app_config: AppConfig) -> Result<Self> {
        if storage_id.is_empty() || !factory::is_valid_label_value(storage_id) {
            return Err(Error::not_valid(format!("storage id {:?} is not a valid label value", storage_id)).into());
        }
        if namespace.is_empty() {
            return Err(Error::not_valid("storage namespace is required").into());
        }
        Ok(Self {
            client,
            namespace: namespace.to_string(),
            storage_id: storage_id.to_string(),
            app_config,
        })
    }

    fn selector(&self) -> String {
        format!(
            "{}=kahoy,{}=internal,{}=storage,{}={}",
            LABEL_APP_NAME, LABEL_APP_COMPONENT, LABEL_APP_PART_OF, LABEL_STORAGE_ID, self.storage_id
        )
    }

    fn labels(&self) -> BTreeMap<String, String> {
        [
            (LABEL_APP_NAME, "kahoy"),
            (LABEL_APP_COMPONENT, "internal"),
            (LABEL_APP_PART_OF, "storage"),
            (LABEL_APP_MANAGED_BY, "kahoy"),
            (LABEL_STORAGE_ID, self.storage_id.as_str()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn to_secret(&self, r: &Resource) -> Result<Secret> {
        let obj = r.k8s_object.as_ref();
        let annotations: BTreeMap<String, String> = [
            (ANNOTATION_RESOURCE_ID, r.id.as_str()),
            (ANNOTATION_RESOURCE_GROUP, r.group_id.as_str()),
            (ANNOTATION_RESOURCE_NAME, obj.name()),
            (ANNOTATION_RESOURCE_NS, obj.namespace()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let yaml = codec::encode([obj])?;
        let data: BTreeMap<String, ByteString> = [
            (KEY_ID, r.id.as_bytes().to_vec()),
            (KEY_GROUP, r.group_id.as_bytes().to_vec()),
            (KEY_PATH, r.manifest_path.as_bytes().to_vec()),
            (KEY_RAW, gzip(&yaml).with_context(|| format!("compressing {}", r.id))?),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v)))
        .collect();

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(secret_name(&self.storage_id, &r.id)),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels()),
                annotations: Some(annotations),
                ..Default::default()
            },
            data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        })
    }

    fn from_secret(&self, secret: &Secret) -> Result<Resource> {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let data = secret.data.as_ref().ok_or_else(|| Error::protocol(format!("secret {} has no data", name)))?;
        let id = field_str(data, name, KEY_ID)?;
        let group = field_str(data, name, KEY_GROUP)?;
        let yaml = gunzip(field(data, name, KEY_RAW)?).map_err(|e| Error::protocol(format!("secret {} raw payload: {}", name, e)))?;
        let mut objs = codec::decode(&yaml).with_context(|| format!("decoding secret {}", name))?;
        if objs.len() != 1 {
            return Err(Error::protocol(format!("secret {} holds {} objects, expected 1", name, objs.len())).into());
        }
        let obj = objs.remove(0);
        let path = format!("kubernetes://{}/{}", self.namespace, name);
        let res = factory::new_resource(obj, &group, &path)?;
        if res.id != id {
            return Err(Error::protocol(format!("secret {} id {} does not match its manifest {}", name, id, res.id)).into());
        }
        Ok(res)
    }
}

fn field<'a>(data: &'a BTreeMap<String, ByteString>, secret: &str, key: &str) -> Result<&'a [u8]> {
    match data.get(key) {
        Some(b) => Ok(b.0.as_slice()),
        None => Err(Error::protocol(format!("secret {} is missing key {}", secret, key)).into()),
    }
}

fn field_str(data: &BTreeMap<String, ByteString>, secret: &str, key: &str) -> Result<String> {
    String::from_utf8(field(data, secret, key)?.to_vec())
        .map_err(|_| Error::protocol(format!("secret {} key {} is not utf-8", secret, key)).into())
}

fn gzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(raw)?;
    enc.finish()
}

fn gunzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(raw).read_to_end(&mut out)?;
    Ok(out)
}

#[async_trait]
impl StateRepository for ClusterStateRepository {
    async fn store_state(&self, state: &State) -> Result<()> {
        for r in &state.applied_resources {
            let secret = self.to_secret(r)?;
            self.client.apply(&self.namespace, &secret).await.with_context(|| format!("storing state of {}", r.id))?;
        }
        for r in &state.deleted_resources {
            let name = secret_name(&self.storage_id, &r.id);
            self.client.delete(&self.namespace, &name).await.with_context(|| format!("removing state of {}", r.id))?;
        }
        counter!("kahoy_state_secrets_written_total", state.applied_resources.len() as u64);
        counter!("kahoy_state_secrets_deleted_total", state.deleted_resources.len() as u64);
        info!(
            id = %state.id,
            storage_id = %self.storage_id,
            applied = state.applied_resources.len(),
            deleted = state.deleted_resources.len(),
            "state stored in cluster"
        );
        Ok(())
    }
}

#[async_trait]
impl RepositoryLoader for ClusterStateRepository {
    async fn load(&self) -> Result<MemoryRepository> {
        let secrets = self.client.list(&self.namespace, &self.selector()).await.context("listing state secrets")?;
        let mut repo = MemoryRepository::new();
        for s in &secrets {
            let res = self.from_secret(s)?;
            if !repo.has_group(&res.group_id) {
                repo.add_group(factory::new_group(&res.group_id, "", &self.app_config))?;
            }
            repo.add_resource(res)?;
        }
        debug!(storage_id = %self.storage_id, resources = repo.len(), "state loaded from cluster");
        Ok(repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kahoy_core::{error_kind, ErrorKind, K8sObject, GroupRepository, ResourceRepository};
    use kahoy_kubehub::MemorySecretClient;

    fn res(kind: &str, ns: &str, name: &str, group: &str) -> Resource {
        let obj = K8sObject::from_value(serde_json::json!({
            "apiVersion": "v1", "kind": kind,
            "metadata": {"name": name, "namespace": ns},
            "data": {"k": "v"}
        }))
        .unwrap();
        factory::new_resource(obj, group, &format!("/m/{}/{}.yaml", group, name)).unwrap()
    }

    fn repo(client: Arc<MemorySecretClient>, storage_id: &str) -> ClusterStateRepository {
        ClusterStateRepository::new(client, "kahoy", storage_id, AppConfig::default_v1()).unwrap()
    }

    fn state(applied: Vec<Resource>, deleted: Vec<Resource>) -> State {
        State { id: "s".into(), started_at: chrono::Utc::now(), ended_at: chrono::Utc::now(), applied_resources: applied, deleted_resources: deleted }
    }

    #[test]
    fn secret_names_are_stable_hex() {
        let a = secret_name("prod", "core/v1/Pod/ns/a");
        assert_eq!(a, secret_name("prod", "core/v1/Pod/ns/a"));
        assert_ne!(a, secret_name("dev", "core/v1/Pod/ns/a"));
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(secret_name("", ""), format!("{:x}", md5::compute("kahoy.slok.dev--")));
    }

    #[test]
    fn rejects_bad_storage_ids() {
        let c: Arc<dyn SecretClient> = Arc::new(MemorySecretClient::new());
        for id in ["", "-lead", "has space", &"x".repeat(64)] {
            let err = ClusterStateRepository::new(c.clone(), "kahoy", id, AppConfig::default_v1()).err().unwrap();
            assert_eq!(error_kind(&err), Some(ErrorKind::NotValid), "{:?}", id);
        }
    }

    #[tokio::test]
    async fn store_then_load_round_trips_resources() {
        let client = Arc::new(MemorySecretClient::new());
        let r = repo(client.clone(), "prod");
        let applied = vec![res("ConfigMap", "ns1", "a", "apps"), res("ConfigMap", "ns2", "b", "db")];
        r.store_state(&state(applied.clone(), vec![])).await.unwrap();
        assert_eq!(client.len(), 2);

        let s = client.get("kahoy", &secret_name("prod", &applied[0].id)).unwrap();
        let labels = s.metadata.labels.unwrap();
        assert_eq!(labels[LABEL_STORAGE_ID], "prod");
        assert_eq!(labels[LABEL_APP_MANAGED_BY], "kahoy");
        let ann = s.metadata.annotations.unwrap();
        assert_eq!(ann[ANNOTATION_RESOURCE_ID], applied[0].id);
        assert_eq!(ann[ANNOTATION_RESOURCE_NS], "ns1");

        let loaded = r.load().await.unwrap();
        let mut got = loaded.list_resources();
        got.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].id, applied[0].id);
        assert_eq!(got[0].group_id, "apps");
        assert!(got[0].k8s_object.semantic_eq(&applied[0].k8s_object));
        assert!(got[0].manifest_path.starts_with("kubernetes://kahoy/"));
        assert!(loaded.get_group("db").is_ok());
    }

    #[tokio::test]
    async fn deleted_resources_drop_their_secrets_and_storage_ids_are_isolated() {
        let client = Arc::new(MemorySecretClient::new());
        let prod = repo(client.clone(), "prod");
        let dev = repo(client.clone(), "dev");
        let a = res("ConfigMap", "ns", "a", "g");
        prod.store_state(&state(vec![a.clone()], vec![])).await.unwrap();
        dev.store_state(&state(vec![a.clone()], vec![])).await.unwrap();
        assert_eq!(client.len(), 2);

        prod.store_state(&state(vec![], vec![a.clone()])).await.unwrap();
        assert!(prod.load().await.unwrap().is_empty());
        assert_eq!(dev.load().await.unwrap().len(), 1);
        // Already gone.
        prod.store_state(&state(vec![], vec![a])).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_payload_is_protocol_error() {
        let client = Arc::new(MemorySecretClient::new());
        let r = repo(client.clone(), "prod");
        let mut s = r.to_secret(&res("ConfigMap", "ns", "a", "g")).unwrap();
        s.data.as_mut().unwrap().insert(KEY_RAW.to_string(), ByteString(b"not gzip".to_vec()));
        client.apply("kahoy", &s).await.unwrap();
        let err = r.load().await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Protocol));

        s.data.as_mut().unwrap().remove(KEY_ID);
        client.apply("kahoy", &s).await.unwrap();
        let err = r.load().await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Protocol));
    }
}
