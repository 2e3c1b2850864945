//! Kahoy kubehub: kube client construction and Secret access.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use metrics::counter;
use tracing::{debug, info};

pub const FIELD_MANAGER: &str = "kahoy";

/// Where the kube client reads its credentials from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Kubeconfig path; unset uses the default resolution (`KUBECONFIG`, `~/.kube/config`, in-cluster).
    pub kube_config: Option<String>,
    pub kube_context: Option<String>,
}

pub async fn get_kube_client(opts: &ClientOptions) -> Result<Client> {
    let kco = KubeConfigOptions { context: opts.kube_context.clone().filter(|c| !c.is_empty()), ..Default::default() };
    let config = match opts.kube_config.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path))?;
            Config::from_custom_kubeconfig(kc, &kco).await.context("building kube config")?
        }
        None if kco.context.is_some() => Config::from_kubeconfig(&kco).await.context("building kube config")?,
        None => Config::infer().await.context("inferring kube config")?,
    };
    info!(cluster = %config.cluster_url, context = ?opts.kube_context, "kube client ready");
    Client::try_from(config).context("creating kube client")
}

#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Create or replace (server-side apply) `secret` in `ns`.
    async fn apply(&self, ns: &str, secret: &Secret) -> Result<()>;
    /// Delete by name; an absent secret is not an error.
    async fn delete(&self, ns: &str, name: &str) -> Result<()>;
    async fn list(&self, ns: &str, label_selector: &str) -> Result<Vec<Secret>>;
}

pub struct KubeSecretClient {
    client: Client,
}

impl KubeSecretClient {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, ns: &str) -> Api<Secret> { Api::namespaced(self.client.clone(), ns) }
}

#[async_trait]
impl SecretClient for KubeSecretClient {
    async fn apply(&self, ns: &str, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().context("secret without name")?;
        let pp = PatchParams::apply(FIELD_MANAGER).force();
        self.api(ns).patch(&name, &pp, &Patch::Apply(secret)).await.with_context(|| format!("applying secret {}/{}", ns, name))?;
        counter!("kahoy_kube_secret_writes_total", 1u64);
        debug!(ns, name = %name, "secret applied");
        Ok(())
    }

    async fn delete(&self, ns: &str, name: &str) -> Result<()> {
        match self.api(ns).delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                counter!("kahoy_kube_secret_deletes_total", 1u64);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(ns, name, "secret already absent");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("deleting secret {}/{}", ns, name))),
        }
    }

    async fn list(&self, ns: &str, label_selector: &str) -> Result<Vec<Secret>> {
        let lp = ListParams::default().labels(label_selector);
        let list = self.api(ns).list(&lp).await.with_context(|| format!("listing secrets in {}", ns))?;
        Ok(list.items)
    }
}

/// In-process secret store keyed by namespace and name, for tests and local runs.
#[derive(Debug, Default)]
pub struct MemorySecretClient {
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
}

impl MemorySecretClient {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, ns: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().ok()?.get(&(ns.to_string(), name.to_string())).cloned()
    }

    pub fn len(&self) -> usize { self.secrets.lock().map(|s| s.len()).unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector.split(',').map(str::trim).filter(|s| !s.is_empty()).all(|req| match req.split_once('=') {
        Some((k, v)) => labels.and_then(|l| l.get(k.trim())).map(|lv| lv == v.trim()).unwrap_or(false),
        None => labels.map(|l| l.contains_key(req)).unwrap_or(false),
    })
}

#[async_trait]
impl SecretClient for MemorySecretClient {
    async fn apply(&self, ns: &str, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().context("secret without name")?;
        let mut s = secret.clone();
        s.metadata.namespace = Some(ns.to_string());
        self.secrets.lock().map_err(|_| anyhow::anyhow!("secret store poisoned"))?.insert((ns.to_string(), name), s);
        Ok(())
    }

    async fn delete(&self, ns: &str, name: &str) -> Result<()> {
        self.secrets.lock().map_err(|_| anyhow::anyhow!("secret store poisoned"))?.remove(&(ns.to_string(), name.to_string()));
        Ok(())
    }

    async fn list(&self, ns: &str, label_selector: &str) -> Result<Vec<Secret>> {
        let store = self.secrets.lock().map_err(|_| anyhow::anyhow!("secret store poisoned"))?;
        Ok(store
            .iter()
            .filter(|((sns, _), s)| sns == ns && selector_matches(label_selector, s.metadata.labels.as_ref()))
            .map(|(_, s)| s.clone())
            .collect())
    }
}
