//! Run report: the finished State as a single JSON line.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use kahoy_core::{Error, Resource, State};
use metrics::counter;
use serde::Serialize;
use tracing::debug;

use crate::StateRepository;

pub const REPORT_VERSION: &str = "v1";

#[derive(Debug, Serialize)]
struct Report<'a> {
    version: &'static str,
    id: &'a str,
    started_at: String,
    ended_at: String,
    applied_resources: Vec<ReportResource<'a>>,
    deleted_resources: Vec<ReportResource<'a>>,
}

#[derive(Debug, Serialize)]
struct ReportResource<'a> {
    id: &'a str,
    group: &'a str,
    gvk: String,
    api_version: &'a str,
    kind: &'a str,
    namespace: &'a str,
    name: &'a str,
}

impl<'a> ReportResource<'a> {
    fn from_resource(r: &'a Resource) -> Self {
        let obj = r.k8s_object.as_ref();
        let (group, version) = obj.group_version();
        Self {
            id: &r.id,
            group: &r.group_id,
            gvk: format!("{}/{}, Kind={}", group, version, obj.kind()),
            api_version: obj.api_version(),
            kind: obj.kind(),
            namespace: obj.namespace(),
            name: obj.name(),
        }
    }
}

pub fn render(state: &State) -> Result<Vec<u8>> {
    let report = Report {
        version: REPORT_VERSION,
        id: &state.id,
        started_at: state.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ended_at: state.ended_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        applied_resources: state.applied_resources.iter().map(ReportResource::from_resource).collect(),
        deleted_resources: state.deleted_resources.iter().map(ReportResource::from_resource).collect(),
    };
    let mut out = serde_json::to_vec(&report).context("encoding report")?;
    out.push(b'\n');
    Ok(out)
}

/// Writes reports to stdout or a file.
pub struct StreamStateRepository {
    out: Mutex<Box<dyn Write + Send>>,
}

impl StreamStateRepository {
    pub fn new(out: Box<dyn Write + Send>) -> Self { Self { out: Mutex::new(out) } }

    pub fn stdout() -> Self { Self::new(Box::new(std::io::stdout())) }

    pub fn file(path: &Path) -> Result<Self> {
        let f = File::create(path).map_err(|e| Error::fs(format!("creating report {}", path.display()), e))?;
        Ok(Self::new(Box::new(f)))
    }

    /// `-` is stdout.
    pub fn from_target(target: &str) -> Result<Self> {
        if target == "-" { Ok(Self::stdout()) } else { Self::file(Path::new(target)) }
    }
}

#[async_trait]
impl StateRepository for StreamStateRepository {
    async fn store_state(&self, state: &State) -> Result<()> {
        let data = render(state)?;
        let mut out = self.out.lock().map_err(|_| anyhow::anyhow!("report writer poisoned"))?;
        out.write_all(&data).map_err(|e| Error::fs("writing report", e))?;
        out.flush().map_err(|e| Error::fs("flushing report", e))?;
        counter!("kahoy_reports_written_total", 1u64);
        debug!(id = %state.id, bytes = data.len(), "report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kahoy_core::{factory, K8sObject};
    use std::sync::Arc;

    fn res(api: &str, kind: &str, ns: &str, name: &str, group: &str) -> Resource {
        let obj = K8sObject::from_value(serde_json::json!({
            "apiVersion": api, "kind": kind, "metadata": {"name": name, "namespace": ns}
        }))
        .unwrap();
        factory::new_resource(obj, group, "/m/x.yaml").unwrap()
    }

    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, b: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(b);
            Ok(b.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    #[tokio::test]
    async fn writes_exact_document() {
        let state = State {
            id: "id1".into(),
            started_at: Utc.with_ymd_and_hms(1912, 6, 23, 1, 2, 3).unwrap(),
            ended_at: Utc.with_ymd_and_hms(1912, 6, 23, 1, 2, 42).unwrap(),
            applied_resources: vec![
                res("v1", "Pod", "ns1", "applied1", "group1"),
                res("networking.k8s.io/v1beta1", "Ingress", "ns2", "applied2", "group2"),
            ],
            deleted_resources: vec![],
        };
        let buf = Arc::new(Mutex::new(Vec::new()));
        let repo = StreamStateRepository::new(Box::new(Shared(Arc::clone(&buf))));
        repo.store_state(&state).await.unwrap();

        let want = concat!(
            r#"{"version":"v1","id":"id1","started_at":"1912-06-23T01:02:03Z","ended_at":"1912-06-23T01:02:42Z","#,
            r#""applied_resources":["#,
            r#"{"id":"core/v1/Pod/ns1/applied1","group":"group1","gvk":"/v1, Kind=Pod","api_version":"v1","kind":"Pod","namespace":"ns1","name":"applied1"},"#,
            r#"{"id":"networking.k8s.io/v1beta1/Ingress/ns2/applied2","group":"group2","gvk":"networking.k8s.io/v1beta1, Kind=Ingress","api_version":"networking.k8s.io/v1beta1","kind":"Ingress","namespace":"ns2","name":"applied2"}"#,
            r#"],"deleted_resources":[]}"#,
            "\n"
        );
        assert_eq!(String::from_utf8(buf.lock().unwrap().clone()).unwrap(), want);
    }

    #[tokio::test]
    async fn writes_to_file_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let repo = StreamStateRepository::from_target(path.to_str().unwrap()).unwrap();
        let state = State {
            id: "x".into(),
            started_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            ended_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 1).unwrap(),
            applied_resources: vec![],
            deleted_resources: vec![res("v1", "Pod", "", "gone", "root")],
        };
        repo.store_state(&state).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with("}\n"));
        let v: serde_json::Value = serde_json::from_str(raw.trim_end()).unwrap();
        assert_eq!(v["applied_resources"], serde_json::json!([]));
        assert_eq!(v["deleted_resources"][0]["namespace"], "");
        assert_eq!(v["deleted_resources"][0]["id"], "core/v1/Pod/default/gone");
    }

    #[test]
    fn missing_report_dir_is_filesystem_error() {
        let err = StreamStateRepository::from_target("/nonexistent-kahoy-dir/r.json").err().unwrap();
        assert_eq!(kahoy_core::error_kind(&err), Some(kahoy_core::ErrorKind::Filesystem));
    }
}
