//! YAML multi-document codec for Kubernetes objects.

use anyhow::{Context, Result};
use serde_json::Value as Json;
use serde_yaml::{Mapping, Value as Yaml};

use crate::{Error, K8sObject};

/// Decode a multi-document YAML stream. Documents are split on lines starting
/// with `---`; empty and comment-only documents are skipped and `kind: List`
/// documents expand into their items.
pub fn decode(raw: &[u8]) -> Result<Vec<K8sObject>> {
    let text = std::str::from_utf8(raw).map_err(|e| Error::protocol(format!("manifest is not utf-8: {}", e)))?;
    let mut out = Vec::new();
    for (idx, doc) in split_documents(text).into_iter().enumerate() {
        let doc = doc.trim();
        if doc.is_empty() { continue; }
        let yaml: Yaml = serde_yaml::from_str(doc)
            .map_err(|e| Error::protocol(format!("document {}: invalid yaml: {}", idx, e)))?;
        if yaml.is_null() { continue; }
        let json = serde_json::to_value(yaml)
            .map_err(|e| Error::protocol(format!("document {}: not representable as json: {}", idx, e)))?;
        let obj = K8sObject::from_value(json).with_context(|| format!("decoding document {}", idx))?;
        expand_into(obj, &mut out)?;
    }
    Ok(out)
}

/// Encode objects as a `---` separated stream with deterministic key order.
/// Empty objects carry nothing to apply and are skipped.
pub fn encode<'a, I>(objs: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a K8sObject>,
{
    let mut out = String::new();
    for obj in objs {
        if obj.as_map().is_empty() { continue; }
        let doc = serde_yaml::to_string(&sorted_yaml(&obj.to_value())).context("encoding object as yaml")?;
        out.push_str("---\n");
        out.push_str(&doc);
    }
    Ok(out.into_bytes())
}

fn split_documents(text: &str) -> Vec<String> {
    let mut docs = vec![String::new()];
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("---") {
            docs.push(format!("{}\n", rest));
        } else if let Some(cur) = docs.last_mut() {
            cur.push_str(line);
            cur.push('\n');
        }
    }
    docs
}

fn expand_into(obj: K8sObject, out: &mut Vec<K8sObject>) -> Result<()> {
    let is_list = obj.kind() == "List" && obj.get("items").map(Json::is_array).unwrap_or(false);
    if !is_list {
        out.push(obj);
        return Ok(());
    }
    if let Some(Json::Array(items)) = obj.get("items") {
        for (i, item) in items.iter().enumerate() {
            let item = K8sObject::from_value(item.clone()).with_context(|| format!("decoding List item {}", i))?;
            out.push(item);
        }
    }
    Ok(())
}

fn sorted_yaml(v: &Json) -> Yaml {
    match v {
        Json::Null => Yaml::Null,
        Json::Bool(b) => Yaml::Bool(*b),
        Json::Number(n) => {
            if let Some(u) = n.as_u64() { Yaml::Number(u.into()) }
            else if let Some(i) = n.as_i64() { Yaml::Number(i.into()) }
            else { Yaml::Number(n.as_f64().unwrap_or_default().into()) }
        }
        Json::String(s) => Yaml::String(s.clone()),
        Json::Array(items) => Yaml::Sequence(items.iter().map(sorted_yaml).collect()),
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut m = Mapping::with_capacity(keys.len());
            for k in keys {
                m.insert(Yaml::String(k.clone()), sorted_yaml(&map[k]));
            }
            Yaml::Mapping(m)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI: &str = r#"
# leading comment only
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm1
  namespace: ns1
data:
  k: v
---

---
# just a comment
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 2
"#;

    #[test]
    fn decode_skips_empty_and_comment_docs() {
        let objs = decode(MULTI.as_bytes()).unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[0].name(), "cm1");
        assert_eq!(objs[1].kind(), "Deployment");
    }

    #[test]
    fn decode_expands_lists() {
        let raw = r#"
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: Secret
    metadata: {name: s1}
  - apiVersion: v1
    kind: Secret
    metadata: {name: s2}
"#;
        let objs = decode(raw.as_bytes()).unwrap();
        let names: Vec<_> = objs.iter().map(|o| o.name().to_string()).collect();
        assert_eq!(names, vec!["s1", "s2"]);
    }

    #[test]
    fn decode_rejects_scalar_documents() {
        let err = decode(b"---\njust a string\n").unwrap_err();
        assert_eq!(crate::error_kind(&err), Some(crate::ErrorKind::Protocol));
    }

    #[test]
    fn encode_sorts_keys_and_round_trips() {
        let objs = decode(MULTI.as_bytes()).unwrap();
        let out = String::from_utf8(encode(&objs).unwrap()).unwrap();
        assert!(out.starts_with("---\napiVersion: v1\ndata:\n"), "out={}", out);
        assert_eq!(out.matches("---\n").count(), 2);
        let again = decode(out.as_bytes()).unwrap();
        assert_eq!(again, objs);
    }

    #[test]
    fn encode_skips_empty_objects() {
        let empty = K8sObject::from_value(serde_json::json!({})).unwrap();
        assert!(encode([&empty]).unwrap().is_empty());
    }
}
