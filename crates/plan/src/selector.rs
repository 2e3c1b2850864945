//! Kubernetes label selector expressions evaluated against string maps.
//!
//! Grammar: comma separated requirements, all of which must match.
//! `key=value`, `key==value`, `key!=value`, `key`, `!key`,
//! `key in (a,b)`, `key notin (a,b)`.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use kahoy_core::factory::{is_qualified_name, is_valid_label_value, MAX_LABEL_LEN};
use kahoy_core::Error;
use once_cell::sync::Lazy;
use regex::Regex;

static SET_EXPR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+)\s+(in|notin)\s*\((.*)\)$").expect("set expression regex"));

const MAX_PREFIX_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    In(BTreeSet<String>),
    NotIn(BTreeSet<String>),
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    key: String,
    op: Op,
}

impl Requirement {
    fn matches(&self, set: &BTreeMap<String, String>) -> bool {
        let v = set.get(&self.key);
        match &self.op {
            Op::In(vals) => v.map(|v| vals.contains(v)).unwrap_or(false),
            Op::NotIn(vals) => v.map(|v| !vals.contains(v)).unwrap_or(true),
            Op::Exists => v.is_some(),
            Op::DoesNotExist => v.is_none(),
        }
    }
}

/// Parsed selector; the empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn parse(expr: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for raw in split_top_level(expr)? {
            let part = raw.trim();
            if part.is_empty() {
                if expr.trim().is_empty() { continue; }
                return Err(Error::not_valid(format!("selector {:?}: empty requirement", expr)).into());
            }
            requirements.push(parse_requirement(part).map_err(|e| {
                Error::not_valid(format!("selector {:?}: {}", expr, e))
            })?);
        }
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool { self.requirements.is_empty() }

    pub fn matches(&self, set: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(set))
    }
}

fn split_top_level(expr: &str) -> Result<Vec<String>> {
    let mut parts = vec![String::new()];
    let mut depth = 0i32;
    for c in expr.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 || depth > 1 {
            return Err(Error::not_valid(format!("selector {:?}: unbalanced parentheses", expr)).into());
        }
        if c == ',' && depth == 0 {
            parts.push(String::new());
        } else if let Some(cur) = parts.last_mut() {
            cur.push(c);
        }
    }
    if depth != 0 {
        return Err(Error::not_valid(format!("selector {:?}: unbalanced parentheses", expr)).into());
    }
    Ok(parts)
}

fn parse_requirement(part: &str) -> std::result::Result<Requirement, String> {
    if let Some(caps) = SET_EXPR.captures(part) {
        let key = validate_key(&caps[1])?;
        if caps[3].trim().is_empty() {
            return Err(format!("empty value set for {:?}", key));
        }
        let mut vals = BTreeSet::new();
        for v in caps[3].split(',') {
            vals.insert(validate_value(v.trim())?);
        }
        let op = if &caps[2] == "in" { Op::In(vals) } else { Op::NotIn(vals) };
        return Ok(Requirement { key, op });
    }
    if let Some(key) = part.strip_prefix('!') {
        return Ok(Requirement { key: validate_key(key.trim())?, op: Op::DoesNotExist });
    }
    let (key, op, value) = if let Some((k, v)) = part.split_once("!=") {
        (k, "!=", v)
    } else if let Some((k, v)) = part.split_once("==") {
        (k, "==", v)
    } else if let Some((k, v)) = part.split_once('=') {
        (k, "=", v)
    } else {
        return Ok(Requirement { key: validate_key(part)?, op: Op::Exists });
    };
    let key = validate_key(key.trim())?;
    let value = validate_value(value.trim())?;
    let vals = BTreeSet::from([value]);
    let op = if op == "!=" { Op::NotIn(vals) } else { Op::In(vals) };
    Ok(Requirement { key, op })
}

fn validate_key(key: &str) -> std::result::Result<String, String> {
    let (prefix, name) = match key.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };
    if let Some(p) = prefix {
        if p.len() > MAX_PREFIX_LEN || !p.split('.').all(is_dns_label) {
            return Err(format!("invalid key prefix {:?}", p));
        }
    }
    if name.len() > MAX_LABEL_LEN || !is_qualified_name(name) {
        return Err(format!("invalid key {:?}", key));
    }
    Ok(key.to_string())
}

fn validate_value(v: &str) -> std::result::Result<String, String> {
    if !is_valid_label_value(v) {
        return Err(format!("invalid value {:?}", v));
    }
    Ok(v.to_string())
}

/// `[a-z0-9]([-a-z0-9]*[a-z0-9])?`
fn is_dns_label(s: &str) -> bool {
    let edge = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    s.starts_with(edge) && s.ends_with(edge) && s.chars().all(|c| edge(c) || c == '-')
}
