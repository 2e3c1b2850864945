//! Resource processors: filters applied to a loaded resource list before planning.

use anyhow::Result;
use kahoy_core::{factory, Error, Resource};
use kahoy_loader::PathFilter;
use metrics::counter;
use regex::Regex;
use tracing::debug;

use crate::selector::Selector;

pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;
    fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>>;
}

/// Failed chain run: the output of the last processor that succeeded plus the error.
#[derive(Debug)]
pub struct ChainFailure {
    pub partial: Vec<Resource>,
    pub error: anyhow::Error,
}

impl From<ChainFailure> for anyhow::Error {
    fn from(f: ChainFailure) -> Self { f.error }
}

#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, p: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(p));
        self
    }

    pub fn push(&mut self, p: Box<dyn Processor>) { self.processors.push(p); }

    pub fn len(&self) -> usize { self.processors.len() }

    pub fn is_empty(&self) -> bool { self.processors.is_empty() }

    pub fn process(&self, resources: Vec<Resource>) -> std::result::Result<Vec<Resource>, ChainFailure> {
        let mut cur = resources;
        for p in &self.processors {
            let before = cur.len();
            // Processors consume their input; keep a copy to hand back on failure.
            match p.process(cur.clone()) {
                Ok(next) => {
                    let removed = before.saturating_sub(next.len());
                    debug!(processor = p.name(), before, after = next.len(), "processor applied");
                    counter!("kahoy_processor_removed_total", removed as u64, "processor" => p.name());
                    cur = next;
                }
                Err(error) => {
                    let error = error.context(format!("processor {}", p.name()));
                    return Err(ChainFailure { partial: cur, error });
                }
            }
        }
        Ok(cur)
    }
}

/// Drops resources whose `<group>/<version>/<Kind>` matches any regex.
pub struct ExcludeKubeTypeProcessor {
    regexes: Vec<Regex>,
}

impl ExcludeKubeTypeProcessor {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let regexes = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref())
                    .map_err(|e| Error::not_valid(format!("invalid kube type regex {:?}: {}", p.as_ref(), e)).into())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { regexes })
    }
}

impl Processor for ExcludeKubeTypeProcessor {
    fn name(&self) -> &'static str { "exclude-kube-type" }

    fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        if self.regexes.is_empty() { return Ok(resources); }
        Ok(resources
            .into_iter()
            .filter(|r| {
                let t = factory::kube_type(&r.k8s_object);
                !self.regexes.iter().any(|re| re.is_match(&t))
            })
            .collect())
    }
}

pub struct LabelSelectorProcessor {
    selector: Selector,
}

impl LabelSelectorProcessor {
    pub fn new(expr: &str) -> Result<Self> { Ok(Self { selector: Selector::parse(expr)? }) }
}

impl Processor for LabelSelectorProcessor {
    fn name(&self) -> &'static str { "kube-label-selector" }

    fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        if self.selector.is_empty() { return Ok(resources); }
        Ok(resources.into_iter().filter(|r| self.selector.matches(&r.k8s_object.labels())).collect())
    }
}

pub struct AnnotationSelectorProcessor {
    selector: Selector,
}

impl AnnotationSelectorProcessor {
    pub fn new(expr: &str) -> Result<Self> { Ok(Self { selector: Selector::parse(expr)? }) }
}

impl Processor for AnnotationSelectorProcessor {
    fn name(&self) -> &'static str { "kube-annotation-selector" }

    fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        if self.selector.is_empty() { return Ok(resources); }
        Ok(resources.into_iter().filter(|r| self.selector.matches(&r.k8s_object.annotations())).collect())
    }
}

/// Exclude/include regexes over `manifest_path`, same rules as the filesystem loader.
pub struct PathFilterProcessor {
    filter: PathFilter,
}

impl PathFilterProcessor {
    pub fn new<S: AsRef<str>>(exclude: &[S], include: &[S]) -> Result<Self> {
        Ok(Self { filter: PathFilter::new(exclude, include)? })
    }
}

impl Processor for PathFilterProcessor {
    fn name(&self) -> &'static str { "path-regex" }

    fn process(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        Ok(resources.into_iter().filter(|r| self.filter.allows(&r.manifest_path)).collect())
    }
}
