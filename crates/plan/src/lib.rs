//! Kahoy planning: processor chain over loaded resources, Kubernetes
//! label/annotation selectors and the OLD/NEW planner.

#![forbid(unsafe_code)]

pub mod planner;
pub mod processor;
pub mod selector;

pub use planner::Planner;
pub use processor::{
    AnnotationSelectorProcessor, ChainFailure, ExcludeKubeTypeProcessor, LabelSelectorProcessor, PathFilterProcessor,
    Processor, ProcessorChain,
};
pub use selector::Selector;
