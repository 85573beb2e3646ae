//! Serialized merge pipeline with semantic and structural fallbacks.

pub mod pipeline;
pub mod semantic;
pub mod smart;

pub use pipeline::{MergePipeline, ResolverRequest};
pub use semantic::{SemanticMergeOutcome, SemanticMerger};
pub use smart::{SmartMergeReport, SmartMerger};
