//! Data models for the thesis worker

pub mod defect;
pub mod document_tree;
pub mod job;
pub mod reference;
pub mod thesis_spec;

pub use defect::{CritiqueMode, DefectAudit, DefectReport};
pub use document_tree::{count_words, DocumentNode, DocumentTree, TreeParseError};
pub use job::{
    AcquisitionSummary, JobMetadata, JobState, PipelineWarning, QualityReport, RepairSummary,
    StateTransition, StyleSummary, ThesisJob,
};
pub use reference::{normalize_external_id, AcquisitionTask, ReferenceRecord};
pub use thesis_spec::{CitationStyle, LengthUnit, OutlineNode, SpecError, ThesisSpec};
