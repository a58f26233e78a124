//! Data models for ccr-reviewer

pub mod classification;
pub mod code_review;
pub mod standard_set;

pub use classification::{Classification, ClassificationCreate};
pub use code_review::{
    CodeReview, CodeReviewCreate, ComplianceReport, ReviewStatus, StandardSetRef,
};
pub use standard_set::{
    IngestStatus, NewStandard, Standard, StandardSet, StandardSetCreate, StandardSetWithStandards,
};
