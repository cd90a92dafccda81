//! Dedup resolution workflow.
//!
//! A session walks the ordered duplicate groups, hands each one to a
//! [`DecisionProvider`], and applies the returned decision through a
//! [`FileRemover`](crate::actions::FileRemover).

pub mod workflow;

pub use workflow::{
    DecisionProvider, DedupFailure, DedupSummary, FailureKind, GroupOutcome, Presentation,
    ResolutionDecision, ResolutionSession, SessionState,
};
