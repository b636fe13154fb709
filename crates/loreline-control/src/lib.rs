//! The control plane: versioned policies, release packages, and A/B
//! experiments with stable bucketing.
//!
//! Releases point at policy/prompt versions, never the other way around;
//! that keeps the version graph acyclic and makes rollback a pure
//! re-activation.

pub mod db;
pub mod error;
pub mod experiment;
pub mod policy;
pub mod release;

pub use error::ControlError;
pub use experiment::{bucket_for, Experiment, ExperimentAssignment, ExperimentStore, Variant};
pub use policy::{PolicyStore, PolicyVersion, ALERT_RULES_POLICY, EVIDENCE_GATE_POLICY};
pub use release::{payload, Release, ReleaseHistoryRow, ReleaseStore};
