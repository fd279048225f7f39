//! Clinical decision engine for emergency triage.
//!
//! Resolves the rule pack that covers a presenting complaint, evaluates its
//! rules against a structured assessment, derives a triage disposition, and
//! calibrates diagnosis confidence from clinician feedback.

pub mod clinical;
pub mod config;
pub mod error;
pub mod telemetry;
