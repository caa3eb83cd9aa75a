//! # Change Requests
//!
//! A change request is the only way shared parameters are mutated after
//! registration. Each request names its base revisions (optimistic
//! concurrency) and is accepted atomically: either every write advances,
//! or none do.
//!
//! ## Example
//!
//! ```rust
//! use basis_core::change::ChangeRequest;
//! use basis_core::space::Discipline;
//! use basis_core::value::{ParamValue, Revision};
//!
//! let request = ChangeRequest::new("t.nguyen", Discipline::PipingStress)
//!     .with_write("pipeDiameter", Revision(1), ParamValue::Number(12.0))
//!     .with_write("wallThickness", Revision(1), ParamValue::Number(0.365));
//!
//! assert_eq!(request.writes.len(), 2);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::space::Discipline;
use crate::value::{ArtifactId, ParamId, ParamValue, Revision};

/// A proposed atomic write to one or more parameters.
///
/// `base_revisions` must name, for every written parameter, the revision
/// the requester last observed. A mismatch against the committed state
/// rejects the whole request with a `Conflict` error listing every
/// mismatched id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Unique request id (used for logs, events, and cancellation)
    pub request_id: Uuid,

    /// Who is asking (user id or service name)
    pub requester: String,

    /// Discipline on whose behalf the change is made
    pub discipline: Discipline,

    /// Last observed revision per written parameter
    pub base_revisions: BTreeMap<ParamId, Revision>,

    /// Proposed new values
    pub writes: BTreeMap<ParamId, ParamValue>,
}

impl ChangeRequest {
    /// Create an empty request for the given requester.
    pub fn new(requester: impl Into<String>, discipline: Discipline) -> Self {
        ChangeRequest {
            request_id: Uuid::new_v4(),
            requester: requester.into(),
            discipline,
            base_revisions: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Add a write with its observed base revision (builder style).
    pub fn with_write(
        mut self,
        id: impl Into<ParamId>,
        base: Revision,
        value: ParamValue,
    ) -> Self {
        let id = id.into();
        self.base_revisions.insert(id.clone(), base);
        self.writes.insert(id, value);
        self
    }

    /// Ids touched by this request.
    pub fn touched(&self) -> impl Iterator<Item = &ParamId> {
        self.writes.keys()
    }

    /// Structural validation: at least one write, and a base revision for
    /// every written parameter.
    pub fn validate(&self) -> EngineResult<()> {
        if self.writes.is_empty() {
            return Err(EngineError::invalid_input(
                "writes",
                "(empty)",
                "A change request must write at least one parameter",
            ));
        }
        for id in self.writes.keys() {
            if !self.base_revisions.contains_key(id) {
                return Err(EngineError::missing_field(format!(
                    "base_revisions.{}",
                    id
                )));
            }
        }
        Ok(())
    }
}

/// Result of an accepted change request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOutcome {
    /// The request that was applied
    pub request_id: Uuid,

    /// New committed revision per written parameter
    pub new_revisions: BTreeMap<ParamId, Revision>,

    /// Summary of the recomputation pass triggered by the commit
    pub pass: PassSummary,
}

/// What a single invalidation and recomputation pass did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassSummary {
    /// Monotonic pass counter (engine lifetime)
    pub pass_id: u64,

    /// Artifacts recomputed and committed with fresh provenance
    pub recomputed: Vec<ArtifactId>,

    /// Candidates whose provenance was already current and were skipped
    pub skipped: Vec<ArtifactId>,

    /// Artifacts whose derivation failed (kept last-known-good value)
    pub failed: Vec<ArtifactId>,

    /// Artifacts not recomputed because an upstream derivation failed
    pub blocked: Vec<ArtifactId>,
}

impl PassSummary {
    /// True if every candidate reached a committed, current state.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_writes() {
        let request = ChangeRequest::new("engineer", Discipline::Systems)
            .with_write("pipeDiameter", Revision(1), ParamValue::Number(12.0));

        assert!(request.validate().is_ok());
        assert_eq!(
            request.base_revisions.get(&ParamId::from("pipeDiameter")),
            Some(&Revision(1))
        );
    }

    #[test]
    fn test_empty_request_rejected() {
        let request = ChangeRequest::new("engineer", Discipline::Systems);
        assert_eq!(request.validate().unwrap_err().error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_request_serialization() {
        let request = ChangeRequest::new("engineer", Discipline::Drafting)
            .with_write("lineNumber", Revision(3), ParamValue::Text("2-FW-1042".into()));
        let json = serde_json::to_string(&request).unwrap();
        let roundtrip: ChangeRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip.request_id, request.request_id);
        assert_eq!(roundtrip.writes.len(), 1);
    }
}
