//! # Artifact State
//!
//! Derived artifacts (calculations, templates, drawings, reports) carry
//! their last committed value together with a *provenance vector*: the
//! exact input revisions that produced it. Comparing the provenance vector
//! against the current revisions of the declared inputs is the sole
//! staleness test: an artifact is stale iff some input has moved past the
//! recorded revision.
//!
//! The [`ArtifactLedger`] holds every artifact's state. During a
//! recomputation pass the scheduler stages results privately and commits
//! them here as one batch, so readers never observe a half-updated pass.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::derivation::registry::ArtifactKind;
use crate::errors::{EngineError, EngineResult};
use crate::space::Discipline;
use crate::value::{ArtifactId, NodeId, ParamId, ParamValue, Revision};

// ============================================================================
// Provenance
// ============================================================================

/// The exact input revisions an artifact's current value was derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceVector {
    /// Parameter inputs: id -> revision used
    pub parameters: BTreeMap<ParamId, Revision>,

    /// Upstream artifact inputs: id -> revision used
    pub artifacts: BTreeMap<ArtifactId, Revision>,
}

impl ProvenanceVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, input: &NodeId, revision: Revision) {
        match input {
            NodeId::Parameter(p) => {
                self.parameters.insert(p.clone(), revision);
            }
            NodeId::Artifact(a) => {
                self.artifacts.insert(a.clone(), revision);
            }
        }
    }

    /// The revision recorded for an input, if any.
    pub fn revision_of(&self, input: &NodeId) -> Option<Revision> {
        match input {
            NodeId::Parameter(p) => self.parameters.get(p).copied(),
            NodeId::Artifact(a) => self.artifacts.get(a).copied(),
        }
    }

    pub fn len(&self) -> usize {
        self.parameters.len() + self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.artifacts.is_empty()
    }
}

// ============================================================================
// Status
// ============================================================================

/// Where an artifact stands relative to its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    /// Provenance matches the current revisions of every declared input
    Current,
    /// Some input has advanced past the recorded provenance
    Stale,
    /// The last recomputation attempt failed; the artifact keeps its
    /// last-known-good value and will be retried on the next pass touching
    /// its inputs. `attempts` counts consecutive failures.
    Failed { reason: String, attempts: u32 },
}

impl ArtifactStatus {
    pub fn is_current(&self) -> bool {
        matches!(self, ArtifactStatus::Current)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ArtifactStatus::Failed { .. })
    }

    /// Lowercase label for logs and client-facing views
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactStatus::Current => "current",
            ArtifactStatus::Stale => "stale",
            ArtifactStatus::Failed { .. } => "failed",
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Committed state of one derived artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactState {
    pub id: ArtifactId,
    pub kind: ArtifactKind,

    /// Human title for document headers (e.g., "Pipe Stress Summary")
    pub title: String,

    /// Discipline that owns this artifact
    pub discipline: Discipline,

    /// Monotonic revision, bumped on every committed recomputation.
    /// Downstream provenance vectors reference this.
    pub revision: Revision,

    /// Last successfully derived value; `None` until the first successful
    /// derivation commits
    pub value: Option<ParamValue>,

    /// Input revisions behind `value`
    pub provenance: ProvenanceVector,

    pub status: ArtifactStatus,

    /// When `value` was computed
    pub computed_at: Option<DateTime<Utc>>,
}

impl ArtifactState {
    /// Fresh state for a newly registered artifact: no value yet, stale
    /// until the first pass derives it.
    pub fn new(
        id: ArtifactId,
        kind: ArtifactKind,
        title: impl Into<String>,
        discipline: Discipline,
    ) -> Self {
        ArtifactState {
            id,
            kind,
            title: title.into(),
            discipline,
            revision: Revision(0),
            value: None,
            provenance: ProvenanceVector::new(),
            status: ArtifactStatus::Stale,
            computed_at: None,
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// All artifact states, keyed by id.
///
/// The scheduler is the only writer; it commits a whole pass as one batch
/// while holding the engine's write lock.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLedger {
    artifacts: HashMap<ArtifactId, ArtifactState>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from snapshot states.
    pub fn from_states(states: Vec<ArtifactState>) -> Self {
        let artifacts = states.into_iter().map(|s| (s.id.clone(), s)).collect();
        ArtifactLedger { artifacts }
    }

    pub fn insert(&mut self, state: ArtifactState) {
        self.artifacts.insert(state.id.clone(), state);
    }

    pub fn get(&self, id: &ArtifactId) -> EngineResult<&ArtifactState> {
        self.artifacts
            .get(id)
            .ok_or_else(|| EngineError::not_found(id.as_str(), "unknown artifact"))
    }

    pub fn try_get(&self, id: &ArtifactId) -> Option<&ArtifactState> {
        self.artifacts.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ArtifactId) -> Option<&mut ArtifactState> {
        self.artifacts.get_mut(id)
    }

    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.artifacts.contains_key(id)
    }

    pub fn remove(&mut self, id: &ArtifactId) -> EngineResult<ArtifactState> {
        self.artifacts
            .remove(id)
            .ok_or_else(|| EngineError::not_found(id.as_str(), "unknown artifact"))
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// States sorted by id, for deterministic snapshots.
    pub fn states(&self) -> Vec<ArtifactState> {
        let mut states: Vec<_> = self.artifacts.values().cloned().collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    /// Ids of every artifact currently not `Current` (stale, failed, or
    /// never computed).
    pub fn behind(&self) -> Vec<ArtifactId> {
        let mut ids: Vec<_> = self
            .artifacts
            .values()
            .filter(|s| !s.status.is_current())
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Commit one successful recomputation: store the value, stamp the
    /// provenance, bump the revision, clear any failure marker.
    pub fn commit_value(
        &mut self,
        id: &ArtifactId,
        value: ParamValue,
        provenance: ProvenanceVector,
        computed_at: DateTime<Utc>,
    ) -> EngineResult<Revision> {
        let state = self
            .artifacts
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(id.as_str(), "unknown artifact"))?;
        state.revision = state.revision.next();
        state.value = Some(value);
        state.provenance = provenance;
        state.status = ArtifactStatus::Current;
        state.computed_at = Some(computed_at);
        Ok(state.revision)
    }

    /// Record a failed recomputation: the last-known-good value, provenance
    /// and revision stay untouched, the failure marker is set.
    pub fn record_failure(&mut self, id: &ArtifactId, reason: impl Into<String>) -> EngineResult<()> {
        let state = self
            .artifacts
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(id.as_str(), "unknown artifact"))?;
        let attempts = match &state.status {
            ArtifactStatus::Failed { attempts, .. } => attempts + 1,
            _ => 1,
        };
        state.status = ArtifactStatus::Failed {
            reason: reason.into(),
            attempts,
        };
        Ok(())
    }

    /// Flag an artifact as behind its inputs without recomputing it.
    pub fn mark_stale(&mut self, id: &ArtifactId) -> EngineResult<()> {
        let state = self
            .artifacts
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(id.as_str(), "unknown artifact"))?;
        if !state.status.is_failed() {
            state.status = ArtifactStatus::Stale;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_calc() -> ArtifactLedger {
        let mut ledger = ArtifactLedger::new();
        ledger.insert(ArtifactState::new(
            "stressCalc".into(),
            ArtifactKind::Calculation,
            "Pipe Stress Summary",
            Discipline::PipingStress,
        ));
        ledger
    }

    #[test]
    fn test_new_artifact_starts_stale_without_value() {
        let ledger = ledger_with_calc();
        let state = ledger.get(&"stressCalc".into()).unwrap();
        assert_eq!(state.status, ArtifactStatus::Stale);
        assert!(state.value.is_none());
        assert_eq!(state.revision, Revision(0));
    }

    #[test]
    fn test_commit_bumps_revision_and_clears_failure() {
        let mut ledger = ledger_with_calc();
        let id = ArtifactId::from("stressCalc");

        ledger.record_failure(&id, "solver offline").unwrap();
        assert!(ledger.get(&id).unwrap().status.is_failed());

        let mut provenance = ProvenanceVector::new();
        provenance.record(&NodeId::parameter("pipeDiameter"), Revision(2));

        let revision = ledger
            .commit_value(&id, ParamValue::Number(9810.0), provenance.clone(), Utc::now())
            .unwrap();
        assert_eq!(revision, Revision(1));

        let state = ledger.get(&id).unwrap();
        assert!(state.status.is_current());
        assert_eq!(state.provenance, provenance);
        assert_eq!(
            state.provenance.revision_of(&NodeId::parameter("pipeDiameter")),
            Some(Revision(2))
        );
    }

    #[test]
    fn test_failure_keeps_last_known_good_value() {
        let mut ledger = ledger_with_calc();
        let id = ArtifactId::from("stressCalc");

        ledger
            .commit_value(&id, ParamValue::Number(9810.0), ProvenanceVector::new(), Utc::now())
            .unwrap();
        ledger.record_failure(&id, "solver offline").unwrap();
        ledger.record_failure(&id, "solver offline").unwrap();

        let state = ledger.get(&id).unwrap();
        assert_eq!(state.value, Some(ParamValue::Number(9810.0)));
        assert_eq!(state.revision, Revision(1));
        assert_eq!(
            state.status,
            ArtifactStatus::Failed {
                reason: "solver offline".to_string(),
                attempts: 2
            }
        );
    }

    #[test]
    fn test_mark_stale_preserves_failure_marker() {
        let mut ledger = ledger_with_calc();
        let id = ArtifactId::from("stressCalc");
        ledger.record_failure(&id, "solver offline").unwrap();
        ledger.mark_stale(&id).unwrap();
        // A failed artifact stays flagged for retry, not silently stale
        assert!(ledger.get(&id).unwrap().status.is_failed());
        assert_eq!(ledger.behind(), vec![id]);
    }

    #[test]
    fn test_state_serialization_roundtrip() {
        let mut ledger = ledger_with_calc();
        let id = ArtifactId::from("stressCalc");
        let mut provenance = ProvenanceVector::new();
        provenance.record(&NodeId::parameter("pipeDiameter"), Revision(2));
        ledger
            .commit_value(&id, ParamValue::Number(9810.0), provenance, Utc::now())
            .unwrap();

        let json = serde_json::to_string(&ledger.get(&id).unwrap()).unwrap();
        let roundtrip: ArtifactState = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip.revision, Revision(1));
        assert!(roundtrip.status.is_current());
    }
}
