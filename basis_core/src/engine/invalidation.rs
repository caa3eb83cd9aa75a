//! # Invalidation
//!
//! Staleness is decided by provenance alone: an artifact is stale iff some
//! declared input's effective revision exceeds the revision recorded when
//! the artifact's value was derived (or the artifact has never derived a
//! value at all).
//!
//! During a pass the *effective* revision of an upstream artifact may be a
//! staged, not-yet-committed one; feeding the check a revision source
//! keeps it usable both against committed state (registration, refresh
//! seeding) and against the scheduler's pass-local overlay (dynamic
//! pruning, step by step along the topological order).

use std::collections::HashSet;

use crate::artifact::ProvenanceVector;
use crate::graph::DependencyGraph;
use crate::value::{ArtifactId, NodeId, Revision};

/// Provenance-based staleness test.
///
/// `effective_revision` returns the revision an input would be read at
/// right now; `None` means the input has no readable value yet (an
/// upstream artifact that has never computed), which also makes the
/// consumer stale, since it cannot have derived from it.
pub(crate) fn is_stale(
    has_value: bool,
    provenance: &ProvenanceVector,
    inputs: &[NodeId],
    effective_revision: impl Fn(&NodeId) -> Option<Revision>,
) -> bool {
    if !has_value {
        return true;
    }
    for input in inputs {
        match (effective_revision(input), provenance.revision_of(input)) {
            // Input moved past what we derived from
            (Some(current), Some(recorded)) if current > recorded => return true,
            // Derived before this input was declared
            (Some(_), None) => return true,
            // Input not readable yet: the recorded value cannot stand
            (None, _) => return true,
            _ => {}
        }
    }
    false
}

/// Candidate stale set for a committed (or proposed) change: every
/// artifact transitively reachable from the touched parameters.
pub(crate) fn candidates_for_change(
    graph: &DependencyGraph,
    touched: impl IntoIterator<Item = NodeId>,
) -> Vec<ArtifactId> {
    graph.reachable_artifacts(touched)
}

/// Candidate set for a refresh: every artifact currently behind, plus
/// everything downstream of it (their recomputation advances revisions the
/// dependents must catch up with).
pub(crate) fn candidates_for_refresh(
    graph: &DependencyGraph,
    behind: &[ArtifactId],
) -> Vec<ArtifactId> {
    let mut set: HashSet<ArtifactId> = behind.iter().cloned().collect();
    let mut order: Vec<ArtifactId> = behind.to_vec();
    for id in graph.reachable_artifacts(behind.iter().cloned().map(NodeId::Artifact)) {
        if set.insert(id.clone()) {
            order.push(id);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance(pairs: &[(&str, u64)]) -> ProvenanceVector {
        let mut p = ProvenanceVector::new();
        for (id, rev) in pairs {
            p.record(&NodeId::parameter(*id), Revision(*rev));
        }
        p
    }

    #[test]
    fn test_current_provenance_is_not_stale() {
        let p = provenance(&[("pipeDiameter", 2)]);
        let inputs = [NodeId::parameter("pipeDiameter")];
        assert!(!is_stale(true, &p, &inputs, |_| Some(Revision(2))));
    }

    #[test]
    fn test_advanced_input_is_stale() {
        let p = provenance(&[("pipeDiameter", 2)]);
        let inputs = [NodeId::parameter("pipeDiameter")];
        assert!(is_stale(true, &p, &inputs, |_| Some(Revision(3))));
    }

    #[test]
    fn test_never_computed_is_stale() {
        let p = ProvenanceVector::new();
        let inputs = [NodeId::parameter("pipeDiameter")];
        assert!(is_stale(false, &p, &inputs, |_| Some(Revision(1))));
    }

    #[test]
    fn test_newly_declared_input_is_stale() {
        // Value exists, but it predates the declaration of a second input
        let p = provenance(&[("pipeDiameter", 2)]);
        let inputs = [
            NodeId::parameter("pipeDiameter"),
            NodeId::parameter("wallThickness"),
        ];
        assert!(is_stale(true, &p, &inputs, |_| Some(Revision(2))));
    }

    #[test]
    fn test_unreadable_upstream_is_stale() {
        let p = provenance(&[("pipeDiameter", 2)]);
        let inputs = [NodeId::artifact("stressCalc")];
        assert!(is_stale(true, &p, &inputs, |_| None));
    }

    #[test]
    fn test_refresh_candidates_include_downstream() {
        let mut graph = DependencyGraph::new();
        graph
            .add_artifact(&"stressCalc".into(), &[NodeId::parameter("pipeDiameter")])
            .unwrap();
        graph
            .add_artifact(&"isoDrawing".into(), &[NodeId::artifact("stressCalc")])
            .unwrap();

        let candidates = candidates_for_refresh(&graph, &["stressCalc".into()]);
        assert_eq!(
            candidates,
            vec![ArtifactId::from("stressCalc"), ArtifactId::from("isoDrawing")]
        );
    }
}
