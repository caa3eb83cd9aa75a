//! # Dependency Graph
//!
//! Directed acyclic graph linking producers (parameters or artifacts) to
//! the artifacts consuming them. Built from the derivation registry at
//! startup and maintained incrementally as artifacts are registered and
//! retired.
//!
//! Cycles are rejected when an edge is inserted, never discovered at
//! runtime: a registration that would close a cycle fails with a `Cycle`
//! error and the graph keeps its prior valid state.
//!
//! ## Example
//!
//! ```rust
//! use basis_core::graph::DependencyGraph;
//! use basis_core::value::NodeId;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_artifact(&"stressCalc".into(), &[NodeId::parameter("pipeDiameter")]).unwrap();
//! graph.add_artifact(&"isoDrawing".into(), &[NodeId::artifact("stressCalc")]).unwrap();
//!
//! let stale = graph.reachable_artifacts([NodeId::parameter("pipeDiameter")]);
//! assert_eq!(stale.len(), 2);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::errors::{EngineError, EngineResult};
use crate::value::{ArtifactId, NodeId};

/// Adjacency structure over tagged nodes.
///
/// Edges run producer -> consumer. Parameters are always pure producers;
/// artifacts consume, and may in turn feed other artifacts.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Producer -> consumers, in registration order
    consumers: HashMap<NodeId, Vec<ArtifactId>>,

    /// Consumer -> its declared input set, in declaration order
    inputs: HashMap<ArtifactId, Vec<NodeId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an artifact and its input edges.
    ///
    /// Rejects duplicates and anything that would close a cycle. On
    /// rejection the graph is untouched.
    pub fn add_artifact(&mut self, id: &ArtifactId, inputs: &[NodeId]) -> EngineResult<()> {
        if self.inputs.contains_key(id) {
            return Err(EngineError::invalid_input(
                "artifactId",
                id.as_str(),
                "Artifact is already registered",
            ));
        }
        self.check_acyclic(id, inputs)?;

        for input in inputs {
            self.consumers
                .entry(input.clone())
                .or_default()
                .push(id.clone());
        }
        self.inputs.insert(id.clone(), inputs.to_vec());
        Ok(())
    }

    /// Swap the declared inputs of an existing artifact (re-registration).
    pub fn replace_inputs(&mut self, id: &ArtifactId, inputs: &[NodeId]) -> EngineResult<()> {
        if !self.inputs.contains_key(id) {
            return Err(EngineError::not_found(id.as_str(), "unknown artifact"));
        }
        self.check_acyclic(id, inputs)?;

        self.unlink_inputs(id);
        for input in inputs {
            self.consumers
                .entry(input.clone())
                .or_default()
                .push(id.clone());
        }
        self.inputs.insert(id.clone(), inputs.to_vec());
        Ok(())
    }

    /// Remove an artifact. Fails while other artifacts still consume it.
    pub fn remove_artifact(&mut self, id: &ArtifactId) -> EngineResult<()> {
        if !self.inputs.contains_key(id) {
            return Err(EngineError::not_found(id.as_str(), "unknown artifact"));
        }
        let dependents = self.dependents(&NodeId::Artifact(id.clone()));
        if !dependents.is_empty() {
            let names: Vec<String> = dependents.iter().map(|d| d.as_str().to_string()).collect();
            return Err(EngineError::invalid_input(
                "artifactId",
                id.as_str(),
                format!("Still consumed by: {}", names.join(", ")),
            ));
        }
        self.unlink_inputs(id);
        self.inputs.remove(id);
        self.consumers.remove(&NodeId::Artifact(id.clone()));
        Ok(())
    }

    /// Direct consumers of a node, in registration order.
    pub fn dependents(&self, node: &NodeId) -> &[ArtifactId] {
        self.consumers.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Declared inputs of an artifact, in declaration order.
    pub fn inputs_of(&self, id: &ArtifactId) -> &[NodeId] {
        self.inputs.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_artifact(&self, id: &ArtifactId) -> bool {
        self.inputs.contains_key(id)
    }

    pub fn artifact_count(&self) -> usize {
        self.inputs.len()
    }

    /// Every artifact transitively reachable from the seed nodes, in
    /// breadth-first discovery order.
    pub fn reachable_artifacts(
        &self,
        seeds: impl IntoIterator<Item = NodeId>,
    ) -> Vec<ArtifactId> {
        let mut queue: VecDeque<NodeId> = seeds.into_iter().collect();
        let mut seen: HashSet<ArtifactId> = HashSet::new();
        let mut order = Vec::new();

        while let Some(node) = queue.pop_front() {
            for consumer in self.dependents(&node) {
                if seen.insert(consumer.clone()) {
                    order.push(consumer.clone());
                    queue.push_back(NodeId::Artifact(consumer.clone()));
                }
            }
        }
        order
    }

    /// Topological order over a subset of artifacts: every artifact appears
    /// after all of its in-subset inputs. Ties break by id so the order is
    /// deterministic.
    ///
    /// Registration keeps the graph acyclic, so a cycle here indicates
    /// internal corruption and is reported as such.
    pub fn topological_order(
        &self,
        subset: &HashSet<ArtifactId>,
    ) -> EngineResult<Vec<ArtifactId>> {
        let mut remaining: HashMap<&ArtifactId, usize> = HashMap::new();
        for id in subset {
            let in_subset_inputs = self
                .inputs_of(id)
                .iter()
                .filter(|input| match input {
                    NodeId::Artifact(a) => subset.contains(a),
                    NodeId::Parameter(_) => false,
                })
                .count();
            remaining.insert(id, in_subset_inputs);
        }

        let mut ready: BTreeSet<&ArtifactId> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(subset.len());

        while let Some(id) = ready.iter().next().cloned() {
            ready.remove(id);
            order.push(id.clone());
            for consumer in self.dependents(&NodeId::Artifact(id.clone())) {
                if let Some(n) = remaining.get_mut(consumer) {
                    *n -= 1;
                    if *n == 0 {
                        // Re-borrow from the subset so the reference outlives the loop
                        if let Some(key) = subset.get(consumer) {
                            ready.insert(key);
                        }
                    }
                }
            }
        }

        if order.len() != subset.len() {
            return Err(EngineError::Internal {
                message: "dependency graph contains a cycle despite registration checks".to_string(),
            });
        }
        Ok(order)
    }

    /// Reject edge sets that would let `id` feed itself, directly or
    /// through existing consumers.
    fn check_acyclic(&self, id: &ArtifactId, inputs: &[NodeId]) -> EngineResult<()> {
        let input_artifacts: HashSet<&ArtifactId> = inputs
            .iter()
            .filter_map(|n| match n {
                NodeId::Artifact(a) => Some(a),
                NodeId::Parameter(_) => None,
            })
            .collect();

        if input_artifacts.contains(id) {
            return Err(EngineError::cycle(
                id.as_str(),
                vec![id.as_str().to_string(), id.as_str().to_string()],
            ));
        }

        // A cycle forms iff one of the declared inputs is reachable from
        // `id` through existing consumer edges.
        let mut stack = vec![(NodeId::Artifact(id.clone()), vec![id.as_str().to_string()])];
        let mut visited: HashSet<ArtifactId> = HashSet::new();
        while let Some((node, path)) = stack.pop() {
            for consumer in self.dependents(&node) {
                if !visited.insert(consumer.clone()) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(consumer.as_str().to_string());
                if input_artifacts.contains(consumer) {
                    next_path.push(id.as_str().to_string());
                    return Err(EngineError::cycle(id.as_str(), next_path));
                }
                stack.push((NodeId::Artifact(consumer.clone()), next_path));
            }
        }
        Ok(())
    }

    /// Drop the producer -> `id` edges for the artifact's current inputs.
    fn unlink_inputs(&mut self, id: &ArtifactId) {
        if let Some(inputs) = self.inputs.get(id).cloned() {
            for input in inputs {
                if let Some(consumers) = self.consumers.get_mut(&input) {
                    consumers.retain(|c| c != id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> DependencyGraph {
        // pipeDiameter -> stressCalc -> isoDrawing
        //              \-> hydraulicReport
        let mut graph = DependencyGraph::new();
        graph
            .add_artifact(&"stressCalc".into(), &[NodeId::parameter("pipeDiameter")])
            .unwrap();
        graph
            .add_artifact(&"isoDrawing".into(), &[NodeId::artifact("stressCalc")])
            .unwrap();
        graph
            .add_artifact(&"hydraulicReport".into(), &[NodeId::parameter("pipeDiameter")])
            .unwrap();
        graph
    }

    #[test]
    fn test_dependents_in_registration_order() {
        let graph = chain();
        let dependents = graph.dependents(&NodeId::parameter("pipeDiameter"));
        assert_eq!(
            dependents.to_vec(),
            vec![ArtifactId::from("stressCalc"), ArtifactId::from("hydraulicReport")]
        );
    }

    #[test]
    fn test_reachability_walks_artifact_edges() {
        let graph = chain();
        let reachable = graph.reachable_artifacts([NodeId::parameter("pipeDiameter")]);
        assert_eq!(reachable.len(), 3);
        assert!(reachable.contains(&"isoDrawing".into()));

        let from_calc = graph.reachable_artifacts([NodeId::artifact("stressCalc")]);
        assert_eq!(from_calc, vec![ArtifactId::from("isoDrawing")]);
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut graph = DependencyGraph::new();
        let err = graph
            .add_artifact(&"loop".into(), &[NodeId::artifact("loop")])
            .unwrap_err();
        assert_eq!(err.error_code(), "CYCLE");
        assert!(!graph.contains_artifact(&"loop".into()));
    }

    #[test]
    fn test_cycle_through_existing_consumers_rejected() {
        let mut graph = chain();
        // stressCalc -> isoDrawing already exists; feeding isoDrawing back
        // into stressCalc must fail and leave the graph unchanged.
        let err = graph
            .replace_inputs(
                &"stressCalc".into(),
                &[NodeId::parameter("pipeDiameter"), NodeId::artifact("isoDrawing")],
            )
            .unwrap_err();
        assert_eq!(err.error_code(), "CYCLE");
        assert_eq!(
            graph.inputs_of(&"stressCalc".into()).to_vec(),
            vec![NodeId::parameter("pipeDiameter")]
        );
    }

    #[test]
    fn test_topological_order_respects_chains() {
        let graph = chain();
        let subset: HashSet<ArtifactId> = ["stressCalc", "isoDrawing", "hydraulicReport"]
            .into_iter()
            .map(ArtifactId::from)
            .collect();
        let order = graph.topological_order(&subset).unwrap();

        let pos = |id: &str| order.iter().position(|a| a.as_str() == id).unwrap();
        assert!(pos("stressCalc") < pos("isoDrawing"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_topological_order_over_partial_subset() {
        let graph = chain();
        // Only the downstream drawing is in the working set; its upstream
        // calc is outside and must not count as an in-subset dependency.
        let subset: HashSet<ArtifactId> = [ArtifactId::from("isoDrawing")].into_iter().collect();
        let order = graph.topological_order(&subset).unwrap();
        assert_eq!(order, vec![ArtifactId::from("isoDrawing")]);
    }

    #[test]
    fn test_remove_requires_no_consumers() {
        let mut graph = chain();
        let err = graph.remove_artifact(&"stressCalc".into()).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");

        graph.remove_artifact(&"isoDrawing".into()).unwrap();
        graph.remove_artifact(&"stressCalc".into()).unwrap();
        assert_eq!(graph.artifact_count(), 1);
    }
}
