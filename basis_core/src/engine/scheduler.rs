//! # Pass Scheduler
//!
//! One pass = one committed change request (or one refresh): validate the
//! writes, walk the graph for the candidate stale set, recompute it in
//! dependency order, and swap everything into the visible state as a
//! single atomic batch.
//!
//! The whole pass is staged. Derivations read a pass-local overlay (the
//! proposed parameter revisions plus just-produced upstream values), and
//! the store and ledger are only written under their locks at the very end.
//! That keeps the write locks to the commit step, makes cancellation free
//! of partial state, and guarantees a derivation never mixes old and new
//! inputs.
//!
//! Scheduling is dependency-counted: an artifact is spawned into the
//! [`JoinSet`] the moment its last in-pass predecessor resolves, so
//! independent branches run concurrently and one derivation awaiting an
//! external resource never stalls the rest of the pass.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::ProvenanceVector;
use crate::change::{ChangeRequest, PassSummary};
use crate::derivation::registry::ArtifactKind;
use crate::derivation::{Derivation, DerivationInputs, InputSample};
use crate::engine::{invalidation, EngineInner};
use crate::errors::{EngineError, EngineResult};
use crate::gateway::EventPayload;
use crate::value::{ArtifactId, NodeId, ParamId, ParamValue, Revision};

/// Frozen per-artifact facts gathered while the read locks are held.
struct PlanNode {
    kind: ArtifactKind,
    inputs: Vec<NodeId>,
    derivation: Arc<dyn Derivation>,
    /// Committed artifact revision at pass start; a recompute commits at
    /// the next one
    base_revision: Revision,
    has_value: bool,
    provenance: ProvenanceVector,
}

/// A successful recomputation waiting for the commit step.
struct StagedValue {
    value: ParamValue,
    revision: Revision,
    provenance: ProvenanceVector,
}

/// How one candidate ended the pass.
enum Resolution {
    /// Fresh value staged for commit
    Computed,
    /// Provenance already current at schedule time (declared-superset
    /// pruning): nothing to do
    Skipped,
    /// Derivation failed; last-known-good value kept, retry flagged
    Failed(String),
    /// An upstream derivation failed or was blocked: this artifact is not
    /// recomputed this pass. Its status is re-evaluated at commit time
    /// against what actually advanced.
    Blocked,
}

/// Run one serialized pass. Returns the committed parameter revisions
/// (empty for a refresh) and the pass summary.
pub(crate) async fn run_pass(
    inner: &EngineInner,
    request: Option<&ChangeRequest>,
    cancel: &CancellationToken,
) -> EngineResult<(BTreeMap<ParamId, Revision>, PassSummary)> {
    let _gate = inner.pass_gate.lock().await;
    let pass_label = request
        .map(|r| r.request_id.to_string())
        .unwrap_or_else(|| "refresh".to_string());

    if cancel.is_cancelled() {
        return Err(EngineError::cancelled(pass_label));
    }
    let pass_id = inner.pass_counter.fetch_add(1, Ordering::Relaxed) + 1;

    // Step 1: validate the writes and build the parameter overlay the
    // derivations will read. The store is not touched yet.
    let new_revisions: BTreeMap<ParamId, Revision> = match request {
        Some(req) => inner.store.read().validate_change(req)?,
        None => BTreeMap::new(),
    };
    let overlay: HashMap<ParamId, InputSample> = match request {
        Some(req) => req
            .writes
            .iter()
            .map(|(id, value)| {
                (
                    id.clone(),
                    InputSample {
                        value: value.clone(),
                        revision: new_revisions[id],
                    },
                )
            })
            .collect(),
        None => HashMap::new(),
    };

    // Steps 2-4: candidate set, plan snapshot, and topological order,
    // all under short-lived read locks.
    let (order, subset, plan, base_samples, consumers_in) = {
        let store = inner.store.read();
        let graph = inner.graph.read();
        let registry = inner.registry.read();
        let ledger = inner.ledger.read();

        let candidates = match request {
            Some(req) => invalidation::candidates_for_change(
                &graph,
                req.touched().cloned().map(NodeId::Parameter),
            ),
            None => invalidation::candidates_for_refresh(&graph, &ledger.behind()),
        };
        let subset: HashSet<ArtifactId> = candidates.iter().cloned().collect();
        let order = graph.topological_order(&subset)?;

        let mut plan: HashMap<ArtifactId, PlanNode> = HashMap::new();
        let mut base_samples: HashMap<NodeId, InputSample> = HashMap::new();
        let mut consumers_in: HashMap<ArtifactId, Vec<ArtifactId>> = HashMap::new();

        for id in &order {
            let spec = registry.get(id)?;
            let state = ledger.get(id)?;
            for input in &spec.inputs {
                if let NodeId::Artifact(a) = input {
                    if subset.contains(a) {
                        consumers_in.entry(a.clone()).or_default().push(id.clone());
                    }
                }
                if base_samples.contains_key(input) {
                    continue;
                }
                let sample = match input {
                    NodeId::Parameter(p) => match overlay.get(p) {
                        Some(sample) => Some(sample.clone()),
                        None => {
                            let (value, revision) = store.read(p)?;
                            Some(InputSample {
                                value: value.clone(),
                                revision,
                            })
                        }
                    },
                    NodeId::Artifact(a) => ledger.try_get(a).and_then(|s| {
                        s.value.as_ref().map(|v| InputSample {
                            value: v.clone(),
                            revision: s.revision,
                        })
                    }),
                };
                if let Some(sample) = sample {
                    base_samples.insert(input.clone(), sample);
                }
            }
            plan.insert(
                id.clone(),
                PlanNode {
                    kind: spec.kind,
                    inputs: spec.inputs.clone(),
                    derivation: spec.derivation.clone(),
                    base_revision: state.revision,
                    has_value: state.value.is_some(),
                    provenance: state.provenance.clone(),
                },
            );
        }
        (order, subset, plan, base_samples, consumers_in)
    };

    debug!(pass = pass_id, candidates = order.len(), "pass planned");

    // Step 5: dependency-counted parallel execution against the overlay.
    let mut waiting: HashMap<ArtifactId, usize> = HashMap::new();
    for id in &order {
        let node = plan_node(&plan, id)?;
        let count = node
            .inputs
            .iter()
            .filter(|input| matches!(input, NodeId::Artifact(a) if subset.contains(a)))
            .count();
        waiting.insert(id.clone(), count);
    }
    let mut ready: VecDeque<ArtifactId> = order
        .iter()
        .filter(|id| waiting.get(*id) == Some(&0))
        .cloned()
        .collect();

    let mut staged: HashMap<ArtifactId, StagedValue> = HashMap::new();
    let mut outcomes: HashMap<ArtifactId, Resolution> = HashMap::new();
    let mut upstream_bad: HashSet<ArtifactId> = HashSet::new();
    let mut tasks: JoinSet<(ArtifactId, EngineResult<ParamValue>, ProvenanceVector)> =
        JoinSet::new();
    let mut pending = order.len();

    while pending > 0 {
        if cancel.is_cancelled() {
            tasks.abort_all();
            return Err(EngineError::cancelled(pass_label));
        }

        // Resolve or spawn everything whose predecessors are settled.
        while let Some(id) = ready.pop_front() {
            let node = plan_node(&plan, &id)?;

            let has_bad_upstream = node
                .inputs
                .iter()
                .any(|input| matches!(input, NodeId::Artifact(a) if upstream_bad.contains(a)));
            if has_bad_upstream {
                settle(
                    &id,
                    Resolution::Blocked,
                    &consumers_in,
                    &mut waiting,
                    &mut ready,
                    &mut upstream_bad,
                    &mut outcomes,
                    &mut pending,
                );
                continue;
            }

            let effective = |input: &NodeId| -> Option<Revision> {
                if let NodeId::Artifact(a) = input {
                    if let Some(s) = staged.get(a) {
                        return Some(s.revision);
                    }
                }
                base_samples.get(input).map(|s| s.revision)
            };
            if !invalidation::is_stale(node.has_value, &node.provenance, &node.inputs, effective) {
                settle(
                    &id,
                    Resolution::Skipped,
                    &consumers_in,
                    &mut waiting,
                    &mut ready,
                    &mut upstream_bad,
                    &mut outcomes,
                    &mut pending,
                );
                continue;
            }

            // Freeze this derivation's inputs: staged upstream values win
            // over the committed snapshot.
            let mut samples: BTreeMap<NodeId, InputSample> = BTreeMap::new();
            let mut unavailable = false;
            for input in &node.inputs {
                let sample = match input {
                    NodeId::Artifact(a) if staged.contains_key(a) => {
                        staged.get(a).map(|s| InputSample {
                            value: s.value.clone(),
                            revision: s.revision,
                        })
                    }
                    _ => base_samples.get(input).cloned(),
                };
                match sample {
                    Some(sample) => {
                        samples.insert(input.clone(), sample);
                    }
                    None => {
                        unavailable = true;
                        break;
                    }
                }
            }
            if unavailable {
                // An upstream artifact has never produced a value and is
                // not producing one this pass
                settle(
                    &id,
                    Resolution::Blocked,
                    &consumers_in,
                    &mut waiting,
                    &mut ready,
                    &mut upstream_bad,
                    &mut outcomes,
                    &mut pending,
                );
                continue;
            }

            let inputs = DerivationInputs::new(samples);
            let provenance = inputs.provenance();
            let derivation = node.derivation.clone();
            let task_cancel = cancel.clone();
            let task_id = id.clone();
            tasks.spawn(async move {
                let result = tokio::select! {
                    _ = task_cancel.cancelled() => {
                        Err(EngineError::cancelled(task_id.as_str()))
                    }
                    result = derivation.derive(inputs) => result,
                };
                (task_id, result, provenance)
            });
        }

        if pending == 0 {
            break;
        }

        match tasks.join_next().await {
            Some(Ok((id, Ok(value), provenance))) => {
                let node = plan_node(&plan, &id)?;
                staged.insert(
                    id.clone(),
                    StagedValue {
                        value,
                        revision: node.base_revision.next(),
                        provenance,
                    },
                );
                settle(
                    &id,
                    Resolution::Computed,
                    &consumers_in,
                    &mut waiting,
                    &mut ready,
                    &mut upstream_bad,
                    &mut outcomes,
                    &mut pending,
                );
            }
            Some(Ok((id, Err(error), _))) => {
                warn!(artifact = %id, %error, "derivation failed; branch halted");
                settle(
                    &id,
                    Resolution::Failed(error.to_string()),
                    &consumers_in,
                    &mut waiting,
                    &mut ready,
                    &mut upstream_bad,
                    &mut outcomes,
                    &mut pending,
                );
            }
            Some(Err(join_error)) => {
                if join_error.is_cancelled() {
                    continue;
                }
                return Err(EngineError::Internal {
                    message: format!("derivation task aborted: {join_error}"),
                });
            }
            None => {
                return Err(EngineError::Internal {
                    message: "pass stalled with unresolved candidates".to_string(),
                });
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(EngineError::cancelled(pass_label));
    }

    // Step 6: commit parameters and artifacts as one batch. Write locks
    // are held only here, never during recomputation.
    let now = Utc::now();
    let mut summary = PassSummary {
        pass_id,
        ..PassSummary::default()
    };
    let mut events: Vec<EventPayload> = Vec::new();
    {
        let mut store = inner.store.write();
        let mut ledger = inner.ledger.write();
        if let Some(req) = request {
            store.commit_change(req, &new_revisions)?;
        }
        for id in &order {
            match outcomes.get(id) {
                Some(Resolution::Computed) => {
                    let staged_value = staged.remove(id).ok_or_else(|| EngineError::Internal {
                        message: format!("staged value missing for '{id}'"),
                    })?;
                    let committed = ledger.commit_value(
                        id,
                        staged_value.value,
                        staged_value.provenance.clone(),
                        now,
                    )?;
                    debug_assert_eq!(committed, staged_value.revision);
                    events.push(EventPayload::ArtifactUpdated {
                        artifact_id: id.clone(),
                        kind: plan_node(&plan, id)?.kind,
                        revision: committed,
                        provenance: staged_value.provenance,
                    });
                    summary.recomputed.push(id.clone());
                }
                Some(Resolution::Skipped) => summary.skipped.push(id.clone()),
                Some(Resolution::Failed(reason)) => {
                    ledger.record_failure(id, reason.clone())?;
                    events.push(EventPayload::ArtifactFailed {
                        artifact_id: id.clone(),
                        kind: plan_node(&plan, id)?.kind,
                        reason: reason.clone(),
                    });
                    summary.failed.push(id.clone());
                }
                Some(Resolution::Blocked) => {
                    // A blocked artifact was not recomputed; whether it is
                    // actually stale depends on which of its inputs made it
                    // into this commit. If only the failed branch feeds it,
                    // nothing advanced and it stays current.
                    let node = plan_node(&plan, id)?;
                    let store_ref = &*store;
                    let ledger_ref = &*ledger;
                    let stale = invalidation::is_stale(
                        node.has_value,
                        &node.provenance,
                        &node.inputs,
                        |input| match input {
                            NodeId::Parameter(p) => {
                                store_ref.read(p).ok().map(|(_, r)| r)
                            }
                            NodeId::Artifact(a) => ledger_ref
                                .try_get(a)
                                .filter(|s| s.value.is_some())
                                .map(|s| s.revision),
                        },
                    );
                    if stale {
                        ledger.mark_stale(id)?;
                    }
                    summary.blocked.push(id.clone());
                }
                None => {
                    return Err(EngineError::Internal {
                        message: format!("candidate '{id}' never resolved"),
                    });
                }
            }
        }
    }
    inner.meta.write().modified = now;

    // Subscribers are notified only after the batch is visible, so an
    // immediate query never races the event.
    inner.gateway.publish(&events);

    info!(
        pass = pass_id,
        recomputed = summary.recomputed.len(),
        skipped = summary.skipped.len(),
        failed = summary.failed.len(),
        blocked = summary.blocked.len(),
        "pass committed"
    );
    Ok((new_revisions, summary))
}

fn plan_node<'a>(
    plan: &'a HashMap<ArtifactId, PlanNode>,
    id: &ArtifactId,
) -> EngineResult<&'a PlanNode> {
    plan.get(id).ok_or_else(|| EngineError::Internal {
        message: format!("candidate '{id}' missing from pass plan"),
    })
}

/// Record a resolution and release the consumers waiting on it.
#[allow(clippy::too_many_arguments)]
fn settle(
    id: &ArtifactId,
    resolution: Resolution,
    consumers_in: &HashMap<ArtifactId, Vec<ArtifactId>>,
    waiting: &mut HashMap<ArtifactId, usize>,
    ready: &mut VecDeque<ArtifactId>,
    upstream_bad: &mut HashSet<ArtifactId>,
    outcomes: &mut HashMap<ArtifactId, Resolution>,
    pending: &mut usize,
) {
    if matches!(resolution, Resolution::Failed(_) | Resolution::Blocked) {
        upstream_bad.insert(id.clone());
    }
    outcomes.insert(id.clone(), resolution);
    *pending -= 1;

    if let Some(consumers) = consumers_in.get(id) {
        for consumer in consumers {
            if let Some(count) = waiting.get_mut(consumer) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(consumer.clone());
                }
            }
        }
    }
}
