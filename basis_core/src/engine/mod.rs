//! # Derivation Engine
//!
//! The engine ties the shared pieces together: the parameter store, the
//! dependency graph, the derivation registry, the artifact ledger, and the
//! distribution gateway. Clients interact with it through four doors:
//!
//! - **Registration**: parameters and artifact specs enter (and leave)
//!   through [`Engine::register_parameter`] / [`Engine::register_artifact`]
//!   and the retire methods. Structural validation (unknown references,
//!   cycles) happens here, never during a pass.
//! - **Change submission**: [`Engine::submit_change`] validates a change
//!   request, recomputes everything downstream, and commits parameters and
//!   artifacts as one atomic batch.
//! - **Queries**: [`Engine::get_latest`], [`Engine::read_parameter`] and
//!   [`Engine::read_parameter_at`] serve consistent committed state.
//! - **Subscriptions**: [`Engine::subscribe`] streams artifact updates per
//!   discipline client.
//!
//! Passes are serialized: at most one invalidation/recomputation pass is
//! in flight at a time, while derivations *within* a pass run in parallel
//! across independent branches.
//!
//! ## Example
//!
//! ```rust
//! use basis_core::change::ChangeRequest;
//! use basis_core::derivation::derivation_fn;
//! use basis_core::derivation::registry::{ArtifactKind, ArtifactSpec};
//! use basis_core::engine::Engine;
//! use basis_core::space::Discipline;
//! use basis_core::value::{ParamValue, Revision};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> basis_core::errors::EngineResult<()> {
//! let engine = Engine::new("Jane Engineer", "25-042", "Aux Feedwater");
//! engine
//!     .register_parameter("pipeDiameter", ParamValue::Number(10.0), "j.smith", Discipline::Systems)
//!     .await?;
//! engine
//!     .register_artifact(
//!         ArtifactSpec::new(
//!             "stressCalc",
//!             ArtifactKind::Calculation,
//!             derivation_fn(|inputs| async move {
//!                 Ok(ParamValue::Number(inputs.number("pipeDiameter")? * 981.0))
//!             }),
//!         )
//!         .reads_parameter("pipeDiameter"),
//!     )
//!     .await?;
//! engine.refresh().await?;
//!
//! let request = ChangeRequest::new("t.nguyen", Discipline::PipingStress)
//!     .with_write("pipeDiameter", Revision(1), ParamValue::Number(12.0));
//! let outcome = engine.submit_change(request).await?;
//! assert_eq!(outcome.pass.recomputed.len(), 1);
//! # Ok(())
//! # }
//! ```

pub(crate) mod invalidation;
mod scheduler;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::artifact::{ArtifactLedger, ArtifactState, ArtifactStatus};
use crate::change::{ChangeOutcome, ChangeRequest, PassSummary};
use crate::derivation::registry::{ArtifactKind, ArtifactSpec, DerivationRegistry};
use crate::errors::{EngineError, EngineResult};
use crate::gateway::{Gateway, Subscription};
use crate::graph::DependencyGraph;
use crate::space::{DesignSpace, Discipline, GlobalSettings, SpaceMetadata};
use crate::store::ParameterStore;
use crate::value::{ArtifactId, NodeId, ParamId, ParamValue, Revision};

pub(crate) struct EngineInner {
    pub(crate) store: RwLock<ParameterStore>,
    pub(crate) graph: RwLock<DependencyGraph>,
    pub(crate) registry: RwLock<DerivationRegistry>,
    pub(crate) ledger: RwLock<ArtifactLedger>,
    pub(crate) gateway: Gateway,

    /// Serializes passes and structural mutations. Fair, so requests are
    /// served in submission order.
    pub(crate) pass_gate: Mutex<()>,
    pub(crate) pass_counter: AtomicU64,

    pub(crate) meta: RwLock<SpaceMetadata>,
    pub(crate) settings: GlobalSettings,
}

/// The design data distribution and incremental derivation engine.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an empty engine with default settings.
    pub fn new(
        lead_engineer: impl Into<String>,
        job_id: impl Into<String>,
        facility: impl Into<String>,
    ) -> Self {
        Engine::from_space(DesignSpace::new(lead_engineer, job_id, facility))
    }

    /// Rebuild an engine from a snapshot.
    ///
    /// Parameter history and artifact states (values, provenance, failure
    /// markers) are restored as-is. Derivation functions are code, not
    /// data: artifact specs must be re-registered, which re-evaluates each
    /// restored state for staleness against the restored revisions.
    pub fn from_space(space: DesignSpace) -> Self {
        let settings = space.settings.clone();
        Engine {
            inner: Arc::new(EngineInner {
                store: RwLock::new(ParameterStore::from_entries(
                    space.parameters,
                    settings.revision_retention,
                )),
                graph: RwLock::new(DependencyGraph::new()),
                registry: RwLock::new(DerivationRegistry::new()),
                ledger: RwLock::new(ArtifactLedger::from_states(space.artifacts)),
                gateway: Gateway::new(settings.subscriber_buffer),
                pass_gate: Mutex::new(()),
                pass_counter: AtomicU64::new(0),
                meta: RwLock::new(space.meta),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.inner.settings
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a shared parameter at its first revision.
    pub async fn register_parameter(
        &self,
        id: impl Into<ParamId>,
        value: ParamValue,
        author: impl Into<String>,
        discipline: Discipline,
    ) -> EngineResult<Revision> {
        let _gate = self.inner.pass_gate.lock().await;
        let revision = self
            .inner
            .store
            .write()
            .register(id, value, author, discipline)?;
        self.inner.meta.write().modified = Utc::now();
        Ok(revision)
    }

    /// Register an artifact: validate its references, insert its edges
    /// (cycle-checked), and create its ledger entry.
    ///
    /// The new artifact starts stale and derives its first value on the
    /// next [`refresh`](Engine::refresh) or on the first change touching
    /// its inputs. If the ledger already holds a restored state for this
    /// id (snapshot load), that state is kept and re-evaluated for
    /// staleness instead of being reset.
    pub async fn register_artifact(&self, spec: ArtifactSpec) -> EngineResult<()> {
        spec.validate()?;
        let _gate = self.inner.pass_gate.lock().await;

        {
            let store = self.inner.store.read();
            let registry = self.inner.registry.read();
            if registry.contains(&spec.id) {
                return Err(EngineError::invalid_input(
                    "artifactId",
                    spec.id.as_str(),
                    "Artifact is already registered",
                ));
            }
            for input in &spec.inputs {
                let known = match input {
                    NodeId::Parameter(p) => store.contains(p),
                    NodeId::Artifact(a) => registry.contains(a),
                };
                if !known {
                    return Err(EngineError::not_found(
                        input.as_str(),
                        format!("unknown {} referenced by '{}'", kind_word(input), spec.id),
                    ));
                }
            }
        }

        // The cycle check is the last gate; the graph stays untouched on
        // rejection.
        self.inner.graph.write().add_artifact(&spec.id, &spec.inputs)?;

        {
            let store = self.inner.store.read();
            let mut ledger = self.inner.ledger.write();
            if ledger.contains(&spec.id) {
                let (has_value, provenance) = {
                    let state = ledger.get(&spec.id)?;
                    (state.value.is_some(), state.provenance.clone())
                };
                let stale = invalidation::is_stale(
                    has_value,
                    &provenance,
                    &spec.inputs,
                    |input| match input {
                        NodeId::Parameter(p) => store.read(p).ok().map(|(_, r)| r),
                        NodeId::Artifact(a) => ledger
                            .try_get(a)
                            .filter(|s| s.value.is_some())
                            .map(|s| s.revision),
                    },
                );
                let state = ledger.get_mut(&spec.id).ok_or_else(|| EngineError::Internal {
                    message: format!("ledger lost state for '{}' during registration", spec.id),
                })?;
                state.kind = spec.kind;
                state.title = spec.title.clone();
                state.discipline = spec.discipline;
                if !state.status.is_failed() {
                    state.status = if stale {
                        ArtifactStatus::Stale
                    } else {
                        ArtifactStatus::Current
                    };
                }
            } else {
                ledger.insert(ArtifactState::new(
                    spec.id.clone(),
                    spec.kind,
                    spec.title.clone(),
                    spec.discipline,
                ));
            }
        }

        debug!(artifact = %spec.id, kind = spec.kind.code(), "artifact registered");
        self.inner.registry.write().register(spec)?;
        self.inner.meta.write().modified = Utc::now();
        Ok(())
    }

    /// Withdraw an artifact. Fails while other artifacts still consume it:
    /// dependents must be retired first.
    pub async fn retire_artifact(&self, id: &ArtifactId) -> EngineResult<ArtifactState> {
        let _gate = self.inner.pass_gate.lock().await;
        self.inner.graph.write().remove_artifact(id)?;
        self.inner.registry.write().unregister(id)?;
        let state = self.inner.ledger.write().remove(id)?;
        self.inner.meta.write().modified = Utc::now();
        Ok(state)
    }

    /// Remove a parameter. Fails while any artifact still declares it as
    /// an input.
    pub async fn retire_parameter(&self, id: &ParamId) -> EngineResult<()> {
        let _gate = self.inner.pass_gate.lock().await;
        let node = NodeId::Parameter(id.clone());
        let dependents = self.inner.graph.read().dependents(&node).to_vec();
        if !dependents.is_empty() {
            let names: Vec<String> = dependents.iter().map(|d| d.as_str().to_string()).collect();
            return Err(EngineError::invalid_input(
                "parameterId",
                id.as_str(),
                format!("Still consumed by: {}", names.join(", ")),
            ));
        }
        self.inner.store.write().retire(id)?;
        self.inner.meta.write().modified = Utc::now();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Change submission & recomputation
    // ------------------------------------------------------------------

    /// Apply a change request and recompute everything downstream.
    ///
    /// The request is validated against its base revisions (all conflicts
    /// reported together), derivations run in parallel across independent
    /// branches, and the new parameter revisions plus every recomputed
    /// artifact commit as a single atomic batch before subscribers are
    /// notified.
    pub async fn submit_change(&self, request: ChangeRequest) -> EngineResult<ChangeOutcome> {
        self.submit_change_with_cancel(request, CancellationToken::new())
            .await
    }

    /// [`submit_change`](Engine::submit_change) with a withdrawal token.
    ///
    /// Cancelling the token before the final commit aborts in-flight
    /// derivations and leaves parameters and artifacts exactly as they
    /// were: staged results are discarded, nothing partial is visible.
    pub async fn submit_change_with_cancel(
        &self,
        request: ChangeRequest,
        cancel: CancellationToken,
    ) -> EngineResult<ChangeOutcome> {
        let request_id = request.request_id;
        let (new_revisions, pass) =
            scheduler::run_pass(&self.inner, Some(&request), &cancel).await?;
        Ok(ChangeOutcome {
            request_id,
            new_revisions,
            pass,
        })
    }

    /// Recompute every artifact currently behind its inputs (stale, failed,
    /// or never computed), without writing any parameter.
    pub async fn refresh(&self) -> EngineResult<PassSummary> {
        let (_, pass) =
            scheduler::run_pass(&self.inner, None, &CancellationToken::new()).await?;
        Ok(pass)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Latest committed state of an artifact: value, provenance vector,
    /// and status.
    pub fn get_latest(&self, id: &ArtifactId) -> EngineResult<ArtifactState> {
        self.inner.ledger.read().get(id).cloned()
    }

    /// Latest committed value and revision of a parameter.
    pub fn read_parameter(&self, id: &ParamId) -> EngineResult<(ParamValue, Revision)> {
        let store = self.inner.store.read();
        let (value, revision) = store.read(id)?;
        Ok((value.clone(), revision))
    }

    /// Historical parameter value for provenance replay.
    pub fn read_parameter_at(&self, id: &ParamId, revision: Revision) -> EngineResult<ParamValue> {
        self.inner.store.read().read_at(id, revision)
    }

    pub fn parameter_count(&self) -> usize {
        self.inner.store.read().len()
    }

    pub fn artifact_count(&self) -> usize {
        self.inner.ledger.read().len()
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe to artifact updates (empty kind list = all kinds).
    pub fn subscribe(&self, client_id: impl Into<String>, kinds: &[ArtifactKind]) -> Subscription {
        self.inner.gateway.subscribe(client_id, kinds)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Serializable snapshot of the whole design space.
    pub fn snapshot(&self) -> DesignSpace {
        DesignSpace {
            meta: self.inner.meta.read().clone(),
            settings: self.inner.settings.clone(),
            parameters: self.inner.store.read().entries(),
            artifacts: self.inner.ledger.read().states(),
        }
    }
}

fn kind_word(node: &NodeId) -> &'static str {
    match node {
        NodeId::Parameter(_) => "parameter",
        NodeId::Artifact(_) => "artifact",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivation::derivation_fn;

    fn passthrough(param: &str) -> ArtifactSpec {
        let name = param.to_string();
        ArtifactSpec::new(
            format!("{param}Echo"),
            ArtifactKind::Calculation,
            derivation_fn(move |inputs| {
                let name = name.clone();
                async move { Ok(inputs.parameter(&name)?.clone()) }
            }),
        )
        .reads_parameter(param)
    }

    #[tokio::test]
    async fn test_register_artifact_rejects_unknown_inputs() {
        let engine = Engine::new("eng", "25-001", "Unit 1");
        let err = engine.register_artifact(passthrough("pipeDiameter")).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_self_reference_rejected_at_registration() {
        let engine = Engine::new("eng", "25-001", "Unit 1");
        engine
            .register_parameter("pipeDiameter", ParamValue::Number(10.0), "eng", Discipline::Systems)
            .await
            .unwrap();
        engine.register_artifact(passthrough("pipeDiameter")).await.unwrap();

        let looped = ArtifactSpec::new(
            "loop",
            ArtifactKind::Report,
            derivation_fn(|_| async move { Ok(ParamValue::Flag(true)) }),
        )
        .reads_artifact("loop");
        // Self-reference: the artifact input named "loop" does not exist yet
        let err = engine.register_artifact(looped).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_retire_parameter_blocked_by_dependents() {
        let engine = Engine::new("eng", "25-001", "Unit 1");
        engine
            .register_parameter("pipeDiameter", ParamValue::Number(10.0), "eng", Discipline::Systems)
            .await
            .unwrap();
        engine.register_artifact(passthrough("pipeDiameter")).await.unwrap();

        let id = ParamId::from("pipeDiameter");
        let err = engine.retire_parameter(&id).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");

        engine.retire_artifact(&"pipeDiameterEcho".into()).await.unwrap();
        engine.retire_parameter(&id).await.unwrap();
        assert_eq!(engine.parameter_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_restore_keeps_artifact_state() {
        let engine = Engine::new("eng", "25-001", "Unit 1");
        engine
            .register_parameter("pipeDiameter", ParamValue::Number(10.0), "eng", Discipline::Systems)
            .await
            .unwrap();
        engine.register_artifact(passthrough("pipeDiameter")).await.unwrap();
        engine.refresh().await.unwrap();

        let snapshot = engine.snapshot();
        let restored = Engine::from_space(snapshot);
        // Ledger state is restored before specs are re-registered
        assert_eq!(restored.artifact_count(), 1);

        restored.register_artifact(passthrough("pipeDiameter")).await.unwrap();
        let state = restored.get_latest(&"pipeDiameterEcho".into()).unwrap();
        // Provenance still matches the restored revisions: not stale
        assert!(state.status.is_current());
        assert_eq!(state.value, Some(ParamValue::Number(10.0)));
    }
}
