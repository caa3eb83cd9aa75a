//! # basis_core - Design Data Distribution & Incremental Derivation Engine
//!
//! `basis_core` keeps one authoritative body of engineering design data
//! (geometry, material properties, operating conditions, load cases)
//! consistent with every document derived from it. Calculations, templates,
//! drawings, and reports are registered as pluggable derivation functions
//! over shared parameters; when a parameter changes, the engine recomputes
//! exactly the stale artifacts, in dependency order, and commits the result
//! as one atomic batch with full provenance.
//!
//! ## Design Philosophy
//!
//! - **Revisioned, never mutated in place**: every accepted write advances
//!   a monotonic revision; artifacts record the exact input revisions they
//!   were derived from
//! - **Staleness by provenance**: an artifact is stale iff an input has
//!   moved past its recorded provenance - nothing else is trusted
//! - **Serialized passes, parallel branches**: one pass at a time against
//!   the shared graph, with independent branches deriving concurrently
//! - **JSON-First**: all public types implement Serialize/Deserialize
//! - **Rich Errors**: structured error types, not just strings
//!
//! ## Quick Start
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
//!
//! engine
//!     .register_parameter("pipeDiameter", ParamValue::Number(10.0), "j.smith", Discipline::Systems)
//!     .await?;
//!
//! engine
//!     .register_artifact(
//!         ArtifactSpec::new(
//!             "stressCalc",
//!             ArtifactKind::Calculation,
//!             derivation_fn(|inputs| async move {
//!                 Ok(ParamValue::Number(inputs.number("pipeDiameter")? * 981.0))
//!             }),
//!         )
//!         .with_title("Pipe Stress Summary")
//!         .for_discipline(Discipline::PipingStress)
//!         .reads_parameter("pipeDiameter"),
//!     )
//!     .await?;
//! engine.refresh().await?;
//!
//! let outcome = engine
//!     .submit_change(
//!         ChangeRequest::new("t.nguyen", Discipline::PipingStress)
//!             .with_write("pipeDiameter", Revision(1), ParamValue::Number(12.0)),
//!     )
//!     .await?;
//! assert!(outcome.pass.is_clean());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`engine`] - The engine facade: registration, change submission, queries
//! - [`store`] - Versioned parameter storage with optimistic concurrency
//! - [`graph`] - Dependency graph with cycle rejection and topological order
//! - [`derivation`] - Derivation functions and the artifact registry
//! - [`artifact`] - Artifact states, provenance vectors, the ledger
//! - [`gateway`] - Subscriptions with bounded buffers and resync
//! - [`change`] - Change requests and pass summaries
//! - [`space`] - Design space snapshots, metadata, settings
//! - [`value`] - Typed values, revisions, identifiers
//! - [`errors`] - Structured error types
//! - [`file_io`] - Snapshot files with atomic saves and locking

pub mod artifact;
pub mod change;
pub mod derivation;
pub mod engine;
pub mod errors;
pub mod file_io;
pub mod gateway;
pub mod graph;
pub mod space;
pub mod store;
pub mod value;

// Re-export commonly used types at crate root for convenience
pub use artifact::{ArtifactState, ArtifactStatus, ProvenanceVector};
pub use change::{ChangeOutcome, ChangeRequest, PassSummary};
pub use derivation::registry::{ArtifactKind, ArtifactSpec};
pub use derivation::{derivation_fn, Derivation, DerivationInputs};
pub use engine::Engine;
pub use errors::{EngineError, EngineResult};
pub use file_io::{load_space, save_space, FileLock};
pub use gateway::{EventPayload, Subscription, SubscriptionEvent};
pub use space::{DesignSpace, Discipline, GlobalSettings};
pub use value::{ArtifactId, NodeId, ParamId, ParamValue, Revision};
