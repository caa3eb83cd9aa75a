//! # Derivation Registry
//!
//! Catalog of every registered artifact: its kind, its declared input set,
//! and the derivation function that produces it. The dependency graph is
//! built from this catalog at startup and maintained as artifacts come and
//! go at runtime.
//!
//! ## Usage
//!
//! ```rust
//! use basis_core::derivation::registry::{ArtifactKind, ArtifactSpec};
//! use basis_core::derivation::derivation_fn;
//! use basis_core::space::Discipline;
//! use basis_core::value::ParamValue;
//!
//! let spec = ArtifactSpec::new(
//!     "stressCalc",
//!     ArtifactKind::Calculation,
//!     derivation_fn(|inputs| async move {
//!         Ok(ParamValue::Number(inputs.number("pipeDiameter")? * 100.0))
//!     }),
//! )
//! .with_title("Pipe Stress Summary")
//! .for_discipline(Discipline::PipingStress)
//! .reads_parameter("pipeDiameter");
//!
//! assert_eq!(spec.inputs.len(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::derivation::Derivation;
use crate::errors::{EngineError, EngineResult};
use crate::space::Discipline;
use crate::value::{validate_identifier, ArtifactId, NodeId};

// ============================================================================
// Artifact Kinds
// ============================================================================

/// The document classes the engine derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Engineering calculation (stress, hydraulic, sizing)
    Calculation,
    /// Document template populated from shared data (coversheets, forms)
    Template,
    /// Drawing (isometrics, stress contours)
    Drawing,
    /// Assembled report combining other artifacts
    Report,
}

impl ArtifactKind {
    /// Display name for client-facing views
    pub fn display_name(&self) -> &'static str {
        match self {
            ArtifactKind::Calculation => "Calculation",
            ArtifactKind::Template => "Template",
            ArtifactKind::Drawing => "Drawing",
            ArtifactKind::Report => "Report",
        }
    }

    /// Short code used in document numbers (e.g., "CALC-1042")
    pub fn code(&self) -> &'static str {
        match self {
            ArtifactKind::Calculation => "CALC",
            ArtifactKind::Template => "TMPL",
            ArtifactKind::Drawing => "DWG",
            ArtifactKind::Report => "RPT",
        }
    }

    /// Sort order for listings (calculations first: everything else is
    /// usually derived from them)
    pub fn sort_order(&self) -> u8 {
        match self {
            ArtifactKind::Calculation => 1,
            ArtifactKind::Template => 2,
            ArtifactKind::Drawing => 3,
            ArtifactKind::Report => 4,
        }
    }
}

/// All artifact kinds (for iteration)
pub static ALL_KINDS: &[ArtifactKind] = &[
    ArtifactKind::Calculation,
    ArtifactKind::Template,
    ArtifactKind::Drawing,
    ArtifactKind::Report,
];

// ============================================================================
// Artifact Specs
// ============================================================================

/// Registration record for one artifact: identity, declared inputs, and
/// the derivation producing it.
#[derive(Clone)]
pub struct ArtifactSpec {
    pub id: ArtifactId,
    pub kind: ArtifactKind,

    /// Human title for document headers
    pub title: String,

    /// Discipline that owns (and may retire) this artifact
    pub discipline: Discipline,

    /// Declared input set, in declaration order. The derivation only ever
    /// sees these inputs.
    pub inputs: Vec<NodeId>,

    /// The computation behind this artifact
    pub derivation: Arc<dyn Derivation>,
}

impl ArtifactSpec {
    pub fn new(
        id: impl Into<ArtifactId>,
        kind: ArtifactKind,
        derivation: Arc<dyn Derivation>,
    ) -> Self {
        let id = id.into();
        let title = id.as_str().to_string();
        ArtifactSpec {
            id,
            kind,
            title,
            discipline: Discipline::default(),
            inputs: Vec::new(),
            derivation,
        }
    }

    /// Set the document title (builder style).
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the owning discipline (builder style).
    pub fn for_discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }

    /// Declare a parameter input (builder style).
    pub fn reads_parameter(mut self, id: &str) -> Self {
        self.inputs.push(NodeId::parameter(id));
        self
    }

    /// Declare an upstream artifact input (builder style).
    pub fn reads_artifact(mut self, id: &str) -> Self {
        self.inputs.push(NodeId::artifact(id));
        self
    }

    /// Structural validation: well-formed id, at least one input, no
    /// duplicate inputs.
    pub fn validate(&self) -> EngineResult<()> {
        validate_identifier("artifactId", self.id.as_str())?;
        if self.inputs.is_empty() {
            return Err(EngineError::invalid_input(
                "inputs",
                "[]",
                "An artifact must declare at least one input",
            ));
        }
        for (i, input) in self.inputs.iter().enumerate() {
            if self.inputs[..i].contains(input) {
                return Err(EngineError::invalid_input(
                    "inputs",
                    input.as_str(),
                    "Duplicate declared input",
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ArtifactSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactSpec")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("title", &self.title)
            .field("discipline", &self.discipline)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// All registered artifact specs, in registration order.
#[derive(Debug, Clone, Default)]
pub struct DerivationRegistry {
    specs: HashMap<ArtifactId, ArtifactSpec>,
    order: Vec<ArtifactId>,
}

impl DerivationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spec. The engine performs reference and cycle validation
    /// before calling this; the registry only rejects duplicates.
    pub fn register(&mut self, spec: ArtifactSpec) -> EngineResult<()> {
        if self.specs.contains_key(&spec.id) {
            return Err(EngineError::invalid_input(
                "artifactId",
                spec.id.as_str(),
                "Artifact is already registered",
            ));
        }
        self.order.push(spec.id.clone());
        self.specs.insert(spec.id.clone(), spec);
        Ok(())
    }

    pub fn unregister(&mut self, id: &ArtifactId) -> EngineResult<ArtifactSpec> {
        let spec = self
            .specs
            .remove(id)
            .ok_or_else(|| EngineError::not_found(id.as_str(), "unknown artifact"))?;
        self.order.retain(|o| o != id);
        Ok(spec)
    }

    pub fn get(&self, id: &ArtifactId) -> EngineResult<&ArtifactSpec> {
        self.specs
            .get(id)
            .ok_or_else(|| EngineError::not_found(id.as_str(), "unknown artifact"))
    }

    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.specs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Specs in registration order.
    pub fn specs(&self) -> impl Iterator<Item = &ArtifactSpec> {
        self.order.iter().filter_map(|id| self.specs.get(id))
    }
}
