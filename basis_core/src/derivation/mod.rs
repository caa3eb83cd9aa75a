//! # Derivation Functions
//!
//! A derivation function is the pluggable computation behind an artifact:
//! a pure mapping from a fixed set of input values to the artifact's value.
//! The engine supplies each run with a [`DerivationInputs`] snapshot (the
//! input values *and* the revisions they were read at) and stamps the
//! resulting artifact with exactly those revisions as its provenance.
//!
//! ## Contract
//!
//! Derivations must be deterministic and side-effect free: given the same
//! input revisions they must produce the same value, or provenance-based
//! invalidation is unsound. They may await external resources (a
//! sub-calculation service, a meshing job); the scheduler runs each
//! derivation as its own task, so one blocked derivation never stalls an
//! independent branch.
//!
//! ## Example
//!
//! ```rust
//! use basis_core::derivation::{derivation_fn, DerivationInputs};
//! use basis_core::value::ParamValue;
//!
//! // Hoop stress from Barlow's formula: s = P*D / (2*t)
//! let hoop_stress = derivation_fn(|inputs: DerivationInputs| async move {
//!     let p = inputs.number("designPressure")?;
//!     let d = inputs.number("pipeDiameter")?;
//!     let t = inputs.number("wallThickness")?;
//!     Ok(ParamValue::Number(p * d / (2.0 * t)))
//! });
//! # let _ = hoop_stress;
//! ```

pub mod registry;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::ProvenanceVector;
use crate::errors::{EngineError, EngineResult};
use crate::value::{NodeId, ParamValue, Revision};

/// A pure computation producing an artifact's value from its inputs.
#[async_trait]
pub trait Derivation: Send + Sync {
    async fn derive(&self, inputs: DerivationInputs) -> EngineResult<ParamValue>;
}

/// One input value pinned at the revision it was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    pub value: ParamValue,
    pub revision: Revision,
}

/// The frozen input set handed to one derivation run.
///
/// Values for upstream artifacts recomputed earlier in the same pass are
/// the just-produced ones, so a single pass never mixes old and new inputs
/// within one derivation.
#[derive(Debug, Clone, Default)]
pub struct DerivationInputs {
    samples: BTreeMap<NodeId, InputSample>,
}

impl DerivationInputs {
    pub fn new(samples: BTreeMap<NodeId, InputSample>) -> Self {
        DerivationInputs { samples }
    }

    /// The value of any input node.
    pub fn value(&self, input: &NodeId) -> EngineResult<&ParamValue> {
        self.samples
            .get(input)
            .map(|s| &s.value)
            .ok_or_else(|| EngineError::missing_field(input.as_str()))
    }

    /// The value of a parameter input.
    pub fn parameter(&self, id: &str) -> EngineResult<&ParamValue> {
        self.value(&NodeId::parameter(id))
    }

    /// The value of an upstream artifact input.
    pub fn artifact(&self, id: &str) -> EngineResult<&ParamValue> {
        self.value(&NodeId::artifact(id))
    }

    /// Numeric view of a parameter input.
    pub fn number(&self, id: &str) -> EngineResult<f64> {
        self.parameter(id)?.as_number()
    }

    /// Text view of a parameter input.
    pub fn text(&self, id: &str) -> EngineResult<&str> {
        self.parameter(id)?.as_text()
    }

    /// The revision an input was read at.
    pub fn revision_of(&self, input: &NodeId) -> EngineResult<Revision> {
        self.samples
            .get(input)
            .map(|s| s.revision)
            .ok_or_else(|| EngineError::missing_field(input.as_str()))
    }

    /// The provenance vector these inputs pin: exactly what the engine
    /// stamps on the artifact when the derivation commits.
    pub fn provenance(&self) -> ProvenanceVector {
        let mut provenance = ProvenanceVector::new();
        for (node, sample) in &self.samples {
            provenance.record(node, sample.revision);
        }
        provenance
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Adapter turning an async closure into a [`Derivation`].
pub struct FnDerivation<F>(F);

#[async_trait]
impl<F, Fut> Derivation for FnDerivation<F>
where
    F: Fn(DerivationInputs) -> Fut + Send + Sync,
    Fut: Future<Output = EngineResult<ParamValue>> + Send,
{
    async fn derive(&self, inputs: DerivationInputs) -> EngineResult<ParamValue> {
        (self.0)(inputs).await
    }
}

/// Wrap an async closure as a shareable derivation function.
pub fn derivation_fn<F, Fut>(f: F) -> Arc<dyn Derivation>
where
    F: Fn(DerivationInputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<ParamValue>> + Send + 'static,
{
    Arc::new(FnDerivation(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inputs() -> DerivationInputs {
        let mut samples = BTreeMap::new();
        samples.insert(
            NodeId::parameter("pipeDiameter"),
            InputSample {
                value: ParamValue::Number(10.75),
                revision: Revision(2),
            },
        );
        samples.insert(
            NodeId::artifact("stressCalc"),
            InputSample {
                value: ParamValue::Number(9810.0),
                revision: Revision(5),
            },
        );
        DerivationInputs::new(samples)
    }

    #[test]
    fn test_typed_accessors() {
        let inputs = sample_inputs();
        assert_eq!(inputs.number("pipeDiameter").unwrap(), 10.75);
        assert_eq!(
            inputs.artifact("stressCalc").unwrap().as_number().unwrap(),
            9810.0
        );
        assert_eq!(
            inputs.number("missing").unwrap_err().error_code(),
            "MISSING_FIELD"
        );
    }

    #[test]
    fn test_provenance_mirrors_samples() {
        let inputs = sample_inputs();
        let provenance = inputs.provenance();
        assert_eq!(
            provenance.revision_of(&NodeId::parameter("pipeDiameter")),
            Some(Revision(2))
        );
        assert_eq!(
            provenance.revision_of(&NodeId::artifact("stressCalc")),
            Some(Revision(5))
        );
        assert_eq!(provenance.len(), 2);
    }

    #[tokio::test]
    async fn test_closure_derivation_runs() {
        let double = derivation_fn(|inputs: DerivationInputs| async move {
            Ok(ParamValue::Number(inputs.number("pipeDiameter")? * 2.0))
        });
        let result = double.derive(sample_inputs()).await.unwrap();
        assert_eq!(result, ParamValue::Number(21.5));
    }
}
