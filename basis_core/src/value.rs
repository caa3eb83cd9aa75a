//! # Value and Identifier Types
//!
//! Typed primitives shared by every component: parameter values, revision
//! numbers, and the identifier newtypes for parameters and artifacts.
//!
//! ## Design Philosophy
//!
//! We use simple newtype wrappers rather than raw strings and integers
//! because:
//! - Identifier mixups (parameter vs artifact) become compile errors
//! - JSON serialization stays clean (transparent wrappers)
//! - Minimal runtime overhead
//!
//! ## Example
//!
//! ```rust
//! use basis_core::value::{ParamId, ParamValue, Revision};
//!
//! let id = ParamId::from("pipeDiameter");
//! let value = ParamValue::Number(10.0);
//! let rev = Revision::FIRST;
//! assert_eq!(rev.next(), Revision(2));
//! assert_eq!(value.as_number().unwrap(), 10.0);
//! # let _ = id;
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

// ============================================================================
// Revisions
// ============================================================================

/// Monotonically increasing revision number, scoped per parameter or
/// artifact. The first committed revision is 1; no two committed writes to
/// the same entity ever share a revision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// Revision assigned at registration time
    pub const FIRST: Revision = Revision(1);

    /// The revision a subsequent committed write would receive
    pub fn next(self) -> Revision {
        Revision(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Stable, globally unique identifier of a shared design parameter
/// (e.g., `"pipeDiameter"`).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParamId(pub String);

/// Stable, globally unique identifier of a derived artifact
/// (e.g., `"stressCalc"`).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

macro_rules! impl_id {
    ($name:ident) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

impl_id!(ParamId);
impl_id!(ArtifactId);

/// A node in the dependency graph: either a shared parameter (always a
/// producer) or a derived artifact (consumer, and possibly producer for
/// downstream artifacts).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum NodeId {
    Parameter(ParamId),
    Artifact(ArtifactId),
}

impl NodeId {
    pub fn parameter(id: impl Into<ParamId>) -> Self {
        NodeId::Parameter(id.into())
    }

    pub fn artifact(id: impl Into<ArtifactId>) -> Self {
        NodeId::Artifact(id.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeId::Parameter(p) => p.as_str(),
            NodeId::Artifact(a) => a.as_str(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Parameter(p) => write!(f, "parameter '{}'", p),
            NodeId::Artifact(a) => write!(f, "artifact '{}'", a),
        }
    }
}

// ============================================================================
// Parameter Values
// ============================================================================

/// A typed design value: the content of a parameter or of a derived
/// artifact.
///
/// Records use `BTreeMap` so the serialized form is deterministic, which
/// keeps derivations reproducible byte-for-byte.
///
/// ## JSON Example
///
/// ```json
/// { "type": "Record", "value": {
///     "od_in": { "type": "Number", "value": 10.75 },
///     "schedule": { "type": "Text", "value": "40S" }
/// }}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ParamValue {
    /// Floating-point quantity (dimensions, pressures, temperatures)
    Number(f64),
    /// Integral quantity (counts, node numbers)
    Integer(i64),
    /// Free text (labels, material designations, document fragments)
    Text(String),
    /// Boolean flag
    Flag(bool),
    /// Structured record with named fields
    Record(BTreeMap<String, ParamValue>),
    /// Ordered list of values
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Build a record from field pairs
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, ParamValue)>) -> Self {
        ParamValue::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of this value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Number(_) => "Number",
            ParamValue::Integer(_) => "Integer",
            ParamValue::Text(_) => "Text",
            ParamValue::Flag(_) => "Flag",
            ParamValue::Record(_) => "Record",
            ParamValue::List(_) => "List",
        }
    }

    /// Numeric view: accepts both `Number` and `Integer`
    pub fn as_number(&self) -> EngineResult<f64> {
        match self {
            ParamValue::Number(n) => Ok(*n),
            ParamValue::Integer(i) => Ok(*i as f64),
            other => Err(type_error("Number", other)),
        }
    }

    pub fn as_integer(&self) -> EngineResult<i64> {
        match self {
            ParamValue::Integer(i) => Ok(*i),
            other => Err(type_error("Integer", other)),
        }
    }

    pub fn as_text(&self) -> EngineResult<&str> {
        match self {
            ParamValue::Text(s) => Ok(s),
            other => Err(type_error("Text", other)),
        }
    }

    pub fn as_flag(&self) -> EngineResult<bool> {
        match self {
            ParamValue::Flag(b) => Ok(*b),
            other => Err(type_error("Flag", other)),
        }
    }

    pub fn as_record(&self) -> EngineResult<&BTreeMap<String, ParamValue>> {
        match self {
            ParamValue::Record(r) => Ok(r),
            other => Err(type_error("Record", other)),
        }
    }

    pub fn as_list(&self) -> EngineResult<&[ParamValue]> {
        match self {
            ParamValue::List(l) => Ok(l),
            other => Err(type_error("List", other)),
        }
    }

    /// Fetch a named field from a record value
    pub fn field(&self, name: &str) -> EngineResult<&ParamValue> {
        self.as_record()?
            .get(name)
            .ok_or_else(|| EngineError::missing_field(name))
    }
}

fn type_error(expected: &str, got: &ParamValue) -> EngineError {
    EngineError::invalid_input(
        "value",
        got.type_name(),
        format!("expected {}", expected),
    )
}

/// Validate an identifier string: non-empty, no whitespace or path
/// separators, so ids stay usable as map keys and file name fragments.
pub fn validate_identifier(field: &str, id: &str) -> EngineResult<()> {
    if id.is_empty() {
        return Err(EngineError::invalid_input(field, id, "Identifier is empty"));
    }
    if id.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
        return Err(EngineError::invalid_input(
            field,
            id,
            "Identifier must not contain whitespace or path separators",
        ));
    }
    Ok(())
}
