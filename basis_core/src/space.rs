//! # Design Space Container
//!
//! The `DesignSpace` struct is the serializable snapshot of an engine:
//! metadata, settings, every parameter with its retained history, and every
//! artifact with its provenance. Spaces serialize to `.dbs` files as
//! human-readable JSON.
//!
//! ## Structure
//!
//! ```text
//! DesignSpace
//! ├── meta: SpaceMetadata (version, lead engineer, job info, timestamps)
//! ├── settings: GlobalSettings (retention, subscriber buffering)
//! ├── parameters: Vec<ParameterEntry> (shared design data)
//! └── artifacts: Vec<ArtifactState> (derived values with provenance)
//! ```
//!
//! Derivation functions are code, not data: a restored space re-registers
//! its artifact specs, and restored artifact states are re-checked for
//! staleness against the restored parameter revisions.
//!
//! ## Example
//!
//! ```rust
//! use basis_core::space::DesignSpace;
//!
//! let space = DesignSpace::new("Jane Engineer", "25-042", "Unit 2 Aux Building");
//!
//! // Serialize to JSON for storage or transmission
//! let json = serde_json::to_string_pretty(&space).unwrap();
//! # let _ = json;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactState;
use crate::store::ParameterEntry;

/// Current schema version for .dbs files
pub const SCHEMA_VERSION: &str = "0.1.0";

/// Serializable snapshot of the whole design space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignSpace {
    /// Space metadata (version, engineer, job info)
    pub meta: SpaceMetadata,

    /// Global settings (retention, buffering)
    pub settings: GlobalSettings,

    /// All shared parameters with retained history
    pub parameters: Vec<ParameterEntry>,

    /// All derived artifact states with provenance
    pub artifacts: Vec<ArtifactState>,
}

impl DesignSpace {
    /// Create a new empty design space.
    ///
    /// # Arguments
    ///
    /// * `lead_engineer` - Name of the responsible engineer
    /// * `job_id` - Job/project number (e.g., "25-001")
    /// * `facility` - Plant, unit, or system the design data belongs to
    pub fn new(
        lead_engineer: impl Into<String>,
        job_id: impl Into<String>,
        facility: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        DesignSpace {
            meta: SpaceMetadata {
                version: SCHEMA_VERSION.to_string(),
                lead_engineer: lead_engineer.into(),
                job_id: job_id.into(),
                facility: facility.into(),
                created: now,
                modified: now,
            },
            settings: GlobalSettings::default(),
            parameters: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    /// Update the modified timestamp.
    pub fn touch(&mut self) {
        self.meta.modified = Utc::now();
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }
}

impl Default for DesignSpace {
    fn default() -> Self {
        DesignSpace::new("", "", "")
    }
}

/// Space metadata stored in the file header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceMetadata {
    /// Schema version (for migration compatibility)
    pub version: String,

    /// Name of the responsible engineer
    pub lead_engineer: String,

    /// Job/project number
    pub job_id: String,

    /// Plant, unit, or system designation
    pub facility: String,

    /// When the space was created
    pub created: DateTime<Utc>,

    /// When the space was last modified
    pub modified: DateTime<Utc>,
}

/// Global engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Historical revisions retained per parameter for provenance replay.
    /// Older revisions are pruned; `read_at` on a pruned revision fails.
    pub revision_retention: usize,

    /// Per-subscriber event buffer capacity. A subscriber that falls this
    /// far behind is switched to a resync signal instead of queueing
    /// without bound.
    pub subscriber_buffer: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        GlobalSettings {
            revision_retention: 32,
            subscriber_buffer: 64,
        }
    }
}

/// Downstream engineering discipline consuming (and editing) shared data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Discipline {
    /// Piping stress analysis
    PipingStress,
    /// Thermal-hydraulic analysis
    ThermalHydraulic,
    /// Drafting / drawing production
    Drafting,
    /// Plant simulator data
    Simulator,
    /// Systems engineering (owns most shared inputs)
    Systems,
}

impl Discipline {
    /// Display name for document headers
    pub fn display_name(&self) -> &'static str {
        match self {
            Discipline::PipingStress => "Piping Stress",
            Discipline::ThermalHydraulic => "Thermal-Hydraulic",
            Discipline::Drafting => "Drafting",
            Discipline::Simulator => "Simulator",
            Discipline::Systems => "Systems",
        }
    }

    /// Short code used in document numbers (e.g., "PS-1042")
    pub fn code(&self) -> &'static str {
        match self {
            Discipline::PipingStress => "PS",
            Discipline::ThermalHydraulic => "TH",
            Discipline::Drafting => "DR",
            Discipline::Simulator => "SIM",
            Discipline::Systems => "SYS",
        }
    }
}

impl Default for Discipline {
    fn default() -> Self {
        Discipline::Systems
    }
}
