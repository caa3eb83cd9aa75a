//! # Parameter Store
//!
//! Versioned storage for shared design parameters. Every accepted write
//! advances a strictly monotonic per-parameter revision, and a bounded ring
//! of historical values is retained for provenance replay.
//!
//! Mutation happens only through [`ChangeRequest`]s, validated against the
//! requester's base revisions (optimistic concurrency) and applied
//! all-or-nothing. Validation and commit are split so the engine can stage
//! an entire pass and swap it in atomically: `validate_change` computes the
//! would-be revisions without touching state; `commit_change` applies a
//! request the engine has already validated under its serialized pass.
//!
//! ## Example
//!
//! ```rust
//! use basis_core::change::ChangeRequest;
//! use basis_core::space::Discipline;
//! use basis_core::store::ParameterStore;
//! use basis_core::value::{ParamValue, Revision};
//!
//! let mut store = ParameterStore::new(32);
//! store.register("pipeDiameter", ParamValue::Number(10.0), "j.smith", Discipline::Systems)
//!     .unwrap();
//!
//! let request = ChangeRequest::new("t.nguyen", Discipline::PipingStress)
//!     .with_write("pipeDiameter", Revision(1), ParamValue::Number(12.0));
//! let new_revisions = store.validate_change(&request).unwrap();
//! store.commit_change(&request, &new_revisions).unwrap();
//!
//! let (value, revision) = store.read(&"pipeDiameter".into()).unwrap();
//! assert_eq!(revision, Revision(2));
//! assert_eq!(value.as_number().unwrap(), 12.0);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::ChangeRequest;
use crate::errors::{EngineError, EngineResult};
use crate::space::Discipline;
use crate::value::{validate_identifier, ParamId, ParamValue, Revision};

/// One superseded committed revision, retained for `read_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalValue {
    pub revision: Revision,
    pub value: ParamValue,
    pub modified_by: String,
    pub discipline: Discipline,
    pub modified_at: DateTime<Utc>,
}

/// A shared design parameter: current committed state plus retained history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub id: ParamId,
    pub value: ParamValue,
    pub revision: Revision,
    pub modified_by: String,
    pub discipline: Discipline,
    pub modified_at: DateTime<Utc>,

    /// Superseded revisions, oldest first, bounded by the retention setting
    history: VecDeque<HistoricalValue>,
}

impl ParameterEntry {
    /// Oldest revision still answerable by `read_at`
    pub fn oldest_retained(&self) -> Revision {
        self.history.front().map(|h| h.revision).unwrap_or(self.revision)
    }
}

/// Versioned store of all shared parameters.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    parameters: HashMap<ParamId, ParameterEntry>,
    retention: usize,
}

impl ParameterStore {
    /// Create an empty store retaining `retention` superseded revisions per
    /// parameter.
    pub fn new(retention: usize) -> Self {
        ParameterStore {
            parameters: HashMap::new(),
            retention,
        }
    }

    /// Rebuild a store from snapshot entries.
    pub fn from_entries(entries: Vec<ParameterEntry>, retention: usize) -> Self {
        let parameters = entries.into_iter().map(|e| (e.id.clone(), e)).collect();
        ParameterStore {
            parameters,
            retention,
        }
    }

    /// Register a new parameter at [`Revision::FIRST`].
    ///
    /// Parameters are created once; every later mutation goes through a
    /// change request.
    pub fn register(
        &mut self,
        id: impl Into<ParamId>,
        value: ParamValue,
        author: impl Into<String>,
        discipline: Discipline,
    ) -> EngineResult<Revision> {
        let id = id.into();
        validate_identifier("parameterId", id.as_str())?;
        if self.parameters.contains_key(&id) {
            return Err(EngineError::invalid_input(
                "parameterId",
                id.as_str(),
                "Parameter is already registered",
            ));
        }
        let entry = ParameterEntry {
            id: id.clone(),
            value,
            revision: Revision::FIRST,
            modified_by: author.into(),
            discipline,
            modified_at: Utc::now(),
            history: VecDeque::new(),
        };
        self.parameters.insert(id, entry);
        Ok(Revision::FIRST)
    }

    /// Latest committed value and revision.
    pub fn read(&self, id: &ParamId) -> EngineResult<(&ParamValue, Revision)> {
        let entry = self.entry(id)?;
        Ok((&entry.value, entry.revision))
    }

    /// Historical value for provenance replay.
    ///
    /// Fails with `NotFound` if the revision was pruned by the retention
    /// policy or has never been committed.
    pub fn read_at(&self, id: &ParamId, revision: Revision) -> EngineResult<ParamValue> {
        let entry = self.entry(id)?;
        if revision == entry.revision {
            return Ok(entry.value.clone());
        }
        if revision > entry.revision {
            return Err(EngineError::not_found(
                id.as_str(),
                format!("revision {} has not been committed (latest is {})", revision, entry.revision),
            ));
        }
        entry
            .history
            .iter()
            .find(|h| h.revision == revision)
            .map(|h| h.value.clone())
            .ok_or_else(|| {
                EngineError::not_found(
                    id.as_str(),
                    format!(
                        "revision {} was pruned by retention (oldest retained is {})",
                        revision,
                        entry.oldest_retained()
                    ),
                )
            })
    }

    /// Check a request against the committed state and compute the
    /// revisions its writes would receive. State is not touched.
    ///
    /// Every written parameter must exist, and every base revision must
    /// match the committed revision; all mismatches are reported together
    /// in one `Conflict` error.
    pub fn validate_change(
        &self,
        request: &ChangeRequest,
    ) -> EngineResult<BTreeMap<ParamId, Revision>> {
        request.validate()?;

        let mut conflicting = Vec::new();
        let mut new_revisions = BTreeMap::new();
        for (id, _) in &request.writes {
            let entry = self.entry(id)?;
            // validate() guarantees the base revision is present
            let base = request.base_revisions[id];
            if base != entry.revision {
                conflicting.push(id.as_str().to_string());
            } else {
                new_revisions.insert(id.clone(), entry.revision.next());
            }
        }
        if !conflicting.is_empty() {
            return Err(EngineError::conflict(conflicting));
        }
        Ok(new_revisions)
    }

    /// Apply a request previously validated with [`validate_change`].
    ///
    /// The engine serializes passes, so the committed state cannot have
    /// moved between validation and commit; a mismatch here indicates a
    /// caller bypassing the pass discipline and is reported as internal.
    pub fn commit_change(
        &mut self,
        request: &ChangeRequest,
        new_revisions: &BTreeMap<ParamId, Revision>,
    ) -> EngineResult<()> {
        // Re-check before mutating anything so a bad call cannot leave a
        // partially advanced store.
        for (id, new_revision) in new_revisions {
            let entry = self.entry(id)?;
            if entry.revision.next() != *new_revision {
                return Err(EngineError::Internal {
                    message: format!(
                        "commit of '{}' expected base {} but store is at {}",
                        id,
                        new_revision.0.saturating_sub(1),
                        entry.revision
                    ),
                });
            }
        }

        let now = Utc::now();
        for (id, value) in &request.writes {
            let retention = self.retention;
            let entry = self
                .parameters
                .get_mut(id)
                .ok_or_else(|| EngineError::not_found(id.as_str(), "unknown parameter"))?;
            let superseded = HistoricalValue {
                revision: entry.revision,
                value: std::mem::replace(&mut entry.value, value.clone()),
                modified_by: std::mem::replace(&mut entry.modified_by, request.requester.clone()),
                discipline: entry.discipline,
                modified_at: entry.modified_at,
            };
            entry.history.push_back(superseded);
            while entry.history.len() > retention {
                entry.history.pop_front();
            }
            entry.revision = new_revisions[id];
            entry.discipline = request.discipline;
            entry.modified_at = now;
        }
        Ok(())
    }

    /// Remove a parameter. The engine only calls this once no artifact
    /// depends on it.
    pub fn retire(&mut self, id: &ParamId) -> EngineResult<ParameterEntry> {
        self.parameters
            .remove(id)
            .ok_or_else(|| EngineError::not_found(id.as_str(), "unknown parameter"))
    }

    pub fn contains(&self, id: &ParamId) -> bool {
        self.parameters.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Entries sorted by id, for deterministic snapshots.
    pub fn entries(&self) -> Vec<ParameterEntry> {
        let mut entries: Vec<_> = self.parameters.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    pub fn get(&self, id: &ParamId) -> Option<&ParameterEntry> {
        self.parameters.get(id)
    }

    fn entry(&self, id: &ParamId) -> EngineResult<&ParameterEntry> {
        self.parameters
            .get(id)
            .ok_or_else(|| EngineError::not_found(id.as_str(), "unknown parameter"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_diameter() -> ParameterStore {
        let mut store = ParameterStore::new(4);
        store
            .register("pipeDiameter", ParamValue::Number(10.0), "j.smith", Discipline::Systems)
            .unwrap();
        store
    }

    fn write(store: &mut ParameterStore, id: &str, base: Revision, value: f64) -> EngineResult<Revision> {
        let request = ChangeRequest::new("test", Discipline::Systems).with_write(
            id,
            base,
            ParamValue::Number(value),
        );
        let revisions = store.validate_change(&request)?;
        store.commit_change(&request, &revisions)?;
        Ok(revisions[&ParamId::from(id)])
    }

    #[test]
    fn test_register_assigns_first_revision() {
        let store = store_with_diameter();
        let (value, revision) = store.read(&"pipeDiameter".into()).unwrap();
        assert_eq!(revision, Revision::FIRST);
        assert_eq!(value.as_number().unwrap(), 10.0);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut store = store_with_diameter();
        let err = store
            .register("pipeDiameter", ParamValue::Number(1.0), "x", Discipline::Systems)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_write_advances_revision() {
        let mut store = store_with_diameter();
        let r2 = write(&mut store, "pipeDiameter", Revision(1), 12.0).unwrap();
        assert_eq!(r2, Revision(2));

        let (value, revision) = store.read(&"pipeDiameter".into()).unwrap();
        assert_eq!(revision, Revision(2));
        assert_eq!(value.as_number().unwrap(), 12.0);
    }

    #[test]
    fn test_stale_base_revision_conflicts() {
        let mut store = store_with_diameter();
        write(&mut store, "pipeDiameter", Revision(1), 12.0).unwrap();

        // A second writer still based on revision 1 loses the race
        let err = write(&mut store, "pipeDiameter", Revision(1), 14.0).unwrap_err();
        assert_eq!(err.error_code(), "CONFLICT");
        match err {
            EngineError::Conflict { conflicting } => {
                assert_eq!(conflicting, vec!["pipeDiameter".to_string()])
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The failed request changed nothing
        let (_, revision) = store.read(&"pipeDiameter".into()).unwrap();
        assert_eq!(revision, Revision(2));
    }

    #[test]
    fn test_change_request_is_all_or_nothing() {
        let mut store = store_with_diameter();
        store
            .register("wallThickness", ParamValue::Number(0.365), "j.smith", Discipline::Systems)
            .unwrap();

        // One good base, one stale base: the whole request is rejected
        let request = ChangeRequest::new("test", Discipline::Systems)
            .with_write("pipeDiameter", Revision(1), ParamValue::Number(12.0))
            .with_write("wallThickness", Revision(9), ParamValue::Number(0.5));
        let err = store.validate_change(&request).unwrap_err();
        assert_eq!(err.error_code(), "CONFLICT");

        let (_, revision) = store.read(&"pipeDiameter".into()).unwrap();
        assert_eq!(revision, Revision(1));
    }

    #[test]
    fn test_read_at_replays_history() {
        let mut store = store_with_diameter();
        write(&mut store, "pipeDiameter", Revision(1), 12.0).unwrap();
        write(&mut store, "pipeDiameter", Revision(2), 14.0).unwrap();

        let id = ParamId::from("pipeDiameter");
        assert_eq!(store.read_at(&id, Revision(1)).unwrap().as_number().unwrap(), 10.0);
        assert_eq!(store.read_at(&id, Revision(2)).unwrap().as_number().unwrap(), 12.0);
        assert_eq!(store.read_at(&id, Revision(3)).unwrap().as_number().unwrap(), 14.0);
    }

    #[test]
    fn test_read_at_fails_on_pruned_and_future_revisions() {
        let mut store = ParameterStore::new(1);
        store
            .register("pipeDiameter", ParamValue::Number(10.0), "x", Discipline::Systems)
            .unwrap();
        write(&mut store, "pipeDiameter", Revision(1), 12.0).unwrap();
        write(&mut store, "pipeDiameter", Revision(2), 14.0).unwrap();

        let id = ParamId::from("pipeDiameter");
        // Retention of 1 keeps only revision 2; revision 1 is pruned
        assert_eq!(store.read_at(&id, Revision(1)).unwrap_err().error_code(), "NOT_FOUND");
        assert!(store.read_at(&id, Revision(2)).is_ok());
        // Future revisions are never answered
        assert_eq!(store.read_at(&id, Revision(9)).unwrap_err().error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_snapshot_entries_roundtrip() {
        let mut store = store_with_diameter();
        write(&mut store, "pipeDiameter", Revision(1), 12.0).unwrap();

        let restored = ParameterStore::from_entries(store.entries(), 4);
        let (value, revision) = restored.read(&"pipeDiameter".into()).unwrap();
        assert_eq!(revision, Revision(2));
        assert_eq!(value.as_number().unwrap(), 12.0);
        assert_eq!(
            restored
                .read_at(&"pipeDiameter".into(), Revision(1))
                .unwrap()
                .as_number()
                .unwrap(),
            10.0
        );
    }
}
