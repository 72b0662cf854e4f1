use crate::error::StoreError;
use crate::events::{Incident, IncidentStatus};
use crate::store::Journal;
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use uuid::Uuid;

const JOURNAL_NAME: &str = "incidents.jsonl";

/// Store of detected incidents
///
/// Incidents are created by the anomaly detector and updated in place by the
/// incident analyzer or an operator. Every version is journaled; replay keeps
/// the last version of each incident.
#[derive(Debug, Default)]
pub struct IncidentStore {
    records: RwLock<Vec<Incident>>,
    journal: Option<Journal>,
}

impl IncidentStore {
    /// Create an in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a journaled store in `dir`
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let (journal, versions) = Journal::open_with_records::<Incident>(dir, JOURNAL_NAME)?;

        let mut positions: HashMap<Uuid, usize> = HashMap::new();
        let mut records: Vec<Incident> = Vec::new();
        for incident in versions {
            match positions.get(&incident.id) {
                Some(&index) => records[index] = incident,
                None => {
                    positions.insert(incident.id, records.len());
                    records.push(incident);
                }
            }
        }

        info!("Loaded {} incidents from {}", records.len(), journal.path().display());
        Ok(Self {
            records: RwLock::new(records),
            journal: Some(journal),
        })
    }

    /// Persist a newly detected incident
    pub fn insert(&self, incident: Incident) -> Result<(), StoreError> {
        if let Some(journal) = &self.journal {
            journal.append(&incident)?;
        }
        self.records.write().unwrap().push(incident);
        Ok(())
    }

    /// Look up an incident by id
    pub fn get(&self, id: Uuid) -> Option<Incident> {
        self.records
            .read()
            .unwrap()
            .iter()
            .find(|incident| incident.id == id)
            .cloned()
    }

    /// All incidents, newest first
    pub fn list(&self) -> Vec<Incident> {
        let mut incidents = self.records.read().unwrap().clone();
        incidents.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        incidents
    }

    /// Apply `change` to the stored incident under the write lock
    ///
    /// Concurrent modifications of the same incident are serialized, so no
    /// caller overwrites a field another caller changed in between.
    pub fn modify<F>(&self, id: Uuid, change: F) -> Result<Incident, StoreError>
    where
        F: FnOnce(&mut Incident),
    {
        let mut records = self.records.write().unwrap();
        let slot = records
            .iter_mut()
            .find(|existing| existing.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut updated = slot.clone();
        change(&mut updated);
        if let Some(journal) = &self.journal {
            journal.append(&updated)?;
        }
        *slot = updated.clone();
        Ok(updated)
    }

    /// Mark an incident as resolved
    ///
    /// Resolution is an operator action; the pipeline never resolves
    /// incidents on its own.
    pub fn resolve(&self, id: Uuid) -> Result<Incident, StoreError> {
        let incident = self.modify(id, |incident| incident.status = IncidentStatus::Resolved)?;
        info!("Incident {} resolved", id);
        Ok(incident)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::{IncidentType, Severity};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    pub(crate) fn incident(minutes_ago: i64, incident_type: IncidentType) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            incident_type,
            severity: Severity::Medium,
            description: "test incident".to_string(),
            affected_endpoint: "httpbin.org/anything".to_string(),
            detected_value: 2500.0,
            threshold: "> 2000ms".to_string(),
            root_cause_analysis: None,
            suggested_fix: None,
            status: IncidentStatus::Open,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            observation_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_list_newest_first() {
        let store = IncidentStore::new();
        let old = incident(30, IncidentType::Latency);
        let new = incident(1, IncidentType::Error);
        store.insert(old.clone()).unwrap();
        store.insert(new.clone()).unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, new.id);
        assert_eq!(listed[1].id, old.id);
    }

    #[test]
    fn test_modify_replaces_in_place() {
        let store = IncidentStore::new();
        let stored = incident(5, IncidentType::Latency);
        store.insert(stored.clone()).unwrap();

        let updated = store
            .modify(stored.id, |incident| {
                incident.root_cause_analysis = Some("slow upstream".to_string());
                incident.status = IncidentStatus::Investigating;
            })
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(updated.root_cause_analysis.as_deref(), Some("slow upstream"));
        assert_eq!(store.get(stored.id), Some(updated));
    }

    #[test]
    fn test_resolve() {
        let store = IncidentStore::new();
        let stored = incident(5, IncidentType::Error);
        store.insert(stored.clone()).unwrap();

        let resolved = store.resolve(stored.id).unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert_eq!(store.get(stored.id).unwrap().status, IncidentStatus::Resolved);

        assert!(matches!(store.resolve(Uuid::new_v4()), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_modify_serializes_concurrent_changes() {
        let store = std::sync::Arc::new(IncidentStore::new());
        let stored = incident(5, IncidentType::Latency);
        store.insert(stored.clone()).unwrap();
        let id = stored.id;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .modify(id, |incident| {
                            incident.description.push_str(&format!(" [{}]", i));
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let description = store.get(id).unwrap().description;
        for i in 0..8 {
            assert!(description.contains(&format!(" [{}]", i)));
        }
    }

    #[test]
    fn test_modify_unknown_incident_fails() {
        let store = IncidentStore::new();
        let result = store.modify(Uuid::new_v4(), |incident| incident.status = IncidentStatus::Resolved);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_modify_journals_new_version() {
        let dir = TempDir::new().unwrap();
        let stored = incident(5, IncidentType::Error);
        {
            let store = IncidentStore::open(dir.path()).unwrap();
            store.insert(stored.clone()).unwrap();
            store.resolve(stored.id).unwrap();
        }

        let reopened = IncidentStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(stored.id).unwrap().status, IncidentStatus::Resolved);
    }

    #[test]
    fn test_replay_keeps_last_version() {
        let dir = TempDir::new().unwrap();
        let stored = incident(5, IncidentType::Latency);
        {
            let store = IncidentStore::open(dir.path()).unwrap();
            store.insert(stored.clone()).unwrap();
            store.insert(incident(2, IncidentType::Error)).unwrap();
            store
                .modify(stored.id, |incident| {
                    incident.suggested_fix = Some("add a cache".to_string());
                })
                .unwrap();
        }

        let reopened = IncidentStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(
            reopened.get(stored.id).unwrap().suggested_fix.as_deref(),
            Some("add a cache")
        );
    }
}
