//! Row shapes. The full entity is kept as a JSON `body`; the other columns
//! exist for filtering and claiming.

use entropy_core::{Module, Resource, Revision};
use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

use crate::error::{PersistenceError, PersistenceResult};

fn encode<T: Serialize>(value: &T) -> PersistenceResult<String> {
    serde_json::to_string(value).map_err(|e| PersistenceError::serialization_error(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> PersistenceResult<T> {
    serde_json::from_str(body).map_err(|e| PersistenceError::serialization_error(e.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    #[serde(default, skip_serializing)]
    pub id: Option<RecordId>,
    pub urn: String,
    pub kind: String,
    pub project: String,
    pub tags: Vec<String>,
    pub status: String,
    pub terminal: bool,
    pub has_next_sync: bool,
    pub next_sync_at_ms: i64,
    pub body: String,
}

impl ResourceRecord {
    pub fn from_resource(resource: &Resource) -> PersistenceResult<Self> {
        Ok(Self {
            id: None,
            urn: resource.urn.clone(),
            kind: resource.kind.clone(),
            project: resource.project.clone(),
            tags: resource.tags(),
            status: resource.state.status.to_string(),
            terminal: resource.state.is_terminal(),
            has_next_sync: resource.state.next_sync_at.is_some(),
            next_sync_at_ms: resource
                .state
                .next_sync_at
                .map_or(0, |at| at.timestamp_millis()),
            body: encode(resource)?,
        })
    }

    pub fn into_resource(self) -> PersistenceResult<Resource> {
        decode(&self.body)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionRecord {
    #[serde(default, skip_serializing)]
    pub id: Option<RecordId>,
    pub rev_id: i64,
    pub urn: String,
    pub body: String,
}

impl RevisionRecord {
    /// Encode the revision body; the id is assigned inside the transaction.
    pub fn body_of(revision: &Revision) -> PersistenceResult<String> {
        encode(revision)
    }

    pub fn into_revision(self) -> PersistenceResult<Revision> {
        let mut revision: Revision = decode(&self.body)?;
        revision.id = self.rev_id;
        Ok(revision)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRecord {
    #[serde(default, skip_serializing)]
    pub id: Option<RecordId>,
    pub urn: String,
    pub project: String,
    pub body: String,
}

impl ModuleRecord {
    pub fn from_module(module: &Module) -> PersistenceResult<Self> {
        Ok(Self {
            id: None,
            urn: module.urn.clone(),
            project: module.project.clone(),
            body: encode(module)?,
        })
    }

    pub fn into_module(self) -> PersistenceResult<Module> {
        decode(&self.body)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::{TimeZone, Utc};
    use entropy_core::Status;
    use serde_json::json;

    #[test]
    fn test_resource_record_columns() {
        let mut res = Resource::new("firehose", "foo", "bar")
            .with_label("team", "data")
            .with_configs(json!({"replicas": 2}))
            .with_status(Status::Pending);
        res.state.next_sync_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let record = ResourceRecord::from_resource(&res).unwrap();
        assert_eq!(record.tags, vec!["team=data"]);
        assert_eq!(record.status, "STATUS_PENDING");
        assert!(!record.terminal);
        assert!(record.has_next_sync);
        assert_eq!(record.next_sync_at_ms, 1_704_067_200_000);
        assert_eq!(record.into_resource().unwrap(), res);
    }
}
