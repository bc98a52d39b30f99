//! Module row persistence.

use async_trait::async_trait;
use entropy_core::{Module, Result};

use super::records::ModuleRecord;
use super::{SurrealStore, check};
use crate::error::{PersistenceError, from_surrealdb_error};
use crate::store::ModuleStore;

const ENTITY: &str = "module";

#[async_trait]
impl ModuleStore for SurrealStore {
    async fn get_module(&self, urn: &str) -> Result<Module> {
        let record: Option<ModuleRecord> = self
            .db
            .select((ENTITY, urn))
            .await
            .map_err(from_surrealdb_error)?;
        let record = record.ok_or_else(|| PersistenceError::not_found(ENTITY, urn))?;
        Ok(record.into_module()?)
    }

    async fn list_modules(&self, project: Option<&str>) -> Result<Vec<Module>> {
        let sql = if project.is_some() {
            "SELECT * FROM module WHERE project = $project ORDER BY urn"
        } else {
            "SELECT * FROM module ORDER BY urn"
        };
        let records: Vec<ModuleRecord> = self
            .db
            .query(sql)
            .bind(("project", project.map(str::to_string)))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;
        records
            .into_iter()
            .map(|record| record.into_module().map_err(Into::into))
            .collect()
    }

    async fn create_module(&self, module: &Module) -> Result<()> {
        let response = self
            .db
            .query("CREATE type::thing('module', $urn) CONTENT $record")
            .bind(("urn", module.urn.clone()))
            .bind(("record", ModuleRecord::from_module(module)?))
            .await
            .map_err(from_surrealdb_error)?;
        check(response).map_err(|e| e.for_entity(ENTITY, &module.urn))?;
        Ok(())
    }

    async fn update_module(&self, module: &Module) -> Result<()> {
        let updated: Vec<ModuleRecord> = self
            .db
            .query("UPDATE type::thing('module', $urn) MERGE $record RETURN AFTER")
            .bind(("urn", module.urn.clone()))
            .bind(("record", ModuleRecord::from_module(module)?))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;
        if updated.is_empty() {
            return Err(PersistenceError::not_found(ENTITY, &module.urn).into());
        }
        Ok(())
    }

    async fn delete_module(&self, urn: &str) -> Result<()> {
        let deleted: Vec<ModuleRecord> = self
            .db
            .query("DELETE type::thing('module', $urn) RETURN BEFORE")
            .bind(("urn", urn.to_string()))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;
        if deleted.is_empty() {
            return Err(PersistenceError::not_found(ENTITY, urn).into());
        }
        Ok(())
    }
}
