//! Resource persistence and pending-resource claims.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entropy_core::{Filter, Resource, Result, Revision, RevisionsSelector};
use entropy_queue::{JobRecord, insert_statements};
use tracing::{debug, warn};
use ulid::Ulid;

use super::records::{ResourceRecord, RevisionRecord};
use super::{SurrealStore, check};
use crate::error::{CLAIM_LOST_MARKER, NOT_FOUND_MARKER, PersistenceError, PersistenceResult, from_surrealdb_error};
use crate::hooks::{Hook, run_hooks};
use crate::store::{CREATE_REASON, PendingHandler, PendingOutcome, ResourceStore, revision_of};

const ENTITY: &str = "resource";

/// Rows eligible for a sync pass at `$now`.
const DUE: &str = "((terminal = false AND (has_next_sync = false OR next_sync_at_ms <= $now)) \
                   OR (terminal = true AND has_next_sync = true AND next_sync_at_ms <= $now))";

const CANDIDATE_BATCH: i64 = 16;

fn exists_guard() -> String {
    format!(
        "IF array::len((SELECT urn FROM type::thing('resource', $urn))) = 0 {{ THROW \"{NOT_FOUND_MARKER}\" }};\n"
    )
}

fn claim_guard() -> String {
    format!(
        "LET $held = (SELECT claim_token FROM type::thing('resource', $urn));\n\
         IF array::len($held) = 0 OR $held[0].claim_token != $claim_tok {{ THROW \"{CLAIM_LOST_MARKER}\" }};\n"
    )
}

const APPEND_REVISION: &str = "LET $seq = (UPSERT ONLY counter:revisions SET value = (value OR 0) + 1);\n\
                               CREATE revision SET rev_id = $seq.value, urn = $urn, body = $rev_body;\n";

/// Concurrent writers on the same row surface as a retryable conflict.
fn is_write_conflict(err: &PersistenceError) -> bool {
    let msg = err.to_string();
    msg.contains("conflict") || msg.contains("can be retried")
}

fn wrap_tx(body: &str, jobs: &str) -> String {
    format!("BEGIN TRANSACTION;\n{body}{jobs}COMMIT TRANSACTION;")
}

#[derive(serde::Deserialize)]
struct UrnRow {
    urn: String,
}

/// Statements and bindings shared by every write.
struct Write {
    sql: String,
    record: Option<ResourceRecord>,
    rev_body: Option<String>,
    token: Option<String>,
    jobs: Vec<(String, JobRecord)>,
}

impl SurrealStore {
    fn ms(at: DateTime<Utc>) -> i64 {
        at.timestamp_millis()
    }

    fn claim_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.claim.ttl).unwrap_or_else(|_| chrono::Duration::seconds(30))
    }

    async fn execute(&self, urn: &str, write: Write) -> PersistenceResult<()> {
        let mut query = self.db.query(write.sql).bind(("urn", urn.to_string()));
        if let Some(record) = write.record {
            query = query.bind(("record", record));
        }
        if let Some(rev_body) = write.rev_body {
            query = query.bind(("rev_body", rev_body));
        }
        if let Some(token) = write.token {
            query = query.bind(("claim_tok", token));
        }
        for binding in write.jobs {
            query = query.bind(binding);
        }
        let response = query.await.map_err(from_surrealdb_error)?;
        check(response).map(|_| ()).map_err(|e| e.for_entity(ENTITY, urn))
    }

    fn job_statements(hooks: Vec<Hook>) -> Result<(String, Vec<(String, JobRecord)>)> {
        let jobs = run_hooks(hooks)?;
        Ok(insert_statements(&jobs, "job_")?)
    }

    async fn due_candidates(&self, now: DateTime<Utc>) -> PersistenceResult<Vec<String>> {
        let sql = format!(
            "SELECT urn, next_sync_at_ms FROM resource WHERE claimed_until_ms <= $now AND {DUE} \
             ORDER BY next_sync_at_ms LIMIT $limit"
        );
        let rows: Vec<UrnRow> = self
            .db
            .query(sql)
            .bind(("now", Self::ms(now)))
            .bind(("limit", CANDIDATE_BATCH))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;
        Ok(rows.into_iter().map(|row| row.urn).collect())
    }

    async fn try_claim(
        &self,
        urn: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<Option<Resource>> {
        let sql = format!(
            "UPDATE type::thing('resource', $urn) SET claimed_until_ms = $until, claim_token = $claim_tok \
             WHERE claimed_until_ms <= $now AND {DUE} RETURN AFTER"
        );
        let response = self
            .db
            .query(sql)
            .bind(("urn", urn.to_string()))
            .bind(("claim_tok", token.to_string()))
            .bind(("now", Self::ms(now)))
            .bind(("until", Self::ms(now + self.claim_ttl())))
            .await
            .map_err(from_surrealdb_error)
            .and_then(check);
        let mut response = match response {
            Ok(response) => response,
            Err(err) if is_write_conflict(&err) => {
                debug!(urn = %urn, "Lost claim race");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let claimed: Vec<ResourceRecord> = response.take(0).map_err(from_surrealdb_error)?;
        claimed.into_iter().next().map(ResourceRecord::into_resource).transpose()
    }

    async fn refresh_claim(&self, urn: &str, token: &str) -> PersistenceResult<()> {
        let until = self.clock.now() + self.claim_ttl();
        let refreshed: Vec<ResourceRecord> = self
            .db
            .query(
                "UPDATE type::thing('resource', $urn) SET claimed_until_ms = $until \
                 WHERE claim_token = $claim_tok RETURN AFTER",
            )
            .bind(("urn", urn.to_string()))
            .bind(("claim_tok", token.to_string()))
            .bind(("until", Self::ms(until)))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;
        if refreshed.is_empty() {
            Err(PersistenceError::claim_lost(urn))
        } else {
            Ok(())
        }
    }

    async fn release_claim(&self, urn: &str, token: &str) -> PersistenceResult<()> {
        self.db
            .query(
                "UPDATE type::thing('resource', $urn) SET claimed_until_ms = 0, claim_token = '' \
                 WHERE claim_token = $claim_tok",
            )
            .bind(("urn", urn.to_string()))
            .bind(("claim_tok", token.to_string()))
            .await
            .map_err(from_surrealdb_error)
            .and_then(check)?;
        debug!(urn = %urn, "Released claim");
        Ok(())
    }

    async fn release_quietly(&self, urn: &str, token: &str) {
        if let Err(err) = self.release_claim(urn, token).await {
            warn!(urn = %urn, error = %err, "Failed to release claim; it will expire");
        }
    }

    async fn commit_claimed(&self, urn: &str, token: &str, outcome: PendingOutcome) -> Result<()> {
        let (body, hooks, record) = match outcome {
            PendingOutcome::Release => {
                self.release_claim(urn, token).await?;
                return Ok(());
            }
            PendingOutcome::Save { resource, hooks } => (
                "UPDATE type::thing('resource', $urn) MERGE $record;\n\
                 UPDATE type::thing('resource', $urn) SET claimed_until_ms = 0, claim_token = '';\n",
                hooks,
                Some(ResourceRecord::from_resource(&resource)?),
            ),
            PendingOutcome::Delete { hooks } => (
                "DELETE type::thing('resource', $urn);\nDELETE revision WHERE urn = $urn;\n",
                hooks,
                None,
            ),
        };

        let (jobs_sql, jobs) = match Self::job_statements(hooks) {
            Ok(statements) => statements,
            Err(err) => {
                self.release_quietly(urn, token).await;
                return Err(err);
            }
        };

        let write = Write {
            sql: wrap_tx(&format!("{}{body}", claim_guard()), &jobs_sql),
            record,
            rev_body: None,
            token: Some(token.to_string()),
            jobs,
        };
        self.execute(urn, write).await?;
        Ok(())
    }

    async fn run_claimed(
        &self,
        resource: Resource,
        token: &str,
        handler: &dyn PendingHandler,
    ) -> Result<()> {
        let urn = resource.urn.clone();
        let work = handler.handle(resource);
        tokio::pin!(work);

        let period = self.claim.refresh;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        let handled = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = ticker.tick() => {
                    if let Err(err) = self.refresh_claim(&urn, token).await {
                        warn!(urn = %urn, error = %err, "Claim refresh failed, abandoning pending work");
                        return Err(err.into());
                    }
                }
            }
        };

        match handled {
            Ok(outcome) => self.commit_claimed(&urn, token, outcome).await,
            Err(err) => {
                self.release_quietly(&urn, token).await;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ResourceStore for SurrealStore {
    async fn get_by_urn(&self, urn: &str) -> Result<Resource> {
        let record: Option<ResourceRecord> = self
            .db
            .select((ENTITY, urn))
            .await
            .map_err(from_surrealdb_error)?;
        let record = record.ok_or_else(|| PersistenceError::not_found(ENTITY, urn))?;
        Ok(record.into_resource()?)
    }

    async fn list(&self, filter: &Filter) -> Result<Vec<Resource>> {
        let mut conditions = Vec::new();
        if filter.kind.is_some() {
            conditions.push("kind = $kind");
        }
        if filter.project.is_some() {
            conditions.push("project = $project");
        }
        if !filter.labels.is_empty() {
            conditions.push("tags CONTAINSALL $tags");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let records: Vec<ResourceRecord> = self
            .db
            .query(format!("SELECT * FROM resource{where_clause} ORDER BY urn"))
            .bind(("kind", filter.kind.clone()))
            .bind(("project", filter.project.clone()))
            .bind(("tags", entropy_core::labels_to_tags(&filter.labels)))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        records
            .into_iter()
            .map(|record| record.into_resource().map_err(Into::into))
            .collect()
    }

    async fn create(&self, resource: &Resource, hooks: Vec<Hook>) -> Result<()> {
        let (jobs_sql, jobs) = Self::job_statements(hooks)?;
        let revision = revision_of(resource, 0, CREATE_REASON);
        let write = Write {
            sql: wrap_tx(
                &format!("CREATE type::thing('resource', $urn) CONTENT $record;\n{APPEND_REVISION}"),
                &jobs_sql,
            ),
            record: Some(ResourceRecord::from_resource(resource)?),
            rev_body: Some(RevisionRecord::body_of(&revision)?),
            token: None,
            jobs,
        };
        self.execute(&resource.urn, write).await?;
        debug!(urn = %resource.urn, "Created resource");
        Ok(())
    }

    async fn update(
        &self,
        resource: &Resource,
        save_revision: bool,
        reason: &str,
        hooks: Vec<Hook>,
    ) -> Result<()> {
        let (jobs_sql, jobs) = Self::job_statements(hooks)?;
        let (revision_sql, rev_body) = if save_revision {
            let revision = revision_of(resource, 0, reason);
            (APPEND_REVISION, Some(RevisionRecord::body_of(&revision)?))
        } else {
            ("", None)
        };
        let write = Write {
            sql: wrap_tx(
                &format!(
                    "{}UPDATE type::thing('resource', $urn) MERGE $record;\n{revision_sql}",
                    exists_guard()
                ),
                &jobs_sql,
            ),
            record: Some(ResourceRecord::from_resource(resource)?),
            rev_body,
            token: None,
            jobs,
        };
        self.execute(&resource.urn, write).await?;
        Ok(())
    }

    async fn delete(&self, urn: &str, hooks: Vec<Hook>) -> Result<()> {
        let (jobs_sql, jobs) = Self::job_statements(hooks)?;
        let write = Write {
            sql: wrap_tx(
                &format!(
                    "{}DELETE type::thing('resource', $urn);\nDELETE revision WHERE urn = $urn;\n",
                    exists_guard()
                ),
                &jobs_sql,
            ),
            record: None,
            rev_body: None,
            token: None,
            jobs,
        };
        self.execute(urn, write).await?;
        debug!(urn = %urn, "Deleted resource");
        Ok(())
    }

    async fn revisions(&self, selector: &RevisionsSelector) -> Result<Vec<Revision>> {
        let records: Vec<RevisionRecord> = self
            .db
            .query("SELECT * FROM revision WHERE urn = $urn ORDER BY rev_id DESC")
            .bind(("urn", selector.urn.clone()))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;
        records
            .into_iter()
            .map(|record| record.into_revision().map_err(Into::into))
            .collect()
    }

    async fn do_pending(&self, urn: Option<&str>, handler: &dyn PendingHandler) -> Result<bool> {
        let now = self.clock.now();
        let candidates = match urn {
            Some(urn) => vec![urn.to_string()],
            None => self.due_candidates(now).await?,
        };

        let token = Ulid::new().to_string();
        for candidate in candidates {
            if let Some(resource) = self.try_claim(&candidate, &token, now).await? {
                debug!(urn = %candidate, "Claimed pending resource");
                self.run_claimed(resource, &token, handler).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn is_claimed(&self, urn: &str) -> Result<bool> {
        let held: Vec<UrnRow> = self
            .db
            .query("SELECT urn FROM type::thing('resource', $urn) WHERE claimed_until_ms > $now")
            .bind(("urn", urn.to_string()))
            .bind(("now", Self::ms(self.clock.now())))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;
        Ok(!held.is_empty())
    }
}
