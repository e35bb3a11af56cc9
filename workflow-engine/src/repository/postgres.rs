//! PostgreSQL-backed flow and request stores
//!
//! Flows are stored one row per `(id, version)`; the `active` flag is kept in
//! sync across all versions of a flow. Requests are stored as a JSONB document
//! next to the columns used for filtering, and every update is a conditional
//! `UPDATE ... WHERE id = $1 AND version = $2`.

use crate::repository::{FlowStore, RequestStore, StoreError, StoreResult};
use crate::state_machine::RequestInstance;
use crate::step::StepDefinition;
use crate::workflow::{FlowDefinition, Module};
use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(db.to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Connect to Postgres
pub async fn connect(database_url: &str) -> StoreResult<PgPool> {
    PgPool::connect(database_url)
        .await
        .map_err(|e| StoreError::Backend(format!("Failed to connect: {}", e)))
}

/// Install or upgrade the approval schema
pub async fn migrate(pool: &PgPool) -> StoreResult<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| StoreError::Backend(format!("Migration failed: {}", e)))?;
    info!("Approval schema is up to date");
    Ok(())
}

const FLOW_COLUMNS: &str = "id, version, module, name, description, active, created_at, steps";

fn flow_from_row(row: &PgRow) -> StoreResult<FlowDefinition> {
    let version: i32 = row.try_get("version")?;
    let module: String = row.try_get("module")?;
    let Json(steps): Json<Vec<StepDefinition>> = row.try_get("steps")?;

    Ok(FlowDefinition {
        id: row.try_get("id")?,
        version: u32::try_from(version).map_err(|e| StoreError::Backend(e.to_string()))?,
        module: module
            .parse::<Module>()
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        steps,
    })
}

fn request_from_row(row: &PgRow) -> StoreResult<RequestInstance> {
    let Json(mut instance): Json<RequestInstance> = row.try_get("document")?;
    let version: i64 = row.try_get("version")?;
    instance.version = version as u64;
    Ok(instance)
}

/// PostgreSQL-backed flow store
pub struct PostgresFlowStore {
    pool: PgPool,
}

impl PostgresFlowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_connection_string(database_url: &str) -> StoreResult<Self> {
        Ok(Self::new(connect(database_url).await?))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        migrate(&self.pool).await
    }
}

#[async_trait]
impl FlowStore for PostgresFlowStore {
    async fn insert(&self, flow: FlowDefinition) -> StoreResult<()> {
        debug!(flow_id = %flow.id, version = flow.version, "Inserting flow version");
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO approval_flows (id, version, module, name, description, active, created_at, steps)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(flow.id)
        .bind(flow.version as i32)
        .bind(flow.module.as_str())
        .bind(&flow.name)
        .bind(&flow.description)
        .bind(flow.active)
        .bind(flow.created_at)
        .bind(Json(&flow.steps))
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE approval_flows SET active = $2 WHERE id = $1")
            .bind(flow.id)
            .bind(flow.active)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, flow_id: Uuid, version: Option<u32>) -> StoreResult<Option<FlowDefinition>> {
        let row = match version {
            Some(version) => {
                let sql = format!("SELECT {} FROM approval_flows WHERE id = $1 AND version = $2", FLOW_COLUMNS);
                sqlx::query(&sql)
                    .bind(flow_id)
                    .bind(version as i32)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM approval_flows WHERE id = $1 ORDER BY version DESC LIMIT 1",
                    FLOW_COLUMNS
                );
                sqlx::query(&sql).bind(flow_id).fetch_optional(&self.pool).await?
            }
        };
        row.as_ref().map(flow_from_row).transpose()
    }

    async fn set_active(&self, flow_id: Uuid, active: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE approval_flows SET active = $2 WHERE id = $1")
            .bind(flow_id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("flow {}", flow_id)));
        }
        Ok(())
    }

    async fn list(&self, module: Option<Module>, active: Option<bool>) -> StoreResult<Vec<FlowDefinition>> {
        let sql = format!(
            r#"
            SELECT DISTINCT ON (id) {}
            FROM approval_flows
            WHERE ($1::TEXT IS NULL OR module = $1)
              AND ($2::BOOLEAN IS NULL OR active = $2)
            ORDER BY id, version DESC
            "#,
            FLOW_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(module.map(|m| m.as_str()))
            .bind(active)
            .fetch_all(&self.pool)
            .await?;

        let mut flows = rows.iter().map(flow_from_row).collect::<StoreResult<Vec<_>>>()?;
        flows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(flows)
    }
}

/// PostgreSQL-backed request store
pub struct PostgresRequestStore {
    pool: PgPool,
}

impl PostgresRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_connection_string(database_url: &str) -> StoreResult<Self> {
        Ok(Self::new(connect(database_url).await?))
    }

    async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM approval_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl RequestStore for PostgresRequestStore {
    async fn insert(&self, instance: RequestInstance) -> StoreResult<()> {
        debug!(request_id = %instance.id, "Inserting approval request");
        let approvers: Vec<String> = instance.current_approvers.iter().cloned().collect();

        sqlx::query(
            r#"
            INSERT INTO approval_requests (
                id, module, referenced_object_id, requester_id,
                flow_id, flow_version, status, priority, current_step,
                current_approvers, submitted_at, updated_at, version, document
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(instance.id)
        .bind(instance.module.as_str())
        .bind(&instance.referenced_object_id)
        .bind(&instance.requester_id)
        .bind(instance.flow_id)
        .bind(instance.flow_version as i32)
        .bind(instance.status.as_str())
        .bind(instance.priority.as_str())
        .bind(instance.current_step as i32)
        .bind(&approvers)
        .bind(instance.submitted_at)
        .bind(instance.updated_at)
        .bind(instance.version as i64)
        .bind(Json(&instance))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<RequestInstance>> {
        let row = sqlx::query("SELECT document, version FROM approval_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn update(&self, mut instance: RequestInstance, expected_version: u64) -> StoreResult<RequestInstance> {
        instance.version = expected_version + 1;
        let approvers: Vec<String> = instance.current_approvers.iter().cloned().collect();

        let result = sqlx::query(
            r#"
            UPDATE approval_requests
            SET status = $3,
                priority = $4,
                current_step = $5,
                current_approvers = $6,
                updated_at = $7,
                version = version + 1,
                document = $8
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(instance.id)
        .bind(expected_version as i64)
        .bind(instance.status.as_str())
        .bind(instance.priority.as_str())
        .bind(instance.current_step as i32)
        .bind(&approvers)
        .bind(instance.updated_at)
        .bind(Json(&instance))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.exists(instance.id).await? {
                return Err(StoreError::VersionConflict { id: instance.id, expected: expected_version });
            }
            return Err(StoreError::NotFound(format!("request {}", instance.id)));
        }
        Ok(instance)
    }

    async fn list_pending(&self) -> StoreResult<Vec<RequestInstance>> {
        let rows = sqlx::query(
            "SELECT document, version FROM approval_requests WHERE status = 'pending' ORDER BY submitted_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(request_from_row).collect()
    }

    async fn list_awaiting(&self, approver_id: &str) -> StoreResult<Vec<RequestInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT document, version FROM approval_requests
            WHERE status = 'pending' AND $1 = ANY(current_approvers)
            "#,
        )
        .bind(approver_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(request_from_row).collect()
    }

    async fn list_by_requester(&self, requester_id: &str) -> StoreResult<Vec<RequestInstance>> {
        let rows = sqlx::query(
            "SELECT document, version FROM approval_requests WHERE requester_id = $1 ORDER BY submitted_at DESC",
        )
        .bind(requester_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(request_from_row).collect()
    }
}
