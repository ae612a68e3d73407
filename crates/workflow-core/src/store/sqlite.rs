//! SQLite storage backend

use super::{
    Result, Store, StoreError, Transaction, UserRepository, WorkflowNodeRepository,
    WorkflowOperatorRepository, WorkflowRepository, WorkflowTypeRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};
use workflow_types::{
    role, user_state, User, UserId, Workflow, WorkflowId, WorkflowNode, WorkflowOperator,
    WorkflowStatus, WorkflowType, WorkflowTypeId,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS workflow_type (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        only_name TEXT NOT NULL UNIQUE,
        org_id INTEGER,
        system INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_node (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type_id INTEGER NOT NULL,
        node INTEGER NOT NULL,
        name TEXT NOT NULL,
        action TEXT,
        action_value TEXT,
        everyone INTEGER NOT NULL DEFAULT 0,
        UNIQUE (type_id, node)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type_id INTEGER NOT NULL,
        type_name TEXT NOT NULL,
        serials TEXT NOT NULL,
        title TEXT NOT NULL,
        promoter INTEGER NOT NULL,
        status INTEGER NOT NULL,
        node INTEGER NOT NULL,
        submit_num INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_operator (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id INTEGER NOT NULL,
        node INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        nickname TEXT NOT NULL,
        handled INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        username TEXT NOT NULL,
        nickname TEXT NOT NULL,
        role INTEGER NOT NULL DEFAULT 0,
        state INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_workflow_created_at ON workflow (created_at)",
    r#"
    CREATE INDEX IF NOT EXISTS idx_workflow_operator_workflow
    ON workflow_operator (workflow_id, node)
    "#,
];

fn db_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::AlreadyExists(db.message().to_string())
        }
        _ => StoreError::Database(e.to_string()),
    }
}

/// SQLite storage backend
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `database_url`, e.g. `sqlite://workflow.db?mode=rwc`
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        log::info!("Connecting to database at {}", database_url);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist
    pub async fn migrate(&self) -> Result<()> {
        log::info!("Running database migrations...");
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(db_err)?;
        }
        log::info!("Database migrations completed");
        Ok(())
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        self.pool.close().await;
        log::info!("Database connections closed");
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

/// Transaction on one pooled connection
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

fn type_from_row(row: &SqliteRow) -> Result<WorkflowType> {
    Ok(WorkflowType {
        id: WorkflowTypeId::new(row.try_get("id").map_err(db_err)?),
        name: row.try_get("name").map_err(db_err)?,
        only_name: row.try_get("only_name").map_err(db_err)?,
        org_id: row.try_get("org_id").map_err(db_err)?,
        system: row.try_get("system").map_err(db_err)?,
    })
}

fn node_from_row(row: &SqliteRow) -> Result<WorkflowNode> {
    Ok(WorkflowNode {
        id: row.try_get("id").map_err(db_err)?,
        type_id: WorkflowTypeId::new(row.try_get("type_id").map_err(db_err)?),
        node: row.try_get("node").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        action: row.try_get("action").map_err(db_err)?,
        action_value: row.try_get("action_value").map_err(db_err)?,
        everyone: row.try_get("everyone").map_err(db_err)?,
    })
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow> {
    let status: i32 = row.try_get("status").map_err(db_err)?;
    Ok(Workflow {
        id: WorkflowId::new(row.try_get("id").map_err(db_err)?),
        type_id: WorkflowTypeId::new(row.try_get("type_id").map_err(db_err)?),
        type_name: row.try_get("type_name").map_err(db_err)?,
        serials: row.try_get("serials").map_err(db_err)?,
        title: row.try_get("title").map_err(db_err)?,
        promoter: UserId::new(row.try_get("promoter").map_err(db_err)?),
        status: WorkflowStatus::try_from(status)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        node: row.try_get("node").map_err(db_err)?,
        submit_num: row.try_get("submit_num").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn operator_from_row(row: &SqliteRow) -> Result<WorkflowOperator> {
    Ok(WorkflowOperator {
        id: row.try_get("id").map_err(db_err)?,
        workflow_id: WorkflowId::new(row.try_get("workflow_id").map_err(db_err)?),
        node: row.try_get("node").map_err(db_err)?,
        user_id: UserId::new(row.try_get("user_id").map_err(db_err)?),
        nickname: row.try_get("nickname").map_err(db_err)?,
        handled: row.try_get("handled").map_err(db_err)?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let role: i64 = row.try_get("role").map_err(db_err)?;
    let state: i64 = row.try_get("state").map_err(db_err)?;
    Ok(User {
        id: UserId::new(row.try_get("id").map_err(db_err)?),
        username: row.try_get("username").map_err(db_err)?,
        nickname: row.try_get("nickname").map_err(db_err)?,
        role: role as u32,
        state: state as u32,
    })
}

#[async_trait]
impl WorkflowTypeRepository for SqliteTransaction {
    async fn get_type(&mut self, id: WorkflowTypeId) -> Result<WorkflowType> {
        let row = sqlx::query(
            "SELECT id, name, only_name, org_id, system FROM workflow_type WHERE id = ?1",
        )
        .bind(id.value())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("workflow_type {}", id)))?;
        type_from_row(&row)
    }

    async fn get_type_by_only_name(&mut self, only_name: &str) -> Result<WorkflowType> {
        let row = sqlx::query(
            "SELECT id, name, only_name, org_id, system FROM workflow_type WHERE only_name = ?1",
        )
        .bind(only_name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("workflow_type '{}'", only_name)))?;
        type_from_row(&row)
    }

    async fn insert_type(&mut self, workflow_type: &WorkflowType) -> Result<WorkflowTypeId> {
        let result = sqlx::query(
            "INSERT INTO workflow_type (name, only_name, org_id, system) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&workflow_type.name)
        .bind(&workflow_type.only_name)
        .bind(workflow_type.org_id)
        .bind(workflow_type.system)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(WorkflowTypeId::new(result.last_insert_rowid()))
    }
}

#[async_trait]
impl WorkflowNodeRepository for SqliteTransaction {
    async fn list_nodes(&mut self, type_id: WorkflowTypeId) -> Result<Vec<WorkflowNode>> {
        let rows = sqlx::query(
            r#"
            SELECT id, type_id, node, name, action, action_value, everyone
            FROM workflow_node
            WHERE type_id = ?1
            ORDER BY node ASC
            "#,
        )
        .bind(type_id.value())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;
        rows.iter().map(node_from_row).collect()
    }

    async fn get_node(&mut self, type_id: WorkflowTypeId, node: i64) -> Result<WorkflowNode> {
        let row = sqlx::query(
            r#"
            SELECT id, type_id, node, name, action, action_value, everyone
            FROM workflow_node
            WHERE type_id = ?1 AND node = ?2
            "#,
        )
        .bind(type_id.value())
        .bind(node)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| {
            StoreError::NotFound(format!("workflow_node {} of type {}", node, type_id))
        })?;
        node_from_row(&row)
    }

    async fn next_node(
        &mut self,
        type_id: WorkflowTypeId,
        after: i64,
    ) -> Result<Option<WorkflowNode>> {
        let row = sqlx::query(
            r#"
            SELECT id, type_id, node, name, action, action_value, everyone
            FROM workflow_node
            WHERE type_id = ?1 AND node > ?2
            ORDER BY node ASC
            LIMIT 1
            "#,
        )
        .bind(type_id.value())
        .bind(after)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn insert_node(&mut self, node: &WorkflowNode) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_node (type_id, node, name, action, action_value, everyone)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(node.type_id.value())
        .bind(node.node)
        .bind(&node.name)
        .bind(&node.action)
        .bind(&node.action_value)
        .bind(node.everyone)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl WorkflowRepository for SqliteTransaction {
    async fn get_workflow(&mut self, id: WorkflowId) -> Result<Workflow> {
        let row = sqlx::query(
            r#"
            SELECT id, type_id, type_name, serials, title, promoter, status, node, submit_num,
                   created_at, updated_at
            FROM workflow
            WHERE id = ?1
            "#,
        )
        .bind(id.value())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("workflow {}", id)))?;
        workflow_from_row(&row)
    }

    async fn insert_workflow(&mut self, workflow: &Workflow) -> Result<WorkflowId> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow (type_id, type_name, serials, title, promoter, status, node,
                                  submit_num, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(workflow.type_id.value())
        .bind(&workflow.type_name)
        .bind(&workflow.serials)
        .bind(&workflow.title)
        .bind(workflow.promoter.value())
        .bind(workflow.status.code())
        .bind(workflow.node)
        .bind(workflow.submit_num)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(WorkflowId::new(result.last_insert_rowid()))
    }

    async fn update_workflow(&mut self, workflow: &Workflow) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow
            SET title = ?1, status = ?2, node = ?3, submit_num = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(&workflow.title)
        .bind(workflow.status.code())
        .bind(workflow.node)
        .bind(workflow.submit_num)
        .bind(workflow.updated_at)
        .bind(workflow.id.value())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("workflow {}", workflow.id)));
        }
        Ok(())
    }

    async fn count_workflows_since(&mut self, since: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM workflow WHERE created_at >= ?1")
            .bind(since)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)?;
        row.try_get("total").map_err(db_err)
    }
}

#[async_trait]
impl WorkflowOperatorRepository for SqliteTransaction {
    async fn list_operators(
        &mut self,
        workflow_id: WorkflowId,
        node: i64,
    ) -> Result<Vec<WorkflowOperator>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, node, user_id, nickname, handled
            FROM workflow_operator
            WHERE workflow_id = ?1 AND node = ?2
            ORDER BY id ASC
            "#,
        )
        .bind(workflow_id.value())
        .bind(node)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;
        rows.iter().map(operator_from_row).collect()
    }

    async fn insert_operators(&mut self, operators: &[WorkflowOperator]) -> Result<()> {
        for operator in operators {
            sqlx::query(
                r#"
                INSERT INTO workflow_operator (workflow_id, node, user_id, nickname, handled)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(operator.workflow_id.value())
            .bind(operator.node)
            .bind(operator.user_id.value())
            .bind(&operator.nickname)
            .bind(operator.handled)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn delete_operators(&mut self, workflow_id: WorkflowId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM workflow_operator WHERE workflow_id = ?1")
            .bind(workflow_id.value())
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn mark_handled(
        &mut self,
        workflow_id: WorkflowId,
        node: i64,
        user_id: UserId,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_operator SET handled = 1
            WHERE workflow_id = ?1 AND node = ?2 AND user_id = ?3
            "#,
        )
        .bind(workflow_id.value())
        .bind(node)
        .bind(user_id.value())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserRepository for SqliteTransaction {
    async fn get_user(&mut self, id: UserId) -> Result<User> {
        let row = sqlx::query("SELECT id, username, nickname, role, state FROM users WHERE id = ?1")
            .bind(id.value())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
        user_from_row(&row)
    }

    async fn list_super_admins(&mut self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            r#"
            SELECT id, username, nickname, role, state
            FROM users
            WHERE (role & ?1) = ?1 AND (state & ?2) = 0
            ORDER BY id ASC
            "#,
        )
        .bind(role::SUPER_ADMIN as i64)
        .bind(user_state::DISABLED as i64)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;
        rows.iter().map(user_from_row).collect()
    }

    async fn put_user(&mut self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO users (id, username, nickname, role, state)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(user.id.value())
        .bind(&user.username)
        .bind(&user.nickname)
        .bind(user.role as i64)
        .bind(user.state as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}
