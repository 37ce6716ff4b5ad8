//! PostgreSQL-backed relation repository
//!
//! Rows are unique on the natural key, so re-creating a relation returns
//! the stored row instead of inserting a duplicate.

use super::{RelationFilter, RelationRepository};
use crate::error::{AuthzError, Result};
use crate::models::Relation;
use async_trait::async_trait;
use authz_schema::Role;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

const COLUMNS: &str = "id, subject_namespace_id, subject_id, subject_relation, \
    object_namespace_id, object_id, role_id, role_namespace_id, namespace_id, \
    created_at, updated_at";

const UNIQUE_VIOLATION: &str = "23505";

pub struct PostgresRelationRepository {
    pool: PgPool,
}

impl PostgresRelationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| AuthzError::Storage(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Applies the bundled migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AuthzError::Migration(e.to_string()))?;
        info!("Relation table migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn row_to_relation(row: &PgRow) -> Result<Relation> {
    let role_id: Option<String> = row.try_get("role_id")?;
    let role_namespace_id: Option<String> = row.try_get("role_namespace_id")?;
    let role = match (&role_id, role_namespace_id) {
        (Some(id), Some(namespace)) => Some(Role::new(id, Vec::new()).in_namespace(&namespace)),
        _ => None,
    };

    Ok(Relation {
        id: row.try_get("id")?,
        subject_namespace_id: row.try_get("subject_namespace_id")?,
        subject_id: row.try_get("subject_id")?,
        subject_relation: row.try_get("subject_relation")?,
        object_namespace_id: row.try_get("object_namespace_id")?,
        object_id: row.try_get("object_id")?,
        role_id: role_id.unwrap_or_default(),
        role,
        namespace_edge_id: row
            .try_get::<Option<String>, _>("namespace_id")?
            .unwrap_or_default(),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn map_write_error(err: sqlx::Error) -> AuthzError {
    let duplicate = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);
    if duplicate {
        AuthzError::InvalidRelation("an identical relation already exists".to_string())
    } else {
        err.into()
    }
}

#[async_trait]
impl RelationRepository for PostgresRelationRepository {
    async fn create(&self, relation: Relation) -> Result<Relation> {
        relation.validate()?;
        debug!(subject = %relation.subject_id, object = %relation.object_id, "Inserting relation");

        let id = if relation.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            relation.id.clone()
        };
        let query = format!(
            r#"
            INSERT INTO relations (
                id, subject_namespace_id, subject_id, subject_relation,
                object_namespace_id, object_id,
                role_id, role_namespace_id, namespace_id,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            ON CONFLICT (
                subject_namespace_id, subject_id, object_namespace_id, object_id,
                COALESCE(role_id, ''), COALESCE(namespace_id, '')
            ) DO UPDATE SET updated_at = relations.updated_at
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(&id)
            .bind(&relation.subject_namespace_id)
            .bind(&relation.subject_id)
            .bind(relation.subject_relation.as_deref().and_then(non_empty))
            .bind(&relation.object_namespace_id)
            .bind(&relation.object_id)
            .bind(non_empty(relation.role_name()))
            .bind(relation.role_namespace())
            .bind(non_empty(&relation.namespace_edge_id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error)?;

        row_to_relation(&row)
    }

    async fn get(&self, id: &str) -> Result<Relation> {
        let query = format!("SELECT {COLUMNS} FROM relations WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AuthzError::not_found("relation", id))?;
        row_to_relation(&row)
    }

    async fn get_by_fields(&self, filter: RelationFilter) -> Result<Vec<Relation>> {
        let query = format!(
            r#"
            SELECT {COLUMNS} FROM relations
            WHERE ($1::text IS NULL OR subject_namespace_id = $1)
              AND ($2::text IS NULL OR subject_id = $2)
              AND ($3::text IS NULL OR object_namespace_id = $3)
              AND ($4::text IS NULL OR object_id = $4)
              AND ($5::text IS NULL OR role_id = $5)
              AND ($6::text IS NULL OR namespace_id = $6)
            ORDER BY created_at, id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(filter.subject_namespace_id)
            .bind(filter.subject_id)
            .bind(filter.object_namespace_id)
            .bind(filter.object_id)
            .bind(filter.role_id)
            .bind(filter.namespace_edge_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_relation).collect()
    }

    async fn list(&self) -> Result<Vec<Relation>> {
        let query = format!("SELECT {COLUMNS} FROM relations ORDER BY created_at, id");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_relation).collect()
    }

    async fn update(&self, relation: Relation) -> Result<Relation> {
        relation.validate()?;
        let query = format!(
            r#"
            UPDATE relations SET
                subject_namespace_id = $2,
                subject_id = $3,
                subject_relation = $4,
                object_namespace_id = $5,
                object_id = $6,
                role_id = $7,
                role_namespace_id = $8,
                namespace_id = $9,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(&relation.id)
            .bind(&relation.subject_namespace_id)
            .bind(&relation.subject_id)
            .bind(relation.subject_relation.as_deref().and_then(non_empty))
            .bind(&relation.object_namespace_id)
            .bind(&relation.object_id)
            .bind(non_empty(relation.role_name()))
            .bind(relation.role_namespace())
            .bind(non_empty(&relation.namespace_edge_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_write_error)?
            .ok_or_else(|| AuthzError::not_found("relation", relation.id.clone()))?;
        row_to_relation(&row)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM relations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthzError::not_found("relation", id));
        }
        debug!(id, "Relation deleted");
        Ok(())
    }
}
