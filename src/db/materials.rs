//! Materials database operations

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::render::{Document, MetadataStore, RenderError, RenderResult, SourceFormat};

/// Material record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Material {
    pub material_id: String,
    pub source_ref: String,
    pub file_type: String,
    pub num_page: Option<i64>,
    pub created_at: String,
}

impl Material {
    /// Convert the stored row into the render model
    pub fn into_document(self) -> RenderResult<Document> {
        let format: SourceFormat = self.file_type.parse().map_err(|e| {
            RenderError::Conversion(format!("material {}: {}", self.material_id, e))
        })?;

        let page_count = self
            .num_page
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0);

        Ok(Document {
            id: self.material_id,
            source_ref: self.source_ref,
            format,
            page_count,
        })
    }
}

/// Material repository backed by SQLite
#[derive(Clone)]
pub struct MaterialRepository {
    pool: SqlitePool,
}

impl MaterialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a specific material
    pub async fn get(&self, material_id: &str) -> RenderResult<Option<Material>> {
        let material = sqlx::query_as::<_, Material>(
            r#"
            SELECT material_id, source_ref, file_type, num_page, created_at
            FROM materials
            WHERE material_id = ?
            "#,
        )
        .bind(material_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(material)
    }

    /// Insert or replace a material
    pub async fn upsert_document(&self, document: &Document) -> RenderResult<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO materials (material_id, source_ref, file_type, num_page, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(material_id) DO UPDATE SET
                source_ref = excluded.source_ref,
                file_type = excluded.file_type,
                num_page = excluded.num_page
            "#,
        )
        .bind(&document.id)
        .bind(&document.source_ref)
        .bind(document.format.as_str())
        .bind(document.page_count.map(i64::from))
        .bind(&now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(material_id = %document.id, "Stored material");
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MaterialRepository {
    async fn get_document(&self, document_id: &str) -> RenderResult<Option<Document>> {
        self.get(document_id)
            .await?
            .map(Material::into_document)
            .transpose()
    }

    async fn record_page_count(&self, document_id: &str, page_count: u32) -> RenderResult<()> {
        sqlx::query("UPDATE materials SET num_page = ? WHERE material_id = ?")
            .bind(i64::from(page_count))
            .bind(document_id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(material_id = %document_id, page_count, "Recorded page count");
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> RenderResult<bool> {
        let result = sqlx::query("DELETE FROM materials WHERE material_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
