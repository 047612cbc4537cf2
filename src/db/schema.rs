//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Uploaded materials (documents rendered page by page)
CREATE TABLE IF NOT EXISTS materials (
    material_id TEXT PRIMARY KEY,
    source_ref TEXT NOT NULL,
    file_type TEXT NOT NULL,
    num_page INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_materials_created_at ON materials(created_at);
"#;
