//! Generated document storage
//!
//! Each job keeps one document in two forms: the structured tree (JSON) and
//! the flattened Markdown, plus the bibliography rendered next to it.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use thesis_common::{Error, Result};
use uuid::Uuid;

use crate::db::jobs::parse_timestamp;
use crate::db::settings::get_max_lock_wait_ms;
use crate::models::DocumentTree;
use crate::utils::retry_on_lock;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub job_id: Uuid,
    pub tree: DocumentTree,
    pub markdown: String,
    pub bibliography: String,
    pub word_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Store (or replace) the document of a job
pub async fn save_document(
    pool: &SqlitePool,
    job_id: Uuid,
    tree: &DocumentTree,
    bibliography: &str,
) -> Result<()> {
    let job_id = job_id.to_string();
    let tree_json = serde_json::to_string(tree)?;
    let markdown = tree.reassemble();
    let word_count = tree.word_count() as i64;
    let updated_at = Utc::now().to_rfc3339();

    let max_wait_ms = get_max_lock_wait_ms(pool).await?;

    retry_on_lock("save_document", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO documents (job_id, tree, markdown, bibliography, word_count, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                tree = excluded.tree,
                markdown = excluded.markdown,
                bibliography = excluded.bibliography,
                word_count = excluded.word_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job_id)
        .bind(&tree_json)
        .bind(&markdown)
        .bind(bibliography)
        .bind(word_count)
        .bind(&updated_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

pub async fn load_document(pool: &SqlitePool, job_id: Uuid) -> Result<Option<StoredDocument>> {
    let row = sqlx::query(
        r#"
        SELECT tree, markdown, bibliography, word_count, updated_at
        FROM documents
        WHERE job_id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let tree: String = row.get("tree");
    let tree: DocumentTree = serde_json::from_str(&tree)?;

    Ok(Some(StoredDocument {
        job_id,
        tree,
        markdown: row.get("markdown"),
        bibliography: row.get("bibliography"),
        word_count: row.get::<i64, _>("word_count") as usize,
        updated_at: parse_timestamp(row.get("updated_at"), "updated_at")?,
    }))
}
