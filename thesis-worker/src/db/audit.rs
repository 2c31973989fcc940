//! Audit history: defect lists per repair iteration and style score history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use thesis_common::{Error, Result};
use uuid::Uuid;

use crate::db::jobs::parse_timestamp;
use crate::models::{DefectAudit, StyleSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Defects,
    Style,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Defects => "defects",
            AuditKind::Style => "style",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "defects" => Some(AuditKind::Defects),
            "style" => Some(AuditKind::Style),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub iteration: i64,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

async fn insert(
    pool: &SqlitePool,
    job_id: Uuid,
    kind: AuditKind,
    iteration: i64,
    payload: String,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO audit_history (job_id, kind, iteration, payload, recorded_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(job_id.to_string())
    .bind(kind.as_str())
    .bind(iteration)
    .bind(payload)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

/// Record every critique pass of a repair run
pub async fn record_defect_audits(pool: &SqlitePool, job_id: Uuid, audits: &[DefectAudit]) -> Result<()> {
    for audit in audits {
        let payload = serde_json::to_string(audit)?;
        insert(pool, job_id, AuditKind::Defects, audit.iteration as i64, payload).await?;
    }
    Ok(())
}

/// Record the style loop's score history
pub async fn record_style_history(pool: &SqlitePool, job_id: Uuid, summary: &StyleSummary) -> Result<()> {
    let payload = serde_json::to_string(summary)?;
    insert(pool, job_id, AuditKind::Style, summary.iterations as i64, payload).await
}

/// All audit entries of a job in recording order
pub async fn load_audit(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        "SELECT kind, iteration, payload, recorded_at
         FROM audit_history
         WHERE job_id = ?
         ORDER BY id",
    )
    .bind(job_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let kind: String = row.get("kind");
            let kind = AuditKind::parse(&kind)
                .ok_or_else(|| Error::Internal(format!("Unknown audit kind '{}'", kind)))?;
            let payload: String = row.get("payload");
            Ok(AuditEntry {
                kind,
                iteration: row.get("iteration"),
                payload: serde_json::from_str(&payload)?,
                recorded_at: parse_timestamp(row.get("recorded_at"), "recorded_at")?,
            })
        })
        .collect()
}
