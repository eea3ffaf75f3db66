use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Submit,
    Publish,
    DeletePublished,
    UpdateSettings,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Publish => "publish",
            Self::DeletePublished => "delete_published",
            Self::UpdateSettings => "update_settings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Results,
    Settings,
}

impl AuditCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Results => "results",
            Self::Settings => "settings",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub actor_id: String,
    pub action: AuditAction,
    pub category: AuditCategory,
    pub details: Value,
}

/// Fire-and-forget from the caller's side: sinks swallow and log their own
/// failures.
pub trait AuditSink {
    fn record(&self, event: AuditEvent);
}

/// Emits events as tracing records only.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "resultd::audit",
            actor = %event.actor_id,
            action = event.action.as_str(),
            category = event.category.as_str(),
            details = %event.details,
            "audit event"
        );
    }
}

pub struct SqliteAuditLog<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteAuditLog<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn insert(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO audit_log(id, at, actor_id, action, category, details_json)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                Utc::now().to_rfc3339(),
                &event.actor_id,
                event.action.as_str(),
                event.category.as_str(),
                serde_json::to_string(&event.details)?,
            ),
        )?;
        Ok(())
    }
}

impl AuditSink for SqliteAuditLog<'_> {
    fn record(&self, event: AuditEvent) {
        TracingAuditSink.record(event.clone());
        if let Err(e) = self.insert(&event) {
            warn!(target: "resultd::audit", error = %e, "failed to persist audit event");
        }
    }
}

/// Newest first.
pub fn list_events(conn: &Connection, limit: i64) -> anyhow::Result<Vec<Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, at, actor_id, action, category, details_json
         FROM audit_log
         ORDER BY rowid DESC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, at, actor_id, action, category, details) in rows {
        out.push(serde_json::json!({
            "id": id,
            "at": at,
            "actorId": actor_id,
            "action": action,
            "category": category,
            "details": serde_json::from_str::<Value>(&details)?,
        }));
    }
    Ok(out)
}
